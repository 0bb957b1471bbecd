// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem primitives and modification times.
//!
//! Timestamps are encodable into a single `u64` so that targets can publish
//! them atomically: 0 is "file does not exist", `u64::MAX` is reserved for
//! "not yet queried", and anything in between is nanoseconds since the epoch
//! plus one.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs_err as fs;

pub const TIMESTAMP_NONEXISTENT: u64 = 0;
pub const TIMESTAMP_UNKNOWN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timestamp {
    Nonexistent,
    Real(SystemTime),
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp::Real(SystemTime::now())
    }

    pub fn exists(self) -> bool {
        matches!(self, Timestamp::Real(_))
    }

    pub fn encode(self) -> u64 {
        match self {
            Timestamp::Nonexistent => TIMESTAMP_NONEXISTENT,
            Timestamp::Real(t) => {
                let nanos = t
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                (nanos as u64).saturating_add(1).min(TIMESTAMP_UNKNOWN - 1)
            }
        }
    }

    /// Decode an atomic timestamp word; `TIMESTAMP_UNKNOWN` decodes to none.
    pub fn decode(raw: u64) -> Option<Self> {
        match raw {
            TIMESTAMP_NONEXISTENT => Some(Timestamp::Nonexistent),
            TIMESTAMP_UNKNOWN => None,
            n => Some(Timestamp::Real(UNIX_EPOCH + Duration::from_nanos(n - 1))),
        }
    }
}

/// Modification time of `path`; a missing entry is not an error.
pub fn mtime(path: impl AsRef<std::path::Path>) -> io::Result<Timestamp> {
    match fs::metadata(path.as_ref()) {
        Ok(meta) => Ok(Timestamp::Real(meta.modified()?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Timestamp::Nonexistent),
        Err(e) => Err(e),
    }
}

pub fn exists(path: impl AsRef<std::path::Path>) -> bool {
    path.as_ref().exists()
}

pub fn mkdir_p(dir: impl AsRef<std::path::Path>) -> io::Result<()> {
    fs::create_dir_all(dir.as_ref())
}

/// Remove a file if it exists; returns whether anything was removed.
pub fn try_rmfile(path: impl AsRef<std::path::Path>) -> io::Result<bool> {
    match fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create `path` if missing, otherwise advance its mtime to now.
pub fn touch(path: impl AsRef<std::path::Path>) -> io::Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::write(path, b"")?;
        return Ok(());
    }
    filetime::set_file_mtime(path, filetime::FileTime::now())
}
