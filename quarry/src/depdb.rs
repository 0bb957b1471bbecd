// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-target dependency database.
//!
//! A binary-safe, line-oriented file recording what a recipe based its last
//! run on: tool identity, command-line hash, discovered dynamic
//! prerequisites. The final line is a single NUL end marker; a file without
//! it (an interrupted write) is treated as absent on the next open.
//!
//! The reading/writing mode switch is transparent: the first `expect`
//! mismatch truncates at the current position and continues in write mode,
//! so a recipe streams its lines once and the database ends up correct
//! either way.

use std::io::{self, Write as _};

use fs_err as fs;
use xxhash_rust::xxh3::xxh3_64;

use crate::filecache;
use crate::filesystem::{self, Timestamp};
use crate::path::Path;

const END_MARKER: &[u8] = b"\0";

#[derive(Debug)]
pub struct DepDb {
    path: Path,
    lines: Vec<Vec<u8>>,
    pos: usize,
    writing: bool,
    /// Whether close must rewrite the file.
    dirty: bool,
    mtime: Timestamp,
}

impl DepDb {
    /// Open for reading if the file exists and carries the end marker;
    /// otherwise open for writing. A stale file missing the marker is
    /// treated as absent. An existing empty file reads as zero lines.
    pub fn open(path: Path) -> io::Result<Self> {
        let (lines, writing, dirty) = match fs::read(path.as_std_path()) {
            Ok(bytes) if bytes.is_empty() => (Vec::new(), false, false),
            Ok(bytes) => match parse(&bytes) {
                Some(lines) => (lines, false, false),
                None => (Vec::new(), true, true),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Vec::new(), true, true),
            Err(e) => return Err(e),
        };

        let mtime = filesystem::mtime(path.as_std_path())?;

        Ok(Self {
            path,
            lines,
            pos: 0,
            writing,
            dirty,
            mtime,
        })
    }

    /// Open through a file cache entry, restoring a preempted file first.
    pub fn open_cached(entry: &mut filecache::Entry) -> io::Result<Self> {
        entry.restore().map_err(io::Error::other)?;
        Self::open(entry.path().clone())
    }

    /// Close through the cache entry.
    ///
    /// Writes the end marker, commits the new generation to the entry and
    /// preempts it, so with cache compression enabled only the compressed
    /// copy remains between uses; the next `open_cached` restores it
    /// transparently.
    pub fn close_cached(self, entry: &mut filecache::Entry) -> io::Result<Timestamp> {
        let mtime = self.close()?;
        entry.commit().map_err(io::Error::other)?;
        entry.preempt().map_err(io::Error::other)?;
        Ok(mtime)
    }

    pub fn reading(&self) -> bool {
        !self.writing
    }

    pub fn writing(&self) -> bool {
        self.writing
    }

    /// Unconsumed lines remain in read mode.
    pub fn more(&self) -> bool {
        !self.writing && self.pos < self.lines.len()
    }

    /// Next line in read mode; none once exhausted or after the switch to
    /// write mode.
    pub fn read(&mut self) -> Option<&[u8]> {
        if self.more() {
            let i = self.pos;
            self.pos += 1;
            Some(&self.lines[i])
        } else {
            None
        }
    }

    pub fn read_str(&mut self) -> Option<&str> {
        self.read().and_then(|l| std::str::from_utf8(l).ok())
    }

    /// Compare the next line against `line`; on mismatch (or when already
    /// writing) truncate at the current position and write `line`.
    pub fn expect(&mut self, line: impl AsRef<[u8]>) {
        let line = line.as_ref();

        if !self.writing {
            if self.pos < self.lines.len() && self.lines[self.pos] == line {
                self.pos += 1;
                return;
            }
            self.switch();
        }

        self.push(line);
    }

    /// Append a line in write mode, switching to it if necessary.
    pub fn write(&mut self, line: impl AsRef<[u8]>) {
        if !self.writing {
            self.switch();
        }
        self.push(line.as_ref());
    }

    fn switch(&mut self) {
        self.writing = true;
        self.dirty = true;
        self.lines.truncate(self.pos);
        self.pos = self.lines.len();
    }

    fn push(&mut self, line: &[u8]) {
        debug_assert!(!line.contains(&b'\n'));
        self.lines.push(line.to_vec());
        self.pos = self.lines.len();
        self.dirty = true;
    }

    /// Write the end marker and close.
    ///
    /// In read mode any unconsumed tail is stale and is truncated; a fully
    /// consumed read leaves the file (and its mtime) untouched.
    pub fn close(mut self) -> io::Result<Timestamp> {
        if !self.writing && self.pos < self.lines.len() {
            self.lines.truncate(self.pos);
            self.dirty = true;
        }

        if !self.dirty {
            return Ok(self.mtime);
        }

        let mut file = fs::File::create(self.path.as_std_path())?;
        for line in &self.lines {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.write_all(END_MARKER)?;
        file.write_all(b"\n")?;
        file.flush()?;
        drop(file);

        filesystem::mtime(self.path.as_std_path())
    }

    /// Mtime of the database as of open; drives out-of-date decisions
    /// relative to the target and its prerequisites.
    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }
}

/// Split into content lines, validating the end marker.
fn parse(bytes: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut lines: Vec<Vec<u8>> = bytes.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect();

    // A well-formed file ends "...\n\0\n", splitting into [.., "\0", ""].
    if lines.len() < 2 || !lines.pop().is_some_and(|l| l.is_empty()) {
        return None;
    }
    if !lines.pop().is_some_and(|l| l == END_MARKER) {
        return None;
    }

    Some(lines)
}

/// Stable identity hash for command lines and preprocessed input.
pub fn hash(data: impl AsRef<[u8]>) -> String {
    format!("{:016x}", xxh3_64(data.as_ref()))
}
