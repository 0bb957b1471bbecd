// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! One build per directory.
//!
//! The driver takes an exclusive lock on `.quarry.lock` in the out root
//! before loading anything; a second build in the same directory reports
//! the contention and waits. The lock file is unlinked again on release.

use fs_err as fs;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::diag::{Failed, fail, warn};
use crate::filesystem::try_rmfile;
use crate::path::{DirPath, Path};

const LOCK_FILE: &str = ".quarry.lock";

/// Held for the duration of a build.
pub struct LockFile {
    path: Path,
    flock: Option<Flock<std::fs::File>>,
}

impl LockFile {
    /// Take the build lock for `dir`.
    ///
    /// The acquisition is probed without blocking first so that a
    /// concurrent build can be reported before this one stalls on it.
    pub fn acquire(dir: &DirPath) -> Result<Self, Failed> {
        let path = dir.join(LOCK_FILE);

        let (file, _) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path.as_std_path())
            .map_err(|e| fail(format_args!("cannot open {path}: {e}")))?
            .into_parts();

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock).or_else(|(file, errno)| {
            if errno != Errno::EWOULDBLOCK {
                return Err(fail(format_args!("cannot lock {path}: {errno}")));
            }

            warn(format_args!("waiting for another build in {dir}"));
            Flock::lock(file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| fail(format_args!("cannot lock {path}: {errno}")))
        })?;

        Ok(Self {
            path,
            flock: Some(flock),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Unlink before releasing; a waiter already holds the open fd and
        // only cares about the flock itself.
        let _ = try_rmfile(self.path.as_std_path());
        self.flock = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DirPath::new(tmp.path().to_str().unwrap());

        let held = LockFile::acquire(&dir).unwrap();
        let path = held.path().clone();

        // A second non-blocking attempt must fail while held.
        let probe = std::fs::File::options()
            .create(true)
            .write(true)
            .open(path.as_std_path())
            .unwrap();
        assert!(Flock::lock(probe, FlockArg::LockExclusiveNonblock).is_err());

        drop(held);

        // Release unlinks the lock file and frees the lock.
        assert!(!path.as_std_path().exists());
        LockFile::acquire(&dir).unwrap();
    }
}
