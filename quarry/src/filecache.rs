// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! File cache with transparent compression.
//!
//! Backs depdb files and other regenerable build state. Each entry knows
//! two paths, the uncompressed one and `<name>.zst`, and derives its state
//! from file presence; there is no index. Compression is streamed in ~1 MiB
//! blocks at the lowest level: the point is footprint, not ratio.

use std::io::{self, Read as _, Write as _};

use fs_err as fs;
use thiserror::Error;

use crate::filesystem::try_rmfile;
use crate::path::Path;

pub const COMPRESSED_EXT: &str = "zst";

const BLOCK: usize = 1024 * 1024;
const LEVEL: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninit,
    /// Uncompressed file present, compressed absent.
    Uncomp,
    /// Compressed file present, uncompressed absent.
    Comp,
    /// Both present; transient after decompression.
    Decomp,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} (or its compressed variant) does not exist; consider cleaning the build state")]
    Missing(Path),
    #[error("cannot decompress {0}; consider cleaning the build state")]
    Decompress(Path, #[source] io::Error),
    #[error("cache entry {0}")]
    Io(Path, #[source] io::Error),
}

/// Entry factory carrying the compression policy.
#[derive(Debug, Clone, Copy)]
pub struct FileCache {
    compress: bool,
}

impl FileCache {
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    pub fn compression(&self) -> bool {
        self.compress
    }

    pub fn entry(&self, path: Path) -> Entry {
        let comp_path = Path::new(format!("{path}.{COMPRESSED_EXT}"));
        Entry {
            path,
            comp_path,
            state: State::Uninit,
            pins: 0,
            compress: self.compress,
        }
    }
}

#[derive(Debug)]
pub struct Entry {
    path: Path,
    comp_path: Path,
    state: State,
    pins: u32,
    compress: bool,
}

impl Entry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_pinned(&self) -> bool {
        self.pins != 0
    }

    /// Begin a new generation of this entry, invalidating any stale
    /// compressed file. The state is committed on the writer's close.
    pub fn init_new(&mut self) -> Result<Write<'_>, Error> {
        debug_assert_eq!(self.state, State::Uninit);

        if self.compress {
            try_rmfile(self.comp_path.as_std_path()).map_err(|e| Error::Io(self.comp_path.clone(), e))?;
        }

        let file =
            fs::File::create(self.path.as_std_path()).map_err(|e| Error::Io(self.path.clone(), e))?;

        self.pins += 1;
        Ok(Write {
            entry: self,
            file: Some(file),
        })
    }

    /// Derive the state from the filesystem for an entry expected to exist.
    ///
    /// An uncompressed file renders the compressed one stale; it is removed.
    pub fn init_existing(&mut self) -> Result<(), Error> {
        debug_assert_eq!(self.state, State::Uninit);

        if !self.compress {
            self.state = State::Uncomp;
            return Ok(());
        }

        if self.path.as_std_path().exists() {
            try_rmfile(self.comp_path.as_std_path()).map_err(|e| Error::Io(self.comp_path.clone(), e))?;
            self.state = State::Uncomp;
        } else if self.comp_path.as_std_path().exists() {
            self.state = State::Comp;
        } else {
            return Err(Error::Missing(self.comp_path.clone()));
        }

        Ok(())
    }

    /// Like [`init_existing`](Self::init_existing) but tolerates a missing
    /// entry, leaving it uninitialized for a subsequent `init_new`.
    pub fn restore(&mut self) -> Result<(), Error> {
        match self.init_existing() {
            Ok(()) => {
                if self.state == State::Comp {
                    self.decompress()?;
                    self.state = State::Decomp;
                }
                Ok(())
            }
            Err(Error::Missing(_)) => {
                self.state = State::Uninit;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Open for reading, decompressing first if only the compressed file
    /// remains.
    pub fn open_read(&mut self) -> Result<Read<'_>, Error> {
        if self.state == State::Uninit {
            self.init_existing()?;
        }

        if self.state == State::Comp {
            self.decompress()?;
            self.state = State::Decomp;
        }

        let file =
            fs::File::open(self.path.as_std_path()).map_err(|e| Error::Io(self.path.clone(), e))?;

        self.pins += 1;
        Ok(Read {
            entry: self,
            file,
        })
    }

    /// Record that a new uncompressed generation was written in place,
    /// for writers that manage the file themselves (the dependency
    /// database). Any compressed copy is stale and is removed.
    pub fn commit(&mut self) -> Result<(), Error> {
        if self.compress {
            try_rmfile(self.comp_path.as_std_path()).map_err(|e| Error::Io(self.comp_path.clone(), e))?;
        }
        self.state = State::Uncomp;
        Ok(())
    }

    /// Release the uncompressed footprint if nobody holds the entry.
    ///
    /// Returns whether the uncompressed file was dropped.
    pub fn preempt(&mut self) -> Result<bool, Error> {
        if !self.compress || self.is_pinned() {
            return Ok(false);
        }

        if self.state == State::Uncomp {
            self.compress_file()?;
            self.state = State::Decomp;
        }

        if self.state == State::Decomp {
            if try_rmfile(self.path.as_std_path()).map_err(|e| Error::Io(self.path.clone(), e))? {
                self.state = State::Comp;
            }
            return Ok(true);
        }

        Ok(false)
    }

    fn compress_file(&self) -> Result<(), Error> {
        let input =
            fs::File::open(self.path.as_std_path()).map_err(|e| Error::Io(self.path.clone(), e))?;
        let output = fs::File::create(self.comp_path.as_std_path())
            .map_err(|e| Error::Io(self.comp_path.clone(), e))?;

        copy_blocks(input, zstd::stream::Encoder::new(output, LEVEL).map_err(map_comp(&self.comp_path))?)
            .map_err(map_comp(&self.comp_path))?;

        tracing::trace!(path = %self.path, "compressed cache entry");
        Ok(())
    }

    fn decompress(&self) -> Result<(), Error> {
        let input = fs::File::open(self.comp_path.as_std_path())
            .map_err(|e| Error::Io(self.comp_path.clone(), e))?;
        let mut output =
            fs::File::create(self.path.as_std_path()).map_err(|e| Error::Io(self.path.clone(), e))?;

        let mut decoder = zstd::stream::Decoder::new(input)
            .map_err(|e| Error::Decompress(self.comp_path.clone(), e))?;
        io::copy(&mut decoder, &mut output)
            .map_err(|e| Error::Decompress(self.comp_path.clone(), e))?;

        tracing::trace!(path = %self.path, "restored cache entry");
        Ok(())
    }
}

fn map_comp(path: &Path) -> impl Fn(io::Error) -> Error + '_ {
    move |e| Error::Io(path.clone(), e)
}

/// Stream through the encoder in fixed blocks.
fn copy_blocks(
    mut input: fs::File,
    mut encoder: zstd::stream::Encoder<'static, fs::File>,
) -> io::Result<()> {
    let mut block = vec![0u8; BLOCK];
    loop {
        let n = input.read(&mut block)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&block[..n])?;
    }
    encoder.finish()?;
    Ok(())
}

/// Writer pinning the entry; the entry commits to uncompressed on close.
pub struct Write<'a> {
    entry: &'a mut Entry,
    file: Option<fs::File>,
}

impl Write<'_> {
    pub fn close(mut self) -> Result<(), Error> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .map_err(|e| Error::Io(self.entry.path.clone(), e))?;
        }
        Ok(())
    }
}

impl io::Write for Write<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(f) => f.write(buf),
            None => Err(io::Error::other("cache writer already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.file {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for Write<'_> {
    fn drop(&mut self) {
        self.file = None;
        self.entry.pins -= 1;
        self.entry.state = State::Uncomp;
    }
}

/// Reader pinning the entry.
pub struct Read<'a> {
    entry: &'a mut Entry,
    file: fs::File,
}

impl io::Read for Read<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for Read<'_> {
    fn drop(&mut self) {
        self.entry.pins -= 1;
    }
}
