// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem paths with a canonical textual form.
//!
//! Two flavours share the normalization code: [`Path`] for ordinary entries
//! and [`DirPath`] for directories, which always ends with the separator.
//! Both are value types; equality is byte-wise on the normalized form.

use std::ffi::OsStr;
use std::fmt;

const SEP: char = '/';

/// Collapse duplicate separators and resolve `.` / `..` segments.
///
/// Leading `..` segments of a relative path are preserved; resolving `..`
/// at the root of an absolute path stays at the root. The result carries no
/// trailing separator except for the root itself.
fn normalize(s: &str) -> String {
    let absolute = s.starts_with(SEP);
    let mut parts: Vec<&str> = Vec::new();

    for part in s.split(SEP) {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// An ordinary filesystem path in normalized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(String);

impl Path {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(normalize(s.as_ref()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(SEP)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final component, without the directory part.
    pub fn leaf(&self) -> &str {
        match self.0.rfind(SEP) {
            Some(i) => &self.0[i + 1..],
            None => &self.0,
        }
    }

    /// Directory part, without the leaf.
    pub fn directory(&self) -> DirPath {
        match self.0.rfind(SEP) {
            Some(0) => DirPath("/".into()),
            Some(i) => DirPath(format!("{}/", &self.0[..i])),
            None => DirPath::default(),
        }
    }

    /// Extension of the leaf, or none. A leading dot does not start one.
    pub fn extension(&self) -> Option<&str> {
        let leaf = self.leaf();
        match leaf.rfind('.') {
            Some(0) | None => None,
            Some(i) => Some(&leaf[i + 1..]),
        }
    }

    /// The path with its extension (if any) removed.
    pub fn base(&self) -> Path {
        match self.extension() {
            Some(e) => Path(self.0[..self.0.len() - e.len() - 1].to_owned()),
            None => self.clone(),
        }
    }

    /// Replace or append the extension. An empty extension strips it.
    pub fn with_extension(&self, ext: &str) -> Path {
        let base = self.base();
        if ext.is_empty() {
            base
        } else {
            Path(format!("{}.{ext}", base.0))
        }
    }

    /// Test whether this path is inside `dir`, on a component boundary.
    pub fn sub_path(&self, dir: &DirPath) -> bool {
        if dir.is_empty() {
            return !self.is_absolute();
        }
        self.0.starts_with(dir.as_str()) || self.0 == dir.as_str()[..dir.as_str().len() - 1]
    }

    /// The remainder of this path relative to `dir`, if it is inside it.
    pub fn relative_to(&self, dir: &DirPath) -> Option<Path> {
        if !self.sub_path(dir) || self.0.len() < dir.as_str().len() {
            return None;
        }
        Some(Path(self.0[dir.as_str().len()..].to_owned()))
    }

    pub fn as_std_path(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<OsStr> for Path {
    fn as_ref(&self) -> &OsStr {
        OsStr::new(&self.0)
    }
}

/// A directory path, normalized to end with the separator.
///
/// The empty directory path is a valid value meaning "unspecified"; it is
/// used for the out directory of targets built in the source tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirPath(String);

impl DirPath {
    pub fn new(s: impl AsRef<str>) -> Self {
        let n = normalize(s.as_ref());
        if n.is_empty() || n == "/" {
            Self(n)
        } else {
            Self(format!("{n}/"))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(SEP)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final directory component, without trailing separator.
    pub fn leaf(&self) -> &str {
        let trimmed = self.0.trim_end_matches(SEP);
        match trimmed.rfind(SEP) {
            Some(i) => &trimmed[i + 1..],
            None => trimmed,
        }
    }

    /// Parent directory; the root is its own parent.
    pub fn parent(&self) -> DirPath {
        let trimmed = self.0.trim_end_matches(SEP);
        match trimmed.rfind(SEP) {
            Some(0) => DirPath("/".into()),
            Some(i) => DirPath(format!("{}/", &trimmed[..i])),
            None => DirPath::default(),
        }
    }

    /// Whether `other` is this directory or a subdirectory of it.
    pub fn contains(&self, other: &DirPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Append an entry name, producing an ordinary path.
    pub fn join(&self, leaf: impl AsRef<str>) -> Path {
        Path::new(format!("{}{}", self.0, leaf.as_ref()))
    }

    /// Append a (possibly relative) directory.
    pub fn join_dir(&self, dir: impl AsRef<str>) -> DirPath {
        DirPath::new(format!("{}{}", self.0, dir.as_ref()))
    }

    pub fn as_std_path(&self) -> &std::path::Path {
        std::path::Path::new(if self.0.len() > 1 {
            self.0.trim_end_matches(SEP)
        } else {
            &self.0
        })
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DirPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<OsStr> for DirPath {
    fn as_ref(&self) -> &OsStr {
        self.as_std_path().as_os_str()
    }
}
