// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Builtin target types.
//!
//! Language modules register their own types on top of these (source file
//! types with project-configured extensions, library groups and so on); the
//! set here is what the engine itself needs: the abstract root, aliases,
//! directories and the file hierarchy.

use super::{PayloadKind, Search, TargetType};

/// Abstract root of the type hierarchy.
pub static TARGET: TargetType = TargetType {
    name: "target",
    base: None,
    payload: PayloadKind::Plain,
    fixed_extension: None,
    default_extension: None,
    pattern: None,
    see_through: false,
    search: Search::Create,
};

/// Named grouping of other targets; iteration sees through it.
pub static ALIAS: TargetType = TargetType {
    name: "alias",
    base: Some(&TARGET),
    payload: PayloadKind::Plain,
    fixed_extension: None,
    default_extension: None,
    pattern: None,
    see_through: true,
    search: Search::Create,
};

/// Alias for "everything declared in this directory".
pub static DIR: TargetType = TargetType {
    name: "dir",
    base: Some(&ALIAS),
    payload: PayloadKind::Plain,
    fixed_extension: None,
    default_extension: None,
    pattern: None,
    see_through: true,
    search: Search::Create,
};

/// Abstract target with a modification time but no path of its own.
pub static MTIME_TARGET: TargetType = TargetType {
    name: "mtime_target",
    base: Some(&TARGET),
    payload: PayloadKind::Mtime,
    fixed_extension: None,
    default_extension: None,
    pattern: None,
    see_through: false,
    search: Search::Create,
};

/// Abstract target with an assigned filesystem path.
pub static PATH_TARGET: TargetType = TargetType {
    name: "path_target",
    base: Some(&MTIME_TARGET),
    payload: PayloadKind::Path,
    fixed_extension: None,
    default_extension: None,
    pattern: None,
    see_through: false,
    search: Search::Create,
};

/// Regular file; prerequisite search binds it to the filesystem.
pub static FILE: TargetType = TargetType {
    name: "file",
    base: Some(&PATH_TARGET),
    payload: PayloadKind::Path,
    fixed_extension: None,
    default_extension: None,
    pattern: None,
    see_through: false,
    search: Search::File,
};

/// Executable; no extension on this platform.
pub static EXE: TargetType = TargetType {
    name: "exe",
    base: Some(&FILE),
    payload: PayloadKind::Path,
    fixed_extension: Some(""),
    default_extension: None,
    pattern: None,
    see_through: false,
    search: Search::File,
};

/// Object file.
pub static OBJ: TargetType = TargetType {
    name: "obj",
    base: Some(&FILE),
    payload: PayloadKind::Path,
    fixed_extension: Some("o"),
    default_extension: None,
    pattern: None,
    see_through: false,
    search: Search::File,
};

/// The builtin types, in registration order.
pub static BUILTIN: &[&TargetType] = &[
    &TARGET,
    &ALIAS,
    &DIR,
    &MTIME_TARGET,
    &PATH_TARGET,
    &FILE,
    &EXE,
    &OBJ,
];
