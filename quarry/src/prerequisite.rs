// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Prerequisites: declared incoming edges of a target.
//!
//! A prerequisite carries the referenced target key plus the scope it was
//! declared in, for relative directory resolution. It resolves to a
//! concrete target during match through the target type's search function.

use std::fmt;

use crate::context::Context;
use crate::diag::{Failed, fail};
use crate::filesystem;
use crate::name::Name;
use crate::path::DirPath;
use crate::scope::ScopeId;
use crate::target::{Search, TargetId, TargetKey, TargetType};

#[derive(Debug, Clone)]
pub struct Prerequisite {
    pub proj: Option<String>,
    pub typ: &'static TargetType,
    /// Possibly relative; resolved against the declaring scope.
    pub dir: DirPath,
    pub name: String,
    pub ext: Option<String>,
    pub scope: ScopeId,
}

impl Prerequisite {
    pub fn new(
        typ: &'static TargetType,
        dir: DirPath,
        name: impl Into<String>,
        ext: Option<String>,
        scope: ScopeId,
    ) -> Self {
        Self {
            proj: None,
            typ,
            dir,
            name: name.into(),
            ext,
            scope,
        }
    }

    /// Build a prerequisite from a parsed buildfile name, resolving the
    /// target type through the declaring scope's chain.
    pub fn from_name(ctx: &Context, name: &Name, scope: ScopeId) -> Result<Self, Failed> {
        let scopes = ctx.scopes();

        let typ = if name.typ.is_empty() {
            if name.is_dir() {
                scopes
                    .find_target_type(scope, "dir")
                    .ok_or_else(|| fail("target type dir is not registered"))?
            } else {
                scopes
                    .find_target_type(scope, "file")
                    .ok_or_else(|| fail("target type file is not registered"))?
            }
        } else {
            scopes.find_target_type(scope, &name.typ).ok_or_else(|| {
                fail(format_args!("unknown target type {} in {name}", name.typ))
            })?
        };

        // A specified extension is split off the value: foo.cxx.
        let (value, ext) = match name.value.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() => (base.to_owned(), Some(ext.to_owned())),
            _ => (name.value.clone(), None),
        };

        Ok(Self {
            proj: name.proj.clone(),
            typ,
            dir: name.dir.clone(),
            name: if name.is_dir() { String::new() } else { value },
            ext,
            scope,
        })
    }

    /// The absolute key this prerequisite refers to.
    pub fn key(&self, ctx: &Context) -> TargetKey {
        let dir = if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            let scopes = ctx.scopes();
            let base = scopes.get(self.scope).dir.clone();
            if self.dir.is_empty() {
                base
            } else {
                base.join_dir(self.dir.as_str())
            }
        };

        TargetKey {
            typ: self.typ,
            dir,
            out: DirPath::default(),
            name: self.name.clone(),
            ext: self.ext.clone(),
        }
    }
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{{{}}}", self.dir, self.typ.name, self.name)
    }
}

/// Resolve a prerequisite to a concrete target, creating it if necessary.
///
/// For file-searched types the target is bound to the filesystem entry in
/// its directory: the path is derived and the current mtime recorded. The
/// target is created either way; whether a nonexistent file is an error is
/// the match phase's business.
pub fn search(ctx: &Context, p: &Prerequisite) -> Result<TargetId, Failed> {
    let key = p.key(ctx);

    if let Some((id, _)) = ctx.targets.find(&key) {
        return Ok(id);
    }

    // Resolve the extension before creation so that the key is stable:
    // specified, fixed by type, then the type's scope-configured default.
    let ext = key.ext.clone().or_else(|| {
        p.typ.fixed_extension.map(str::to_owned).or_else(|| {
            p.typ.default_extension.and_then(|f| {
                let scopes = ctx.scopes();
                let sid = scopes.find_dir(&key.dir);
                f(&key, scopes.get(sid))
            })
        })
    });

    let (id, target, created) = ctx.targets.insert(
        key.typ,
        key.dir.clone(),
        key.out.clone(),
        key.name.clone(),
        ext,
    );

    if created && p.typ.search == Search::File {
        let path = target.derive_path()?.clone();
        let mtime = filesystem::mtime(path.as_std_path())
            .map_err(|e| fail(format_args!("cannot stat {path}: {e}")))?;
        target.set_mtime(mtime);
        tracing::trace!(target = %target, exists = mtime.exists(), "searched file");
    }

    Ok(id)
}
