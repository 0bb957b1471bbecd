// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal declarative buildfile front-end.
//!
//! The full buildfile language (expansion, conditionals, includes) is an
//! external collaborator; this loader covers the contract the core needs
//! exercised: module loading, variable assignment and target declarations
//! with prerequisite lists.
//!
//! ```text
//! # comment
//! using core
//! cxx.flags = -O2 -g
//! exe{hello}: obj{hello} obj{util}
//! obj{hello}: cxx{hello}
//! ```

use fs_err as fs;

use crate::context::{Context, Phase};
use crate::diag::{Failed, Location, fail, fail_at};
use crate::module;
use crate::name::Name;
use crate::path::{DirPath, Path};
use crate::prerequisite::Prerequisite;
use crate::scope::{RootExtra, ScopeId};
use crate::variable::Value;

/// Load `buildfile` into the scope at `src_base`, creating the project
/// root if this is its first buildfile.
///
/// Targets are declared with `src_base` as their directory and, when the
/// build is out of tree, `out_base` as their out directory.
pub fn load(
    ctx: &Context,
    buildfile: &Path,
    out_base: &DirPath,
    src_base: &DirPath,
) -> Result<ScopeId, Failed> {
    debug_assert_eq!(ctx.phase(), Phase::Load);

    let root = {
        let mut scopes = ctx.scopes_mut();
        let root = scopes.insert(src_base.clone());
        let scope = scopes.get_mut(root);
        if scope.root.is_none() {
            scope.root = Some(RootExtra {
                project: None,
                src_root: src_base.clone(),
                out_root: out_base.clone(),
            });
        }
        root
    };

    module::load(ctx, root, "core")?;
    crate::configure::load_saved(ctx, root)?;

    let text = fs::read_to_string(buildfile.as_std_path())
        .map_err(|e| fail(format_args!("cannot read {buildfile}: {e}")))?;

    let out = if out_base == src_base {
        DirPath::default()
    } else {
        out_base.clone()
    };

    for (index, raw) in text.lines().enumerate() {
        let location = Location {
            file: buildfile.to_string(),
            line: (index + 1) as u32,
        };

        let line = match raw.find('#') {
            Some(i) => &raw[..i],
            None => raw,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix("using ") {
            module::load(ctx, root, name.trim())?;
            continue;
        }

        if let Some((lhs, rhs)) = split_declaration(line) {
            declare(ctx, root, src_base, &out, lhs, rhs, &location)?;
            continue;
        }

        if let Some((name, value)) = line.split_once('=') {
            let name = name.trim();
            if name.is_empty() {
                return Err(fail_at(&location, "variable assignment without a name"));
            }
            ctx.scopes_mut()
                .get_mut(root)
                .assign(name, Value::from_words(value));
            continue;
        }

        return Err(fail_at(
            &location,
            format_args!("expected declaration or assignment, got {line:?}"),
        ));
    }

    Ok(root)
}

/// Convenience: load `<dir>/buildfile` building in-tree.
pub fn load_default(ctx: &Context, dir: &DirPath) -> Result<ScopeId, Failed> {
    let buildfile = dir.join("buildfile");
    load(ctx, &buildfile, dir, dir)
}

/// A declaration line is `names: prerequisites` where `=` may only appear
/// after the colon (to keep `a = b` an assignment).
fn split_declaration(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    if line[..colon].contains('=') {
        return None;
    }
    Some((&line[..colon], &line[colon + 1..]))
}

fn declare(
    ctx: &Context,
    root: ScopeId,
    src_base: &DirPath,
    out: &DirPath,
    lhs: &str,
    rhs: &str,
    location: &Location,
) -> Result<(), Failed> {
    let mut declared = Vec::new();

    for word in lhs.split_whitespace() {
        let name = Name::parse(word)
            .map_err(|e| fail_at(location, format_args!("invalid target {word:?}: {e}")))?;
        let p = Prerequisite::from_name(ctx, &name, root)?;

        if let Some(pattern) = p.typ.pattern {
            if !pattern(&p.name) {
                return Err(fail_at(
                    location,
                    format_args!("invalid name {:?} for target type {}", p.name, p.typ.name),
                ));
            }
        }

        let dir = if name.dir.is_absolute() {
            name.dir.clone()
        } else if name.dir.is_empty() {
            src_base.clone()
        } else {
            src_base.join_dir(name.dir.as_str())
        };

        let (_, target, _) = ctx
            .targets
            .insert(p.typ, dir, out.clone(), p.name.clone(), p.ext.clone());
        declared.push(target);
    }

    if declared.is_empty() {
        return Err(fail_at(location, "declaration without a target"));
    }

    for word in rhs.split_whitespace() {
        let name = Name::parse(word)
            .map_err(|e| fail_at(location, format_args!("invalid prerequisite {word:?}: {e}")))?;
        let p = Prerequisite::from_name(ctx, &name, root)?;
        for target in &declared {
            target.add_prerequisite(p.clone());
        }
    }

    Ok(())
}
