// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The configure / disfigure meta-operations.
//!
//! Configure persists the root scope's `config.*` variables to
//! `<out_root>/build/config.yaml`; subsequent loads pick them back up so a
//! configured project builds the same way without repeating the overrides.
//! Disfigure removes the persisted configuration.

use std::collections::BTreeMap;

use fs_err as fs;

use crate::context::Context;
use crate::diag::{Failed, fail, note};
use crate::filesystem::{mkdir_p, try_rmfile};
use crate::path::Path;
use crate::scope::ScopeId;
use crate::variable::Value;

const PREFIX: &str = "config.";

fn config_path(ctx: &Context, root: ScopeId) -> Result<Path, Failed> {
    let scopes = ctx.scopes();
    let scope = scopes.get(root);
    let out_root = match &scope.root {
        Some(extra) => extra.out_root.clone(),
        None => scope.dir.clone(),
    };
    Ok(out_root.join_dir("build").join("config.yaml"))
}

/// Persist the `config.*` variables of the root scope.
pub fn save(ctx: &Context, root: ScopeId) -> Result<(), Failed> {
    let path = config_path(ctx, root)?;

    let values: BTreeMap<String, String> = {
        let scopes = ctx.scopes();
        scopes
            .get(root)
            .vars
            .iter()
            .filter(|(name, _)| name.starts_with(PREFIX))
            .map(|(name, value)| (name.to_owned(), value.to_string()))
            .collect()
    };

    mkdir_p(path.directory().as_std_path())
        .map_err(|e| fail(format_args!("cannot create {}: {e}", path.directory())))?;

    let serialized = serde_yaml::to_string(&values)
        .map_err(|e| fail(format_args!("cannot serialize configuration: {e}")))?;
    fs::write(path.as_std_path(), serialized)
        .map_err(|e| fail(format_args!("cannot write {path}: {e}")))?;

    println!("configured {}", ctx.scopes().get(root).dir);
    Ok(())
}

/// Apply a previously persisted configuration, if any. Explicit buildfile
/// assignments that follow override it.
pub fn load_saved(ctx: &Context, root: ScopeId) -> Result<(), Failed> {
    let path = config_path(ctx, root)?;

    let bytes = match fs::read(path.as_std_path()) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(fail(format_args!("cannot read {path}: {e}"))),
    };

    let values: BTreeMap<String, String> = serde_yaml::from_slice(&bytes).map_err(|e| {
        let failed = fail(format_args!("invalid configuration in {path}: {e}"));
        note("consider disfiguring and reconfiguring the project");
        failed
    })?;

    let mut scopes = ctx.scopes_mut();
    let scope = scopes.get_mut(root);
    for (name, value) in values {
        scope.assign(name, Value::from_words(&value));
    }

    Ok(())
}

/// Remove the persisted configuration.
pub fn remove(ctx: &Context, root: ScopeId) -> Result<(), Failed> {
    let path = config_path(ctx, root)?;

    let removed =
        try_rmfile(path.as_std_path()).map_err(|e| fail(format_args!("cannot remove {path}: {e}")))?;
    if !removed {
        return Err(fail(format_args!(
            "project {} is not configured",
            ctx.scopes().get(root).dir
        )));
    }

    // Drop the build directory as well if nothing else lives there.
    let _ = fs::remove_dir(path.directory().as_std_path());

    println!("disfigured {}", ctx.scopes().get(root).dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::DirPath;
    use crate::scope::RootExtra;

    fn project() -> (tempfile::TempDir, std::sync::Arc<Context>, ScopeId) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DirPath::new(tmp.path().to_str().unwrap());
        let ctx = Context::for_tests();
        let root = ctx.scopes_mut().insert(dir.clone());
        ctx.scopes_mut().get_mut(root).root = Some(RootExtra {
            project: None,
            src_root: dir.clone(),
            out_root: dir,
        });
        (tmp, ctx, root)
    }

    #[test]
    fn configure_round_trip() {
        let (tmp, ctx, root) = project();

        ctx.scopes_mut()
            .get_mut(root)
            .assign("config.cxx", Value::String("clang++".into()));
        ctx.scopes_mut()
            .get_mut(root)
            .assign("unrelated", Value::String("kept-out".into()));

        save(&ctx, root).unwrap();
        assert!(tmp.path().join("build/config.yaml").exists());

        // A fresh context picks the persisted value back up.
        let ctx2 = Context::for_tests();
        let dir = DirPath::new(tmp.path().to_str().unwrap());
        let root2 = ctx2.scopes_mut().insert(dir.clone());
        ctx2.scopes_mut().get_mut(root2).root = Some(RootExtra {
            project: None,
            src_root: dir.clone(),
            out_root: dir,
        });

        load_saved(&ctx2, root2).unwrap();
        let scopes = ctx2.scopes();
        assert_eq!(
            scopes.find_var(root2, "config.cxx").and_then(Value::as_str),
            Some("clang++")
        );
        assert_eq!(scopes.find_var(root2, "unrelated"), None);
    }

    #[test]
    fn disfigure_removes_and_errors_when_absent() {
        let (tmp, ctx, root) = project();

        save(&ctx, root).unwrap();
        remove(&ctx, root).unwrap();
        assert!(!tmp.path().join("build/config.yaml").exists());

        assert!(remove(&ctx, root).is_err());
    }
}
