// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Named modules: the unit of target-type and rule registration.
//!
//! A module initializer runs once per scope (tracked in the scope's loaded
//! set) and registers whatever the module provides. The engine ships the
//! `core` module; language front-ends register their own.

use std::sync::Arc;

use crate::action::PERFORM;
use crate::context::{Context, ModuleInit};
use crate::diag::{Failed, fail};
use crate::rule::AliasRule;
use crate::scope::ScopeId;
use crate::target::types;
use crate::lock;

/// Register a module for later loading. Registration is additive; a
/// duplicate name keeps the first initializer.
pub fn register(ctx: &Context, name: impl Into<String>, init: ModuleInit) {
    lock(&ctx.modules).entry(name.into()).or_insert(init);
}

/// Load `name` into `scope`, running its initializer unless already loaded
/// there.
pub fn load(ctx: &Context, scope: ScopeId, name: &str) -> Result<(), Failed> {
    if ctx.scopes().get(scope).has_module(name) {
        return Ok(());
    }

    let init = lock(&ctx.modules)
        .get(name)
        .copied()
        .ok_or_else(|| fail(format_args!("unknown module {name}")))?;

    init(ctx, scope)?;
    ctx.scopes_mut().get_mut(scope).add_module(name);
    tracing::debug!(module = name, "loaded module");
    Ok(())
}

/// The `core` module: builtin target types and the alias rule for any
/// operation under perform.
pub fn core_init(ctx: &Context, scope: ScopeId) -> Result<(), Failed> {
    let mut scopes = ctx.scopes_mut();
    let s = scopes.get_mut(scope);

    for tt in types::BUILTIN {
        s.register_target_type(tt);
    }

    s.rules
        .insert(PERFORM, crate::action::DEFAULT, &types::ALIAS, "alias", Arc::new(AliasRule));

    Ok(())
}

/// Register the modules every build starts from.
pub fn register_builtin(ctx: &Context) {
    register(ctx, "core", core_init);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_runs_initializer_once() {
        let ctx = Context::for_tests();
        register_builtin(&ctx);

        let root = ctx.scopes_mut().insert(crate::path::DirPath::new("/p"));
        load(&ctx, root, "core").unwrap();
        assert!(ctx.scopes().get(root).has_module("core"));
        assert!(ctx.scopes().find_target_type(root, "exe").is_some());

        // Loading again is a no-op.
        load(&ctx, root, "core").unwrap();
    }

    #[test]
    fn unknown_module_is_diagnosed() {
        let ctx = Context::for_tests();
        let root = ctx.scopes_mut().insert(crate::path::DirPath::new("/p"));
        assert!(load(&ctx, root, "cxx").is_err());
    }
}
