// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The rule interface and the builtin fallback rules.
//!
//! A rule is a matcher plus a recipe factory, registered in the rule map
//! for an action and target type. `matches` may stash opaque data on the
//! target's operation state for `apply` to pick up.

use crate::action::Action;
use crate::context::Context;
use crate::diag::Failed;
use crate::recipe::Recipe;
use crate::target::{Target, types};

pub trait Rule: Send + Sync {
    /// Can this rule build the target for this action? Returning false
    /// declines without prejudice and the next candidate is consulted.
    fn matches(&self, ctx: &Context, action: Action, target: &Target, hint: &str)
    -> Result<bool, Failed>;

    /// Produce the recipe for a target this rule matched. May resolve and
    /// inject additional prerequisites before they are matched.
    fn apply(&self, ctx: &Context, action: Action, target: &Target) -> Result<Recipe, Failed>;
}

/// Fallback for file targets that already exist on disk (typically source
/// files): nothing to do, but the timestamp is loaded so that dependents
/// can compare against it.
pub struct FileRule;

impl Rule for FileRule {
    fn matches(&self, _: &Context, _: Action, target: &Target, _: &str) -> Result<bool, Failed> {
        if !target.typ.is_a(&types::FILE) {
            return Ok(false);
        }

        if target.path().is_none() {
            target.derive_path()?;
        }

        let mtime = target
            .load_mtime()
            .map_err(|e| crate::diag::fail(format_args!("cannot stat {target}: {e}")))?;

        Ok(mtime.exists())
    }

    fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
        Ok(Recipe::Noop)
    }
}

/// Fallback for aliases and directories: execute prerequisites only.
pub struct AliasRule;

impl Rule for AliasRule {
    fn matches(&self, _: &Context, _: Action, target: &Target, _: &str) -> Result<bool, Failed> {
        Ok(target.typ.is_a(&types::ALIAS))
    }

    fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
        Ok(Recipe::Default)
    }
}

/// Fallback for targets with no file system presence and no registered
/// rule: there is nothing to do.
pub struct NoopRule;

impl Rule for NoopRule {
    fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
        Ok(true)
    }

    fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
        Ok(Recipe::Noop)
    }
}
