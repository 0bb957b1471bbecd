// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Recipes: the callable installed on a target by a rule during match.

use std::fmt;

use crate::action::Action;
use crate::context::Context;
use crate::diag::Failed;
use crate::target::{Target, TargetState};

pub type RecipeFn =
    Box<dyn FnMut(&Context, Action, &Target) -> Result<TargetState, Failed> + Send>;

/// A move-only callable producing the target state, with sentinels the
/// engine special-cases without an indirect call.
pub enum Recipe {
    /// Do nothing; the target is unchanged.
    Noop,
    /// Execute prerequisites only; the target's state is their aggregate.
    Default,
    /// Delegate to the group's recipe; the state is the group's state.
    Group,
    /// Execute the inner action of an outer/inner pair.
    Inner,
    Custom(RecipeFn),
}

impl Recipe {
    pub fn custom(
        f: impl FnMut(&Context, Action, &Target) -> Result<TargetState, Failed> + Send + 'static,
    ) -> Self {
        Recipe::Custom(Box::new(f))
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recipe::Noop => "noop",
            Recipe::Default => "default",
            Recipe::Group => "group",
            Recipe::Inner => "inner",
            Recipe::Custom(_) => "custom",
        })
    }
}
