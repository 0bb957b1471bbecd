// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Build engine core: a declarative project description is turned into a
//! directed acyclic graph of targets, rules are bound to targets in a match
//! phase, and recipes are executed over the matched graph in parallel with
//! persistent per-target state driving incremental rebuilds.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use self::action::{Action, ExecutionMode, MetaOperationId, OperationId};
pub use self::context::{Context, Phase};
pub use self::diag::Failed;
pub use self::path::{DirPath, Path};
pub use self::recipe::Recipe;
pub use self::target::{Target, TargetId, TargetState};

pub mod action;
pub mod algorithm;
pub mod buildspec;
pub mod cli;
pub mod config;
pub mod configure;
pub mod context;
pub mod depdb;
pub mod diag;
pub mod dump;
pub mod filecache;
pub mod filesystem;
pub mod loader;
pub mod lockfile;
pub mod module;
pub mod name;
pub mod operation;
pub mod path;
pub mod prerequisite;
pub mod recipe;
pub mod rule;
pub mod rule_map;
pub mod scope;
pub mod target;
pub mod variable;

/// Mutex lock recovering from poisoning. A recipe that panics on a worker
/// thread must not wedge every other thread touching the same target.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
