// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The per-build context.
//!
//! Owns the scope tree, the target set, the scheduler, the file cache and
//! the phase word. There is no process-global mutable state: everything a
//! rule or recipe needs hangs off the context.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sched::Scheduler;

use crate::diag::Failed;
use crate::filecache::FileCache;
use crate::scope::{ScopeId, ScopeMap};
use crate::target::{TargetId, TargetSet};
use crate::{lock, read, write};

/// Global build phase.
///
/// Transitions are explicit and draining: the scheduler must report all
/// outstanding tasks of the outgoing phase complete before the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Load,
    Match,
    Execute,
}

/// A module initializer: registers target types and rules into a scope.
pub type ModuleInit = fn(&Context, ScopeId) -> Result<(), Failed>;

pub struct Context {
    scopes: RwLock<ScopeMap>,
    pub targets: TargetSet,
    pub sched: Scheduler,
    pub cache: FileCache,
    phase: Mutex<Phase>,
    /// Continue executing independent sub-graphs after a failure.
    pub keep_going: bool,
    postponed: Mutex<Vec<TargetId>>,
    /// A target failed during the current operation; when not keep-going,
    /// no new work is dispatched once this is set.
    failed: AtomicBool,
    pub(crate) modules: Mutex<HashMap<String, ModuleInit>>,
}

impl Context {
    pub fn new(jobs: usize, keep_going: bool, compress_cache: bool) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            scopes: RwLock::new(ScopeMap::new()),
            targets: TargetSet::new(),
            sched: Scheduler::new(jobs)?,
            cache: FileCache::new(compress_cache),
            phase: Mutex::new(Phase::Load),
            keep_going,
            postponed: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
            modules: Mutex::new(HashMap::new()),
        }))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        Self::new(2, false, false).expect("test context")
    }

    pub fn scopes(&self) -> RwLockReadGuard<'_, ScopeMap> {
        read(&self.scopes)
    }

    pub fn scopes_mut(&self) -> RwLockWriteGuard<'_, ScopeMap> {
        write(&self.scopes)
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    /// Switch phases, draining the scheduler first.
    pub fn switch_phase(&self, to: Phase) {
        self.sched.drain();
        let mut phase = lock(&self.phase);
        if *phase != to {
            tracing::debug!(from = %phase, to = %to, "phase switch");
            *phase = to;
        }
    }

    /// Record a target whose recipe returned postponed, for the final
    /// single-threaded re-examination pass.
    pub fn postpone(&self, id: TargetId) {
        lock(&self.postponed).push(id);
    }

    pub fn take_postponed(&self) -> Vec<TargetId> {
        std::mem::take(&mut *lock(&self.postponed))
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Clear per-operation progress; called by the driver between
    /// operations with no build activity in flight.
    pub fn reset_operation(&self) {
        self.failed.store(false, Ordering::Release);
        lock(&self.postponed).clear();
        for (_, target) in self.targets.snapshot() {
            target.reset();
        }
    }

    /// Tear down the scheduler, returning its statistics.
    pub fn shutdown(self) -> sched::Stats {
        self.sched.shutdown()
    }
}
