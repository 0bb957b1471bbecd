// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Targets, target types and the concurrent target set.
//!
//! A target is a node in the dependency graph identified by
//! `(type, dir, out-dir, name, extension)`. Targets are created on demand
//! during loading or prerequisite search and live for the context's
//! lifetime in an arena; cross-references (group membership, resolved
//! prerequisites) are arena indices.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock};

use crate::action::Action;
use crate::diag::{Failed, fail};
use crate::filesystem::{self, TIMESTAMP_UNKNOWN, Timestamp};
use crate::path::{DirPath, Path};
use crate::prerequisite::Prerequisite;
use crate::recipe::Recipe;
use crate::scope::Scope;
use crate::{lock, read, write};

pub mod types;

/// Per-action progress of a target.
///
/// The discriminants are ordered so that the merge operator keeps the
/// "stronger" of two states; in particular `failed` overrides `postponed`
/// and `postponed` overrides `unchanged` (it may yet become `changed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum TargetState {
    Unknown = 0,
    Unchanged = 1,
    Postponed = 2,
    Busy = 3,
    Changed = 4,
    Failed = 5,
    /// The target's state is its group's state.
    Group = 6,
}

impl TargetState {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TargetState::Unknown,
            1 => TargetState::Unchanged,
            2 => TargetState::Postponed,
            3 => TargetState::Busy,
            4 => TargetState::Changed,
            5 => TargetState::Failed,
            _ => TargetState::Group,
        }
    }

    /// Merge, keeping the stronger state.
    pub fn merge(self, other: TargetState) -> TargetState {
        if other > self { other } else { self }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TargetState::Unknown | TargetState::Busy)
    }
}

impl std::ops::BitOrAssign for TargetState {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

/// What a target instance carries besides its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Plain,
    Mtime,
    Path,
}

/// How a prerequisite key locates or creates an instance of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    /// Create the target; its existence is the rule's business.
    Create,
    /// Create the target and bind it to the file system entry in its
    /// directory, recording the current mtime.
    File,
}

/// A category of targets.
///
/// Types form a single-inheritance chain rooted at the abstract `target`
/// type; identity is pointer identity, so instances must be `'static`.
pub struct TargetType {
    pub name: &'static str,
    pub base: Option<&'static TargetType>,
    pub payload: PayloadKind,
    /// Extension fixed by the type; empty string means "no extension".
    pub fixed_extension: Option<&'static str>,
    /// Derive a default extension from the key and scope when none is
    /// specified (used by source file types configured per project).
    pub default_extension: Option<fn(&TargetKey, &Scope) -> Option<String>>,
    /// Name validity check applied when the front-end declares targets of
    /// this type.
    pub pattern: Option<fn(&str) -> bool>,
    /// Iteration descends into members.
    pub see_through: bool,
    pub search: Search,
}

impl TargetType {
    pub fn is_a(&'static self, tt: &'static TargetType) -> bool {
        let mut t = self;
        loop {
            if std::ptr::eq(t, tt) {
                return true;
            }
            match t.base {
                Some(base) => t = base,
                None => return false,
            }
        }
    }

    /// Walk the base chain starting from this type.
    pub fn ancestry(&'static self) -> impl Iterator<Item = &'static TargetType> {
        std::iter::successors(Some(self), |t| t.base)
    }

    /// Stable identity for keying rule and variable maps.
    pub fn ptr_id(&'static self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for TargetType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for TargetType {}

/// Owned target key.
///
/// The extension participates specially in equality: unless the type fixes
/// it, an unspecified extension compares equal to any specified one. The
/// hash therefore ignores the extension.
#[derive(Debug, Clone)]
pub struct TargetKey {
    pub typ: &'static TargetType,
    pub dir: DirPath,
    pub out: DirPath,
    pub name: String,
    pub ext: Option<String>,
}

impl PartialEq for TargetKey {
    fn eq(&self, other: &Self) -> bool {
        if !std::ptr::eq(self.typ, other.typ)
            || self.dir != other.dir
            || self.out != other.out
            || self.name != other.name
        {
            return false;
        }

        match self.typ.fixed_extension {
            None => match (&self.ext, &other.ext) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            },
            Some(fixed) => {
                self.ext.as_deref().unwrap_or(fixed) == other.ext.as_deref().unwrap_or(fixed)
            }
        }
    }
}

impl Eq for TargetKey {}

impl Hash for TargetKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (std::ptr::from_ref(self.typ) as usize).hash(state);
        self.dir.hash(state);
        self.out.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{{{}", self.dir, self.typ.name, self.name)?;
        if let Some(ext) = self.ext.as_deref().filter(|e| !e.is_empty()) {
            write!(f, ".{ext}")?;
        }
        write!(f, "}}")?;
        if !self.out.is_empty() {
            write!(f, "@{}", self.out)?;
        }
        Ok(())
    }
}

/// Type-specific payload, constructed by the target type's factory.
#[derive(Debug)]
pub enum Payload {
    Plain,
    Mtime {
        mtime: AtomicU64,
    },
    Path {
        path: OnceLock<Path>,
        mtime: AtomicU64,
    },
}

impl Payload {
    fn new(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Plain => Payload::Plain,
            PayloadKind::Mtime => Payload::Mtime {
                mtime: AtomicU64::new(TIMESTAMP_UNKNOWN),
            },
            PayloadKind::Path => Payload::Path {
                path: OnceLock::new(),
                mtime: AtomicU64::new(TIMESTAMP_UNKNOWN),
            },
        }
    }

    fn mtime_cell(&self) -> Option<&AtomicU64> {
        match self {
            Payload::Plain => None,
            Payload::Mtime { mtime } | Payload::Path { mtime, .. } => Some(mtime),
        }
    }
}

/// Index of a target in the context's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub usize);

/// Rule binding and recipe slot for the current action.
#[derive(Default)]
pub struct OpState {
    /// Action this slot was matched for, once match completes.
    pub matched: Option<Action>,
    /// A thread is currently inside match for this target.
    pub matching: bool,
    /// Hint of the bound rule, for diagnostics.
    pub rule_hint: Option<String>,
    pub recipe: Option<Recipe>,
    /// Opaque data the bound rule passed from match to apply.
    pub match_data: Option<Box<dyn Any + Send>>,
    /// Prerequisites resolved during match, in declaration order.
    pub prerequisite_targets: Vec<TargetId>,
}

pub struct Target {
    pub typ: &'static TargetType,
    pub dir: DirPath,
    pub out: DirPath,
    pub name: String,
    ext: Mutex<Option<String>>,
    payload: Payload,
    prerequisites: RwLock<Vec<Prerequisite>>,
    group: OnceLock<TargetId>,
    members: Mutex<Vec<TargetId>>,
    state: AtomicU8,
    opstate: Mutex<OpState>,
}

impl Target {
    fn new(
        typ: &'static TargetType,
        dir: DirPath,
        out: DirPath,
        name: String,
        ext: Option<String>,
    ) -> Self {
        Self {
            payload: Payload::new(typ.payload),
            typ,
            dir,
            out,
            name,
            ext: Mutex::new(ext),
            prerequisites: RwLock::new(Vec::new()),
            group: OnceLock::new(),
            members: Mutex::new(Vec::new()),
            state: AtomicU8::new(TargetState::Unknown as u8),
            opstate: Mutex::new(OpState::default()),
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            typ: self.typ,
            dir: self.dir.clone(),
            out: self.out.clone(),
            name: self.name.clone(),
            ext: self.ext(),
        }
    }

    pub fn ext(&self) -> Option<String> {
        lock(&self.ext).clone()
    }

    /// Assign the extension if it is still unspecified.
    pub fn fix_ext(&self, ext: &str) {
        let mut slot = lock(&self.ext);
        if slot.is_none() {
            *slot = Some(ext.to_owned());
        }
    }

    /// Extension for path derivation: specified, else fixed by type.
    pub fn effective_ext(&self) -> Option<String> {
        self.ext()
            .or_else(|| self.typ.fixed_extension.map(str::to_owned))
    }

    /// The directory the target is built in: out if set, else src.
    pub fn base_dir(&self) -> &DirPath {
        if self.out.is_empty() { &self.dir } else { &self.out }
    }

    pub fn state(&self) -> TargetState {
        TargetState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Attempt the `unknown -> busy` transition; the winner executes.
    pub fn try_busy(&self) -> bool {
        self.state
            .compare_exchange(
                TargetState::Unknown as u8,
                TargetState::Busy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn store_state(&self, state: TargetState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Reset per-action progress; only called between operations with no
    /// build activity in flight. The cached mtime is dropped so that the
    /// next operation re-queries the filesystem.
    pub fn reset(&self) {
        self.store_state(TargetState::Unknown);
        if let Some(cell) = self.payload.mtime_cell() {
            cell.store(TIMESTAMP_UNKNOWN, Ordering::Release);
        }
        *self.opstate() = OpState::default();
    }

    pub fn opstate(&self) -> std::sync::MutexGuard<'_, OpState> {
        lock(&self.opstate)
    }

    pub fn add_prerequisite(&self, p: Prerequisite) {
        write(&self.prerequisites).push(p);
    }

    pub fn prerequisites(&self) -> Vec<Prerequisite> {
        read(&self.prerequisites).clone()
    }

    pub fn group(&self) -> Option<TargetId> {
        self.group.get().copied()
    }

    /// Record bidirectional group membership. The first group wins.
    pub fn join_group(&self, group_id: TargetId, group: &Target, self_id: TargetId) {
        if self.group.set(group_id).is_ok() {
            lock(&group.members).push(self_id);
        }
    }

    pub fn members(&self) -> Vec<TargetId> {
        lock(&self.members).clone()
    }

    /// Cached mtime, if this target carries one and it has been loaded.
    pub fn mtime(&self) -> Option<Timestamp> {
        self.payload
            .mtime_cell()
            .and_then(|cell| Timestamp::decode(cell.load(Ordering::Acquire)))
    }

    pub fn set_mtime(&self, ts: Timestamp) {
        if let Some(cell) = self.payload.mtime_cell() {
            cell.store(ts.encode(), Ordering::Release);
        }
    }

    /// Mtime, querying the filesystem on first use for path targets.
    pub fn load_mtime(&self) -> io::Result<Timestamp> {
        if let Some(ts) = self.mtime() {
            return Ok(ts);
        }
        let ts = match self.path() {
            Some(path) => filesystem::mtime(path.as_std_path())?,
            None => Timestamp::Nonexistent,
        };
        self.set_mtime(ts);
        Ok(ts)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Path { path, .. } => path.get(),
            _ => None,
        }
    }

    /// Assign the filesystem path; the first assignment wins.
    ///
    /// A type whose payload carries no path (a module can register one
    /// anywhere in the hierarchy) is a diagnosed error, not a panic.
    pub fn set_path(&self, path: Path) -> Result<&Path, Failed> {
        match &self.payload {
            Payload::Path { path: cell, .. } => Ok(cell.get_or_init(|| path)),
            _ => Err(fail(format_args!(
                "target {self} of type {} carries no path",
                self.typ.name
            ))),
        }
    }

    /// Derive and assign the default path `dir/name[.ext]`.
    pub fn derive_path(&self) -> Result<&Path, Failed> {
        let mut leaf = self.name.clone();
        if let Some(ext) = self.effective_ext().filter(|e| !e.is_empty()) {
            leaf.push('.');
            leaf.push_str(&ext);
        }
        let path = self.base_dir().join(leaf);
        self.set_path(path)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

const WAIT_SLOTS: usize = 64;

struct WaitSlot {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    map: HashMap<TargetKey, TargetId>,
    arena: Vec<Arc<Target>>,
}

/// Concurrent map from target key to owned target instance.
///
/// `insert` is an atomic get-or-create and is safe to call from multiple
/// threads during the match phase. Waiting for a busy target parks on one
/// of a fixed array of wait slots selected by target id.
pub struct TargetSet {
    inner: RwLock<Inner>,
    slots: Vec<WaitSlot>,
    collisions: AtomicU64,
}

impl Default for TargetSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            slots: (0..WAIT_SLOTS)
                .map(|_| WaitSlot {
                    lock: Mutex::new(()),
                    cond: Condvar::new(),
                    waiters: AtomicUsize::new(0),
                })
                .collect(),
            collisions: AtomicU64::new(0),
        }
    }

    pub fn find(&self, key: &TargetKey) -> Option<(TargetId, Arc<Target>)> {
        let inner = read(&self.inner);
        inner
            .map
            .get(key)
            .map(|&id| (id, Arc::clone(&inner.arena[id.0])))
    }

    /// Atomic get-or-create. A specified extension on a duplicate key fixes
    /// a previously unspecified one.
    pub fn insert(
        &self,
        typ: &'static TargetType,
        dir: DirPath,
        out: DirPath,
        name: String,
        ext: Option<String>,
    ) -> (TargetId, Arc<Target>, bool) {
        let key = TargetKey {
            typ,
            dir,
            out,
            name,
            ext,
        };

        let mut inner = write(&self.inner);
        if let Some(&id) = inner.map.get(&key) {
            let target = Arc::clone(&inner.arena[id.0]);
            drop(inner);
            if let Some(ext) = &key.ext {
                target.fix_ext(ext);
            }
            return (id, target, false);
        }

        let id = TargetId(inner.arena.len());
        let target = Arc::new(Target::new(key.typ, key.dir.clone(), key.out.clone(), key.name.clone(), key.ext.clone()));
        inner.arena.push(Arc::clone(&target));
        inner.map.insert(key, id);
        (id, target, true)
    }

    pub fn get(&self, id: TargetId) -> Arc<Target> {
        Arc::clone(&read(&self.inner).arena[id.0])
    }

    pub fn len(&self) -> usize {
        read(&self.inner).arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot for iteration; permitted only outside match/execute.
    pub fn snapshot(&self) -> Vec<(TargetId, Arc<Target>)> {
        read(&self.inner)
            .arena
            .iter()
            .enumerate()
            .map(|(i, t)| (TargetId(i), Arc::clone(t)))
            .collect()
    }

    /// Publish a state transition and wake anyone waiting on the target.
    pub fn publish(&self, id: TargetId, target: &Target, state: TargetState) {
        target.store_state(state);
        let slot = &self.slots[id.0 % WAIT_SLOTS];
        let _guard = lock(&slot.lock);
        slot.cond.notify_all();
    }

    /// Park until the target leaves `busy`, helping account the wait-queue
    /// collision statistic.
    pub fn wait_not_busy(&self, id: TargetId, target: &Target) -> TargetState {
        let slot = &self.slots[id.0 % WAIT_SLOTS];
        if slot.waiters.fetch_add(1, Ordering::AcqRel) > 0 {
            self.collisions.fetch_add(1, Ordering::Relaxed);
        }

        let mut state = target.state();
        while state == TargetState::Busy {
            let guard = lock(&slot.lock);
            state = target.state();
            if state == TargetState::Busy {
                let _ = slot
                    .cond
                    .wait_timeout(guard, std::time::Duration::from_millis(1))
                    .unwrap_or_else(|e| e.into_inner());
                state = target.state();
            }
        }

        slot.waiters.fetch_sub(1, Ordering::AcqRel);
        state
    }

    pub fn collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }
}
