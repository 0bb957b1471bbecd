// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Directory-keyed scopes and the scope tree.
//!
//! Every scope except the global root has a parent; the tree is kept
//! consistent with path prefix order, re-parenting existing descendants
//! when an intermediate scope is inserted. Variable lookup walks the chain
//! up to the global scope, consulting per-target-type overrides first.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::path::{DirPath, Path};
use crate::rule_map::RuleMap;
use crate::target::TargetType;
use crate::variable::{Value, VariableMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

/// Extra data carried by project root scopes.
#[derive(Debug, Clone)]
pub struct RootExtra {
    pub project: Option<String>,
    pub src_root: DirPath,
    pub out_root: DirPath,
}

pub struct Scope {
    pub dir: DirPath,
    pub parent: Option<ScopeId>,
    pub vars: VariableMap,
    /// Per-target-type variable overrides, keyed by type identity.
    target_vars: HashMap<(usize, String), Value>,
    pub rules: RuleMap,
    target_types: HashMap<&'static str, &'static TargetType>,
    modules: HashSet<String>,
    pub root: Option<RootExtra>,
}

impl Scope {
    fn new(dir: DirPath, parent: Option<ScopeId>) -> Self {
        Self {
            dir,
            parent,
            vars: VariableMap::new(),
            target_vars: HashMap::new(),
            rules: RuleMap::default(),
            target_types: HashMap::new(),
            modules: HashSet::new(),
            root: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }

    pub fn assign(&mut self, name: impl Into<String>, value: Value) {
        self.vars.assign(name, value);
    }

    pub fn assign_for_type(
        &mut self,
        tt: &'static TargetType,
        name: impl Into<String>,
        value: Value,
    ) {
        self.target_vars.insert((tt.ptr_id(), name.into()), value);
    }

    /// Target type registration is stable: the first binding wins.
    pub fn register_target_type(&mut self, tt: &'static TargetType) {
        self.target_types.entry(tt.name).or_insert(tt);
    }

    pub fn own_target_type(&self, name: &str) -> Option<&'static TargetType> {
        self.target_types.get(name).copied()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains(name)
    }

    pub fn add_module(&mut self, name: impl Into<String>) {
        self.modules.insert(name.into());
    }
}

/// The scope tree, keyed by absolute directory path.
pub struct ScopeMap {
    scopes: Vec<Scope>,
    by_dir: BTreeMap<DirPath, ScopeId>,
}

impl Default for ScopeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeMap {
    /// A new tree containing only the global scope at `/`.
    pub fn new() -> Self {
        let global = Scope::new(DirPath::new("/"), None);
        let mut by_dir = BTreeMap::new();
        by_dir.insert(global.dir.clone(), ScopeId(0));
        Self {
            scopes: vec![global],
            by_dir,
        }
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    /// Create or return the scope for `dir`, wiring up its parent and
    /// re-parenting any existing descendants.
    pub fn insert(&mut self, dir: DirPath) -> ScopeId {
        debug_assert!(dir.is_absolute());

        if let Some(&id) = self.by_dir.get(&dir) {
            return id;
        }

        let parent = self.find_dir(&dir.parent());
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope::new(dir.clone(), Some(parent)));
        self.by_dir.insert(dir.clone(), id);

        // Any scope under the new directory whose parent sits above it now
        // has a closer ancestor.
        let descendants: Vec<ScopeId> = self
            .by_dir
            .range(dir.clone()..)
            .take_while(|(d, _)| dir.contains(d))
            .filter(|&(_, &sid)| sid != id)
            .map(|(_, &sid)| sid)
            .collect();

        for sid in descendants {
            let reparent = match self.scopes[sid.0].parent {
                Some(p) => self.scopes[p.0].dir.as_str().len() < dir.as_str().len(),
                None => false,
            };
            if reparent {
                self.scopes[sid.0].parent = Some(id);
            }
        }

        id
    }

    /// The most-qualified scope containing `dir`.
    pub fn find_dir(&self, dir: &DirPath) -> ScopeId {
        let mut d = dir.clone();
        loop {
            if let Some(&id) = self.by_dir.get(&d) {
                return id;
            }
            if d.as_str() == "/" || d.is_empty() {
                return self.global();
            }
            d = d.parent();
        }
    }

    /// The most-qualified scope containing `path`.
    pub fn find(&self, path: &Path) -> ScopeId {
        self.find_dir(&path.directory())
    }

    /// Chain from `id` up to the global scope.
    pub fn chain(&self, id: ScopeId) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self.get(id)), |s| s.parent.map(|p| self.get(p)))
    }

    /// Innermost definition of `name` on the path to the root.
    pub fn find_var(&self, id: ScopeId, name: &str) -> Option<&Value> {
        self.chain(id).find_map(|s| s.vars.find(name))
    }

    /// Like [`find_var`](Self::find_var), honoring per-target-type
    /// overrides at each scope first.
    pub fn find_target_var(
        &self,
        id: ScopeId,
        tt: &'static TargetType,
        name: &str,
    ) -> Option<&Value> {
        self.chain(id).find_map(|s| {
            tt.ancestry()
                .find_map(|t| s.target_vars.get(&(t.ptr_id(), name.to_owned())))
                .or_else(|| s.vars.find(name))
        })
    }

    /// Resolve a target type name through the scope chain.
    pub fn find_target_type(&self, id: ScopeId, name: &str) -> Option<&'static TargetType> {
        self.chain(id).find_map(|s| s.own_target_type(name))
    }

    /// The project root scope containing `id`, if any.
    pub fn root_of(&self, id: ScopeId) -> Option<ScopeId> {
        let mut cur = Some(id);
        while let Some(sid) = cur {
            if self.get(sid).is_root() {
                return Some(sid);
            }
            cur = self.get(sid).parent;
        }
        None
    }

    /// Scopes we are a parent of, in path order (prefix iteration).
    pub fn descendants(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        let dir = self.get(id).dir.clone();
        self.by_dir
            .range(dir.clone()..)
            .take_while(move |(d, _)| dir.contains(d))
            .map(|(_, &sid)| sid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &Scope)> {
        self.by_dir.values().map(|&id| (id, self.get(id)))
    }
}
