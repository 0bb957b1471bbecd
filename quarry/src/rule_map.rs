// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The four-level rule registry.
//!
//! Level 1 is a linked chain of per-meta-operation maps whose statically
//! present head is perform (most rules register there). Level 2 is indexed
//! by operation id with entry 0 acting as the wildcard. Level 3 keys on the
//! target type, level 4 on the dotted registration hint, ordered, with
//! registration order preserved among equal hints.
//!
//! Registration is additive; the map is frozen once matching starts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::action::{MetaOperationId, OperationId, PERFORM};
use crate::rule::Rule;
use crate::target::TargetType;

/// Does a registered hint fall under the requested one?
///
/// An empty request matches everything; otherwise the request must equal
/// the registered hint or be a dot-separated prefix of it (`cxx` matches
/// `cxx.compile`).
fn hint_matches(requested: &str, registered: &str) -> bool {
    if requested.is_empty() {
        return true;
    }
    match registered.strip_prefix(requested) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

#[derive(Default)]
pub struct HintRuleMap {
    entries: BTreeMap<String, Vec<Arc<dyn Rule>>>,
}

impl HintRuleMap {
    fn insert(&mut self, hint: &str, rule: Arc<dyn Rule>) {
        self.entries.entry(hint.to_owned()).or_default().push(rule);
    }

    /// Candidate rules for `hint`, in hint order then registration order.
    pub fn matching<'a>(
        &'a self,
        hint: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Arc<dyn Rule>)> + 'a {
        self.entries
            .iter()
            .filter(move |(registered, _)| hint_matches(hint, registered))
            .flat_map(|(registered, rules)| rules.iter().map(move |r| (registered.as_str(), r)))
    }
}

pub type TargetTypeRuleMap = HashMap<usize, HintRuleMap>;

/// Operation-indexed map; entry 0 is the wildcard.
#[derive(Default)]
pub struct OperationRuleMap {
    map: Vec<TargetTypeRuleMap>,
}

impl OperationRuleMap {
    fn insert(&mut self, oid: OperationId, tt: &'static TargetType, hint: &str, rule: Arc<dyn Rule>) {
        let oid = usize::from(oid);
        if oid >= self.map.len() {
            self.map.resize_with(oid + 1, TargetTypeRuleMap::default);
        }
        self.map[oid].entry(tt.ptr_id()).or_default().insert(hint, rule);
    }

    pub fn lookup(&self, oid: OperationId) -> Option<&TargetTypeRuleMap> {
        self.map.get(usize::from(oid))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Linked chain of per-meta-operation maps headed by perform.
pub struct RuleMap {
    mid: MetaOperationId,
    map: OperationRuleMap,
    next: Option<Box<RuleMap>>,
}

impl Default for RuleMap {
    fn default() -> Self {
        Self {
            mid: PERFORM,
            map: OperationRuleMap::default(),
            next: None,
        }
    }
}

impl RuleMap {
    pub fn insert(
        &mut self,
        mid: MetaOperationId,
        oid: OperationId,
        tt: &'static TargetType,
        hint: &str,
        rule: Arc<dyn Rule>,
    ) {
        if self.mid == mid {
            self.map.insert(oid, tt, hint, rule);
        } else {
            self.next
                .get_or_insert_with(|| {
                    Box::new(RuleMap {
                        mid,
                        map: OperationRuleMap::default(),
                        next: None,
                    })
                })
                .insert(mid, oid, tt, hint, rule);
        }
    }

    pub fn lookup(&self, mid: MetaOperationId) -> Option<&OperationRuleMap> {
        if self.mid == mid {
            Some(&self.map)
        } else {
            self.next.as_ref().and_then(|n| n.lookup(mid))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.next.is_none()
    }
}
