// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Actions and the meta-operation / operation descriptor tables.
//!
//! An action is a packed `(meta-operation, operation)` pair. Meta-operations
//! select the top-level mode (perform, configure, ...); operations select
//! the verb (update, clean, ...). Operation id 0 is the wildcard used by the
//! rule map.

use std::fmt;

pub type MetaOperationId = u8;
pub type OperationId = u8;

pub const PERFORM: MetaOperationId = 1;
pub const CONFIGURE: MetaOperationId = 2;
pub const DISFIGURE: MetaOperationId = 3;
pub const DIST: MetaOperationId = 4;
pub const INFO: MetaOperationId = 5;

/// Wildcard operation id in the rule map.
pub const DEFAULT: OperationId = 0;
pub const UPDATE: OperationId = 1;
pub const CLEAN: OperationId = 2;
pub const TEST: OperationId = 3;
pub const INSTALL: OperationId = 4;
pub const UNINSTALL: OperationId = 5;

/// Packed 16-bit `(meta-operation, operation)` pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action(u16);

impl Action {
    pub fn new(meta: MetaOperationId, op: OperationId) -> Self {
        Self((u16::from(meta) << 8) | u16::from(op))
    }

    pub fn meta(self) -> MetaOperationId {
        (self.0 >> 8) as MetaOperationId
    }

    pub fn operation(self) -> OperationId {
        (self.0 & 0xff) as OperationId
    }

    pub fn with_operation(self, op: OperationId) -> Self {
        Self::new(self.meta(), op)
    }

    /// The inner action of an outer/inner pair (`install` updates), if the
    /// operation declares one.
    pub fn inner(self) -> Option<Self> {
        operation(self.operation())
            .and_then(|info| info.inner)
            .map(|op| self.with_operation(op))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = meta_operation(self.meta()).map_or("?", |m| m.name);
        let op = operation(self.operation()).map_or("?", |o| o.name);
        write!(f, "{meta}({op})")
    }
}

/// Order in which prerequisites are executed relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    /// Prerequisites before the target (update).
    First,
    /// Target before prerequisites (clean).
    Last,
}

#[derive(Debug)]
pub struct OperationInfo {
    pub id: OperationId,
    pub name: &'static str,
    /// Verb forms for diagnostics: "update", "updating", "updated".
    pub doing: &'static str,
    pub done: &'static str,
    pub mode: ExecutionMode,
    pub inner: Option<OperationId>,
}

#[derive(Debug)]
pub struct MetaOperationInfo {
    pub id: MetaOperationId,
    pub name: &'static str,
}

pub static OPERATIONS: &[OperationInfo] = &[
    OperationInfo {
        id: UPDATE,
        name: "update",
        doing: "updating",
        done: "updated",
        mode: ExecutionMode::First,
        inner: None,
    },
    OperationInfo {
        id: CLEAN,
        name: "clean",
        doing: "cleaning",
        done: "cleaned",
        mode: ExecutionMode::Last,
        inner: None,
    },
    OperationInfo {
        id: TEST,
        name: "test",
        doing: "testing",
        done: "tested",
        mode: ExecutionMode::First,
        inner: Some(UPDATE),
    },
    OperationInfo {
        id: INSTALL,
        name: "install",
        doing: "installing",
        done: "installed",
        mode: ExecutionMode::First,
        inner: Some(UPDATE),
    },
    OperationInfo {
        id: UNINSTALL,
        name: "uninstall",
        doing: "uninstalling",
        done: "uninstalled",
        mode: ExecutionMode::Last,
        inner: None,
    },
];

pub static META_OPERATIONS: &[MetaOperationInfo] = &[
    MetaOperationInfo {
        id: PERFORM,
        name: "perform",
    },
    MetaOperationInfo {
        id: CONFIGURE,
        name: "configure",
    },
    MetaOperationInfo {
        id: DISFIGURE,
        name: "disfigure",
    },
    MetaOperationInfo { id: DIST, name: "dist" },
    MetaOperationInfo { id: INFO, name: "info" },
];

pub fn operation(id: OperationId) -> Option<&'static OperationInfo> {
    OPERATIONS.iter().find(|o| o.id == id)
}

pub fn operation_by_name(name: &str) -> Option<&'static OperationInfo> {
    OPERATIONS.iter().find(|o| o.name == name)
}

pub fn meta_operation(id: MetaOperationId) -> Option<&'static MetaOperationInfo> {
    META_OPERATIONS.iter().find(|m| m.id == id)
}

pub fn meta_operation_by_name(name: &str) -> Option<&'static MetaOperationInfo> {
    META_OPERATIONS.iter().find(|m| m.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing() {
        let a = Action::new(PERFORM, UPDATE);
        assert_eq!(a.meta(), PERFORM);
        assert_eq!(a.operation(), UPDATE);
        assert_eq!(a.with_operation(CLEAN).operation(), CLEAN);
    }

    #[test]
    fn inner_actions() {
        assert_eq!(
            Action::new(PERFORM, INSTALL).inner(),
            Some(Action::new(PERFORM, UPDATE))
        );
        assert_eq!(Action::new(PERFORM, UPDATE).inner(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Action::new(PERFORM, UPDATE).to_string(), "perform(update)");
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(operation_by_name("clean").map(|o| o.id), Some(CLEAN));
        assert_eq!(meta_operation_by_name("info").map(|m| m.id), Some(INFO));
        assert!(operation_by_name("frobnicate").is_none());
    }
}
