// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The build spec: what the driver was asked to do.
//!
//! An ordered list of meta-operation entries, each holding operation
//! entries, each holding target names. The command line form is a sequence
//! of words where a meta-operation or operation name opens a new entry and
//! anything else is a target of the most recent operation. An operation
//! with no targets means the whole project; the driver substitutes the
//! root directory target.

use crate::action::{self, MetaOperationId, OperationId, PERFORM, UPDATE};
use crate::diag::{Failed, fail};
use crate::name::Name;

#[derive(Debug)]
pub struct OperationEntry {
    pub operation: OperationId,
    pub targets: Vec<Name>,
}

#[derive(Debug)]
pub struct MetaOperationEntry {
    pub meta: MetaOperationId,
    pub operations: Vec<OperationEntry>,
}

#[derive(Debug, Default)]
pub struct BuildSpec {
    pub entries: Vec<MetaOperationEntry>,
}

impl BuildSpec {
    /// Parse command line words into a spec.
    ///
    /// Missing pieces default: perform, update, the current directory.
    pub fn parse(words: &[String]) -> Result<Self, Failed> {
        let mut spec = BuildSpec::default();

        for word in words {
            if let Some(m) = action::meta_operation_by_name(word) {
                spec.entries.push(MetaOperationEntry {
                    meta: m.id,
                    operations: Vec::new(),
                });
                continue;
            }

            if let Some(o) = action::operation_by_name(word) {
                spec.meta_mut().operations.push(OperationEntry {
                    operation: o.id,
                    targets: Vec::new(),
                });
                continue;
            }

            let name = Name::parse(word)
                .map_err(|e| fail(format_args!("invalid target name {word:?}: {e}")))?;
            let meta = spec.meta_mut();
            match meta.operations.last_mut() {
                Some(op) => op.targets.push(name),
                None => meta.operations.push(OperationEntry {
                    operation: UPDATE,
                    targets: vec![name],
                }),
            }
        }

        if spec.entries.is_empty() {
            spec.entries.push(MetaOperationEntry {
                meta: PERFORM,
                operations: Vec::new(),
            });
        }

        for entry in &mut spec.entries {
            if entry.operations.is_empty() {
                entry.operations.push(OperationEntry {
                    operation: UPDATE,
                    targets: Vec::new(),
                });
            }
        }

        Ok(spec)
    }

    fn meta_mut(&mut self) -> &mut MetaOperationEntry {
        if self.entries.is_empty() {
            self.entries.push(MetaOperationEntry {
                meta: PERFORM,
                operations: Vec::new(),
            });
        }
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }
}
