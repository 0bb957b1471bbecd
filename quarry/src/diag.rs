// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! User diagnostics and the diagnosed-failure control flow signal.
//!
//! A condition that has already been reported to the user propagates as
//! [`Failed`], unwinding recipes and the engine to the driver boundary
//! without being reported a second time.

use std::fmt;

use thiserror::Error;

/// A failure that has already been diagnosed.
///
/// Carries no payload; the report happened at the point of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed")]
pub struct Failed;

/// Source position attached to configuration and semantic diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Report an error and return the control-flow signal.
pub fn fail(message: impl fmt::Display) -> Failed {
    tracing::error!("{message}");
    Failed
}

/// Report an error with a source location.
pub fn fail_at(location: &Location, message: impl fmt::Display) -> Failed {
    tracing::error!("{location}: {message}");
    Failed
}

/// Follow-up note explaining the context of a preceding error.
pub fn note(message: impl fmt::Display) {
    tracing::info!("{message}");
}

/// Report a warning; does not affect control flow.
pub fn warn(message: impl fmt::Display) {
    tracing::warn!("{message}");
}
