// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Tool settings: scheduler width, failure policy, cache compression.
//!
//! Loaded from `quarry.yaml` next to the buildfile when present; command
//! line flags override individual fields.

use std::io;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::DirPath;

pub const FILE_NAME: &str = "quarry.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker threads; defaults to the available parallelism.
    pub jobs: Option<usize>,
    /// Keep building independent sub-graphs after a failure.
    pub keep_going: bool,
    /// Compress idle file-cache entries.
    pub compress_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: None,
            keep_going: false,
            compress_cache: false,
        }
    }
}

impl Settings {
    pub fn effective_jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("read settings")]
    Io(#[from] io::Error),
    #[error("parse settings")]
    Yaml(#[from] serde_yaml::Error),
}

/// Settings for the project at `dir`; absent file means defaults.
pub fn load(dir: &DirPath) -> Result<Settings, Error> {
    let path = dir.join(FILE_NAME);
    match fs::read(path.as_std_path()) {
        Ok(bytes) => Ok(serde_yaml::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}
