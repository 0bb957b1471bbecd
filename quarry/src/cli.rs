// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser};
use thiserror::Error;
use tracing_common::LogLevel;

use crate::buildspec::BuildSpec;
use crate::context::Context;
use crate::diag::Failed;
use crate::path::{DirPath, Path};
use crate::{config, loader, lockfile, module, operation};

#[derive(Debug, Parser)]
#[command(
    name = "quarry",
    about = "Parallel, incremental build engine",
    long_about = "Turns the project's buildfile into a dependency graph and performs the \
                  requested operations over it in parallel and incrementally"
)]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    /// Build spec: meta-operations, operations and targets, e.g.
    /// `update exe{hello}` or `clean`
    #[arg(value_name = "SPEC")]
    pub spec: Vec<String>,
}

#[derive(Debug, Args)]
pub struct Global {
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Prints additional information about what quarry is doing"
    )]
    pub verbose: u8,
    #[arg(long, global = true, help = "Log level: trace, debug, info, warn, error")]
    pub log: Option<LogLevel>,
    #[arg(short, long, global = true, help = "Number of worker threads")]
    pub jobs: Option<usize>,
    #[arg(
        short = 'k',
        long,
        global = true,
        default_value = "false",
        help = "Continue building independent sub-graphs after a failure"
    )]
    pub keep_going: bool,
    #[arg(short = 'C', long, global = true, help = "Project directory")]
    pub directory: Option<PathBuf>,
    #[arg(long, global = true, help = "Buildfile to load")]
    pub buildfile: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = "false",
        help = "Compress idle file-cache entries"
    )]
    pub compress_cache: bool,
}

pub fn process() -> Result<(), Error> {
    let Command { global, spec } = Command::parse();

    let level = match global.log {
        Some(LogLevel(level)) => level,
        None => tracing_common::verbosity(global.verbose),
    };
    tracing_common::init(level);

    let dir = match &global.directory {
        Some(d) => d.clone(),
        None => std::env::current_dir()?,
    };
    let dir = DirPath::new(dir.to_str().ok_or(Error::NonUtf8Path)?);

    let mut settings = config::load(&dir)?;
    if let Some(jobs) = global.jobs {
        settings.jobs = Some(jobs);
    }
    settings.keep_going |= global.keep_going;
    settings.compress_cache |= global.compress_cache;

    let _lock = lockfile::LockFile::acquire(&dir)?;

    let ctx = Context::new(
        settings.effective_jobs(),
        settings.keep_going,
        settings.compress_cache,
    )?;
    module::register_builtin(&ctx);

    let buildfile = match &global.buildfile {
        Some(p) => {
            let p = Path::new(p.to_str().ok_or(Error::NonUtf8Path)?);
            if p.is_absolute() {
                p
            } else {
                dir.join(p.as_str())
            }
        }
        None => dir.join("buildfile"),
    };

    let root = loader::load(&ctx, &buildfile, &dir, &dir)?;

    let spec = BuildSpec::parse(&spec)?;
    operation::run(&ctx, &spec, root)?;

    if let Some(ctx) = Arc::into_inner(ctx) {
        let stats = ctx.shutdown();
        tracing::debug!(
            max_active = stats.max_active,
            helpers = stats.helpers,
            queue_full = stats.queue_full,
            waits = stats.waits,
            "scheduler shut down"
        );
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] std::io::Error),
    #[error("path is not valid UTF-8")]
    NonUtf8Path,
    #[error("settings")]
    Config(#[from] config::Error),
    #[error("build failed")]
    Failed(#[from] Failed),
}
