// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The meta-operation driver: turns a build spec into phased match and
//! execute walks and reports the outcome.

use std::sync::Arc;

use crate::action::{self, Action, CONFIGURE, DISFIGURE, DIST, INFO, PERFORM};
use crate::algorithm;
use crate::buildspec::BuildSpec;
use crate::context::{Context, Phase};
use crate::diag::{Failed, fail};
use crate::name::Name;
use crate::prerequisite::{self, Prerequisite};
use crate::scope::ScopeId;
use crate::target::{TargetId, TargetState};
use crate::{configure, dump};

/// Outcome of one operation over its top-level targets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl Summary {
    pub fn ok(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, state: TargetState) {
        match state {
            TargetState::Failed => self.failed += 1,
            TargetState::Changed => self.changed += 1,
            _ => self.unchanged += 1,
        }
    }
}

/// Run the whole build spec. Returns the merged summary; a diagnosed
/// failure in any entry stops subsequent entries.
pub fn run(ctx: &Arc<Context>, spec: &BuildSpec, root: ScopeId) -> Result<Summary, Failed> {
    let mut total = Summary::default();

    for entry in &spec.entries {
        match entry.meta {
            PERFORM => {
                for op in &entry.operations {
                    let summary =
                        perform(ctx, Action::new(PERFORM, op.operation), &op.targets, root)?;
                    total.changed += summary.changed;
                    total.unchanged += summary.unchanged;
                    total.failed += summary.failed;
                    if summary.failed != 0 {
                        return Err(Failed);
                    }
                }
            }
            INFO => {
                let mut out = std::io::stdout().lock();
                dump::scopes(ctx, &mut out)
                    .map_err(|e| fail(format_args!("cannot write dump: {e}")))?;
            }
            CONFIGURE => configure::save(ctx, root)?,
            DISFIGURE => configure::remove(ctx, root)?,
            DIST => {
                return Err(fail(
                    "dist meta-operation is not supported without a distribution back-end",
                ));
            }
            other => {
                return Err(fail(format_args!("unknown meta-operation id {other}")));
            }
        }
    }

    Ok(total)
}

/// Resolve an operation entry's target names against the root scope.
fn resolve_targets(
    ctx: &Arc<Context>,
    names: &[Name],
    root: ScopeId,
) -> Result<Vec<TargetId>, Failed> {
    if names.is_empty() {
        // The whole project: the root directory target.
        let dir = ctx.scopes().get(root).dir.clone();
        let (id, target, _) = ctx.targets.insert(
            &crate::target::types::DIR,
            dir,
            crate::path::DirPath::default(),
            String::new(),
            None,
        );
        // Everything declared in the project hangs off it.
        if target.prerequisites().is_empty() {
            for (_, t) in ctx.targets.snapshot() {
                if std::ptr::eq(t.typ, &crate::target::types::DIR) || !t.out.is_empty() {
                    continue;
                }
                if t.dir == target.dir && t.group().is_none() {
                    target.add_prerequisite(Prerequisite::new(
                        t.typ,
                        t.dir.clone(),
                        t.name.clone(),
                        t.ext(),
                        root,
                    ));
                }
            }
        }
        return Ok(vec![id]);
    }

    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let p = Prerequisite::from_name(ctx, name, root)?;
        ids.push(prerequisite::search(ctx, &p)?);
    }
    Ok(ids)
}

/// One perform operation: reset, match phase, execute phase, postponed
/// re-examination, report.
pub fn perform(
    ctx: &Arc<Context>,
    action: Action,
    names: &[Name],
    root: ScopeId,
) -> Result<Summary, Failed> {
    let info = action::operation(action.operation())
        .ok_or_else(|| fail(format_args!("unknown operation in {action}")))?;

    // An outer/inner pair runs the inner action to completion first.
    if let Some(inner) = info.inner {
        perform(ctx, action.with_operation(inner), names, root)?;
    }

    let ids = resolve_targets(ctx, names, root)?;

    ctx.reset_operation();
    tracing::debug!(%action, targets = ids.len(), "starting operation");

    ctx.switch_phase(Phase::Match);
    let matched = algorithm::match_members(ctx, action, &ids);

    ctx.switch_phase(Phase::Execute);
    let mut summary = Summary::default();

    if matched.is_ok() {
        let count = sched::TaskCount::new();
        for &id in &ids {
            let ctx2 = Arc::clone(ctx);
            ctx.sched.spawn(&count, move || {
                algorithm::execute(&ctx2, action, id);
            });
        }
        ctx.sched.wait(&count);

        algorithm::reexamine_postponed(ctx, action);

        for &id in &ids {
            summary.record(ctx.targets.get(id).state());
        }
    } else {
        summary.failed = ids.len();
    }

    ctx.switch_phase(Phase::Load);
    report(info, &summary);
    Ok(summary)
}

fn report(info: &action::OperationInfo, summary: &Summary) {
    if summary.failed != 0 {
        println!(
            "failed to {} {} target(s)",
            info.name,
            summary.failed
        );
    } else if summary.changed == 0 {
        println!("already up to date");
    } else {
        println!("{} {} target(s)", info.done, summary.changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fs_err as fs;

    use crate::action::OperationId;
    use crate::module;
    use crate::path::DirPath;
    use crate::recipe::Recipe;
    use crate::rule::Rule;
    use crate::target::{Target, types};

    /// Touch-file rule standing in for a real builder.
    struct TouchRule;

    impl Rule for TouchRule {
        fn matches(
            &self,
            _: &Context,
            _: Action,
            t: &Target,
            _: &str,
        ) -> Result<bool, Failed> {
            Ok(t.typ.is_a(&types::FILE))
        }

        fn apply(&self, _: &Context, _: Action, t: &Target) -> Result<Recipe, Failed> {
            if t.path().is_none() {
                t.derive_path()?;
            }
            Ok(Recipe::custom(|_, _, t| {
                let path = t.path().expect("derived").clone();
                if path.as_std_path().exists() {
                    return Ok(TargetState::Unchanged);
                }
                fs::write(path.as_std_path(), b"made")
                    .map_err(|e| fail(format_args!("cannot write {path}: {e}")))?;
                t.set_mtime(
                    crate::filesystem::mtime(path.as_std_path())
                        .map_err(|e| fail(format_args!("cannot stat {path}: {e}")))?,
                );
                Ok(TargetState::Changed)
            }))
        }
    }

    fn project() -> (tempfile::TempDir, Arc<Context>, ScopeId) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DirPath::new(tmp.path().to_str().unwrap());

        let ctx = Context::for_tests();
        module::register_builtin(&ctx);
        let root = ctx.scopes_mut().insert(dir.clone());
        module::load(&ctx, root, "core").unwrap();
        ctx.scopes_mut().get_mut(root).rules.insert(
            PERFORM,
            crate::action::DEFAULT,
            &types::FILE,
            "touch",
            Arc::new(TouchRule),
        );

        ctx.targets.insert(
            &types::FILE,
            dir.clone(),
            DirPath::default(),
            "out".to_owned(),
            Some("txt".to_owned()),
        );

        (tmp, ctx, root)
    }

    #[test]
    fn spec_run_updates_project_default_target() {
        let (tmp, ctx, root) = project();

        let spec = BuildSpec::parse(&[]).unwrap();
        let summary = run(&ctx, &spec, root).unwrap();
        assert_eq!(summary.failed, 0);
        assert!(tmp.path().join("out.txt").exists());
    }

    #[test]
    fn named_target_runs_only_it() {
        let (tmp, ctx, root) = project();

        let words = vec!["file{out.txt}".to_owned()];
        let spec = BuildSpec::parse(&words).unwrap();
        let summary = run(&ctx, &spec, root).unwrap();

        assert_eq!(summary.changed, 1);
        assert!(tmp.path().join("out.txt").exists());
    }

    #[test]
    fn inner_operation_runs_first() {
        let (_tmp, ctx, root) = project();

        // install's inner action is update; performing install must
        // produce the file even though nothing handles install itself.
        let summary = perform(
            &ctx,
            Action::new(PERFORM, crate::action::INSTALL),
            &[],
            root,
        );
        // The file rule's noop fallback handles the outer action.
        assert!(summary.is_ok());
    }

    #[test]
    fn dist_is_rejected() {
        let (_tmp, ctx, root) = project();
        let words = vec!["dist".to_owned()];
        let spec = BuildSpec::parse(&words).unwrap();
        assert!(run(&ctx, &spec, root).is_err());
    }

    #[test]
    fn update_is_idempotent_across_runs() {
        let (_tmp, ctx, root) = project();

        let spec = BuildSpec::parse(&[]).unwrap();
        let first = run(&ctx, &spec, root).unwrap();
        assert!(first.changed > 0);

        let second = run(&ctx, &spec, root).unwrap();
        assert_eq!(second.changed, 0);
    }

    #[test]
    fn unknown_operation_in_action() {
        let (_tmp, ctx, root) = project();
        assert!(perform(&ctx, Action::new(PERFORM, 99 as OperationId), &[], root).is_err());
    }
}
