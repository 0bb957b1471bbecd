// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Match and execute: the two-phase walk over the target graph.
//!
//! Match binds a rule and recipe to each target, recursively reaching
//! prerequisites; execute walks the matched graph dispatching recipes to
//! the scheduler. Both phases serialize per target through the atomic state
//! word: the `unknown -> busy` winner does the work, everyone else waits on
//! the target's wait slot.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sched::TaskCount;

use crate::action::{self, Action, ExecutionMode};
use crate::context::{Context, Phase};
use crate::diag::{Failed, fail};
use crate::prerequisite;
use crate::recipe::Recipe;
use crate::rule::{AliasRule, FileRule, NoopRule, Rule};
use crate::target::{OpState, Target, TargetId, TargetState, types};

thread_local! {
    /// Targets this thread is currently matching, innermost last. A busy
    /// target found on the stack is a dependency cycle, not another thread.
    static MATCH_STACK: RefCell<Vec<TargetId>> = const { RefCell::new(Vec::new()) };
}

/// Bind a rule and recipe to `target` for `action`, recursively matching
/// its prerequisites.
pub fn match_target(ctx: &Arc<Context>, action: Action, id: TargetId) -> Result<(), Failed> {
    let target = ctx.targets.get(id);

    loop {
        {
            let os = target.opstate();
            if os.matched == Some(action) {
                return if os.recipe.is_some() { Ok(()) } else { Err(Failed) };
            }
        }

        if target.try_busy() {
            break;
        }

        if MATCH_STACK.with(|s| s.borrow().contains(&id)) {
            return Err(fail(format_args!(
                "dependency cycle detected involving {target}"
            )));
        }

        ctx.targets.wait_not_busy(id, &target);
    }

    // We own the target. Re-check under the lock (the previous owner may
    // have completed between our check and the CAS) and reclaim a slot
    // bound for a different action.
    {
        let mut os = target.opstate();
        if os.matched == Some(action) {
            let done = os.recipe.is_some();
            drop(os);
            ctx.targets.publish(id, &target, TargetState::Unknown);
            return if done { Ok(()) } else { Err(Failed) };
        }
        if os.matched.is_some() {
            *os = OpState::default();
        }
        os.matching = true;
    }

    MATCH_STACK.with(|s| s.borrow_mut().push(id));
    let result = match_impl(ctx, action, &target);
    MATCH_STACK.with(|s| s.borrow_mut().pop());

    {
        let mut os = target.opstate();
        os.matching = false;
        os.matched = Some(action);
        if result.is_err() {
            os.recipe = None;
        }
    }
    ctx.targets.publish(id, &target, TargetState::Unknown);

    result
}

/// Rule selection: walk the base-type chain, at each ancestor consulting
/// the scope chain's rule maps for the concrete operation and then the
/// wildcard. Candidates are tried in hint order, registration order within
/// equal hints; the first non-declined match is bound.
fn select_rule(
    ctx: &Context,
    action: Action,
    target: &Target,
) -> Result<Option<(String, Arc<dyn Rule>)>, Failed> {
    let candidates: Vec<(String, Arc<dyn Rule>)> = {
        let scopes = ctx.scopes();
        let base = scopes.find_dir(target.base_dir());
        let mut found = Vec::new();

        for ancestor in target.typ.ancestry() {
            for scope in scopes.chain(base) {
                let Some(ops) = scope.rules.lookup(action.meta()) else {
                    continue;
                };
                for oid in [action.operation(), action::DEFAULT] {
                    let Some(by_type) = ops.lookup(oid) else {
                        continue;
                    };
                    let Some(hinted) = by_type.get(&ancestor.ptr_id()) else {
                        continue;
                    };
                    for (hint, rule) in hinted.matching("") {
                        found.push((hint.to_owned(), Arc::clone(rule)));
                    }
                }
            }
        }

        found
    };

    for (hint, rule) in candidates {
        if rule.matches(ctx, action, target, &hint)? {
            return Ok(Some((hint, rule)));
        }
    }

    Ok(None)
}

fn match_impl(ctx: &Arc<Context>, action: Action, target: &Target) -> Result<(), Failed> {
    let (hint, rule): (String, Arc<dyn Rule>) = match select_rule(ctx, action, target)? {
        Some(bound) => bound,
        None => {
            // Fallbacks: an existing file, an alias, or nothing to do. A
            // file target that does not exist and has no rule is the
            // classic unresolvable case.
            if target.typ.is_a(&types::FILE) {
                if FileRule.matches(ctx, action, target, "")? {
                    ("file".to_owned(), Arc::new(FileRule) as Arc<dyn Rule>)
                } else {
                    let verb =
                        action::operation(action.operation()).map_or("update", |o| o.name);
                    return Err(fail(format_args!("no rule to {verb} {target}")));
                }
            } else if AliasRule.matches(ctx, action, target, "")? {
                ("alias".to_owned(), Arc::new(AliasRule) as Arc<dyn Rule>)
            } else {
                ("noop".to_owned(), Arc::new(NoopRule) as Arc<dyn Rule>)
            }
        }
    };

    let recipe = rule.apply(ctx, action, target)?;
    let delegates = matches!(recipe, Recipe::Group);
    {
        let mut os = target.opstate();
        os.recipe = Some(recipe);
        os.rule_hint = Some(hint);
    }
    tracing::trace!(%target, %action, "matched");

    // A group-delegating recipe needs the group bound as well.
    if delegates {
        if let Some(gid) = target.group() {
            match_target(ctx, action, gid)?;
        }
    }

    match_prerequisites(ctx, action, target)
}

/// Resolve the target's declared prerequisites and match each of them.
/// Prerequisites injected by the rule's `apply` are kept after the
/// declared ones.
pub fn match_prerequisites(
    ctx: &Arc<Context>,
    action: Action,
    target: &Target,
) -> Result<(), Failed> {
    let declared = target.prerequisites();
    let mut resolved = Vec::with_capacity(declared.len());
    for p in &declared {
        resolved.push(prerequisite::search(ctx, p)?);
    }

    let ids: Vec<TargetId> = {
        let mut os = target.opstate();
        let injected = std::mem::take(&mut os.prerequisite_targets);
        os.prerequisite_targets = resolved;
        os.prerequisite_targets.extend(injected);
        os.prerequisite_targets.clone()
    };

    for &pid in &ids {
        match_target(ctx, action, pid)?;
    }

    // Iteration descends into see-through groups: their members become
    // prerequisites of the depending target as well.
    let mut members = Vec::new();
    for &pid in &ids {
        let p = ctx.targets.get(pid);
        if p.typ.see_through {
            for m in p.members() {
                if !ids.contains(&m) && !members.contains(&m) {
                    members.push(m);
                }
            }
        }
    }
    for &m in &members {
        match_target(ctx, action, m)?;
    }
    if !members.is_empty() {
        target.opstate().prerequisite_targets.extend(members);
    }

    Ok(())
}

/// Match a set of independent targets in parallel (top-level build spec
/// entries, group members).
pub fn match_members(ctx: &Arc<Context>, action: Action, ids: &[TargetId]) -> Result<(), Failed> {
    let count = TaskCount::new();
    let failed = Arc::new(AtomicBool::new(false));

    for &mid in ids {
        let ctx2 = Arc::clone(ctx);
        let failed2 = Arc::clone(&failed);
        ctx.sched.spawn(&count, move || {
            if match_target(&ctx2, action, mid).is_err() {
                failed2.store(true, Ordering::Release);
            }
        });
    }
    ctx.sched.wait(&count);

    if failed.load(Ordering::Acquire) {
        Err(Failed)
    } else {
        Ok(())
    }
}

/// Execute `target` for `action`, returning its terminal state.
pub fn execute(ctx: &Arc<Context>, action: Action, id: TargetId) -> TargetState {
    let target = ctx.targets.get(id);

    loop {
        let state = target.state();
        if state.is_terminal() {
            return state;
        }
        if state == TargetState::Busy {
            let state = ctx.targets.wait_not_busy(id, &target);
            if state.is_terminal() {
                return state;
            }
            continue;
        }
        if target.try_busy() {
            break;
        }
    }

    let state = match execute_impl(ctx, action, &target) {
        Ok(s) => s,
        Err(Failed) => TargetState::Failed,
    };

    if state == TargetState::Failed {
        ctx.mark_failed();
    }
    if state == TargetState::Postponed {
        ctx.postpone(id);
    }

    ctx.targets.publish(id, &target, state);
    tracing::trace!(%target, %state, "executed");
    state
}

fn execute_impl(
    ctx: &Arc<Context>,
    action: Action,
    target: &Target,
) -> Result<TargetState, Failed> {
    let info = action::operation(action.operation())
        .ok_or_else(|| fail(format_args!("unknown operation in {action}")))?;

    match info.mode {
        ExecutionMode::First => {
            let ps = execute_prerequisites_of(ctx, action, target)?;
            if ps == TargetState::Failed {
                // Already diagnosed at the source; the recipe is not
                // invoked.
                return Ok(TargetState::Failed);
            }
            run_recipe(ctx, action, target, ps)
        }
        ExecutionMode::Last => {
            let rs = run_recipe(ctx, action, target, TargetState::Unchanged)?;
            let ps = execute_prerequisites_of(ctx, action, target)?;
            Ok(rs.merge(ps))
        }
    }
}

fn execute_prerequisites_of(
    ctx: &Arc<Context>,
    action: Action,
    target: &Target,
) -> Result<TargetState, Failed> {
    let ids = target.opstate().prerequisite_targets.clone();
    if ids.is_empty() {
        return Ok(TargetState::Unchanged);
    }

    let count = TaskCount::new();
    for &pid in &ids {
        // First-failure stop: dispatch no new work once something failed.
        if !ctx.keep_going && ctx.has_failed() {
            break;
        }
        if ctx.targets.get(pid).state().is_terminal() {
            continue;
        }
        let ctx2 = Arc::clone(ctx);
        ctx.sched.spawn(&count, move || {
            execute(&ctx2, action, pid);
        });
    }
    ctx.sched.wait(&count);

    let mut aggregate = TargetState::Unchanged;
    for &pid in &ids {
        aggregate |= match ctx.targets.get(pid).state() {
            // Skipped by the first-failure stop.
            TargetState::Unknown | TargetState::Busy => TargetState::Failed,
            s => s,
        };
    }
    Ok(aggregate)
}

fn run_recipe(
    ctx: &Arc<Context>,
    action: Action,
    target: &Target,
    prereq_state: TargetState,
) -> Result<TargetState, Failed> {
    let recipe = target.opstate().recipe.take();

    let (restore, result) = match recipe {
        None => (None, Ok(TargetState::Unchanged)),
        Some(Recipe::Noop) => (Some(Recipe::Noop), Ok(TargetState::Unchanged)),
        Some(Recipe::Default) => (Some(Recipe::Default), Ok(prereq_state)),
        Some(Recipe::Inner) => {
            // The inner action ran as the operation's pre-pass; reflect the
            // aggregate it left behind.
            (Some(Recipe::Inner), Ok(prereq_state))
        }
        Some(Recipe::Group) => {
            let result = match target.group() {
                Some(gid) => Ok(execute(ctx, action, gid)),
                None => Err(fail(format_args!(
                    "group recipe for {target} which has no group"
                ))),
            };
            (Some(Recipe::Group), result)
        }
        Some(Recipe::Custom(mut f)) => {
            let result = f(ctx, action, target);
            (Some(Recipe::Custom(f)), result)
        }
    };

    target.opstate().recipe = restore;
    result
}

/// Final single-threaded pass over targets whose recipes postponed.
///
/// Returns `(revisited, still_postponed)`; the still-postponed are
/// reported.
pub fn reexamine_postponed(ctx: &Arc<Context>, action: Action) -> (usize, usize) {
    let postponed = ctx.take_postponed();
    let mut revisited = 0;
    let mut stuck = 0;

    for id in postponed {
        let target = ctx.targets.get(id);
        if target.state() != TargetState::Postponed {
            continue;
        }

        ctx.targets.publish(id, &target, TargetState::Unknown);
        revisited += 1;

        if execute(ctx, action, id) == TargetState::Postponed {
            stuck += 1;
            let doing = action::operation(action.operation()).map_or("update", |o| o.doing);
            crate::diag::warn(format_args!("unable to finish {doing} {target} at this time"));
        }
    }

    // Anything re-postponed by the pass itself has been reported; drop it.
    let _ = ctx.take_postponed();

    (revisited, stuck)
}

/// Temporarily switch to the execute phase to bring `ids` up to date in
/// the middle of matching (dynamic prerequisite injection). The targets
/// must already be matched.
pub fn update_during_match(
    ctx: &Arc<Context>,
    action: Action,
    ids: &[TargetId],
) -> Result<TargetState, Failed> {
    ctx.switch_phase(Phase::Execute);
    let mut aggregate = TargetState::Unchanged;
    for &id in ids {
        aggregate |= execute(ctx, action, id);
    }
    ctx.switch_phase(Phase::Match);

    if aggregate == TargetState::Failed {
        Err(Failed)
    } else {
        Ok(aggregate)
    }
}

/// Aggregate state of a target's resolved prerequisites; for use by custom
/// recipes after the engine executed them.
pub fn prerequisite_state(ctx: &Context, target: &Target) -> TargetState {
    let ids = target.opstate().prerequisite_targets.clone();
    let mut aggregate = TargetState::Unchanged;
    for pid in ids {
        aggregate |= ctx.targets.get(pid).state();
    }
    aggregate
}

/// Is the target older than any of its prerequisites (or missing)?
///
/// The standard freshness test for mtime-based recipes: a prerequisite
/// that changed this run, or whose timestamp is strictly newer than the
/// target's, makes the target out of date.
pub fn out_of_date(ctx: &Context, target: &Target) -> Result<bool, Failed> {
    let tm = target
        .load_mtime()
        .map_err(|e| fail(format_args!("cannot stat {target}: {e}")))?;
    if !tm.exists() {
        return Ok(true);
    }

    let ids = target.opstate().prerequisite_targets.clone();
    for pid in ids {
        let p = ctx.targets.get(pid);
        if p.state() == TargetState::Changed {
            return Ok(true);
        }
        if let Some(pm) = p.mtime() {
            if pm > tm {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use fs_err as fs;

    use super::*;
    use crate::action::{CLEAN, DEFAULT, OperationId, PERFORM, UPDATE};
    use crate::filesystem::{self, Timestamp};
    use crate::module;
    use crate::path::{DirPath, Path};
    use crate::prerequisite::Prerequisite;
    use crate::scope::ScopeId;
    use crate::target::{PayloadKind, Search, TargetType};

    static CXX: TargetType = TargetType {
        name: "cxx",
        base: Some(&types::FILE),
        payload: PayloadKind::Path,
        fixed_extension: Some("cxx"),
        default_extension: None,
        pattern: None,
        see_through: false,
        search: Search::File,
    };

    /// Test stand-in for compile/link: build a file target by
    /// concatenating its file prerequisites.
    struct ConcatRule;

    impl Rule for ConcatRule {
        fn matches(&self, _: &Context, _: Action, t: &Target, _: &str) -> Result<bool, Failed> {
            Ok(t.typ.is_a(&types::FILE))
        }

        fn apply(&self, _: &Context, _: Action, t: &Target) -> Result<Recipe, Failed> {
            if t.path().is_none() {
                t.derive_path()?;
            }
            Ok(Recipe::custom(concat_recipe))
        }
    }

    fn concat_recipe(ctx: &Context, a: Action, t: &Target) -> Result<TargetState, Failed> {
        let path = t.path().expect("path derived at apply").clone();

        if a.operation() == CLEAN {
            let removed = filesystem::try_rmfile(path.as_std_path())
                .map_err(|e| fail(format_args!("cannot remove {path}: {e}")))?;
            t.set_mtime(Timestamp::Nonexistent);
            return Ok(if removed {
                TargetState::Changed
            } else {
                TargetState::Unchanged
            });
        }

        if !out_of_date(ctx, t)? {
            return Ok(TargetState::Unchanged);
        }

        let mut output = Vec::new();
        for pid in t.opstate().prerequisite_targets.clone() {
            let p = ctx.targets.get(pid);
            if let Some(pp) = p.path() {
                output.extend(
                    fs::read(pp.as_std_path())
                        .map_err(|e| fail(format_args!("cannot read {pp}: {e}")))?,
                );
            }
        }

        fs::write(path.as_std_path(), &output)
            .map_err(|e| fail(format_args!("cannot write {path}: {e}")))?;
        t.set_mtime(
            filesystem::mtime(path.as_std_path())
                .map_err(|e| fail(format_args!("cannot stat {path}: {e}")))?,
        );
        Ok(TargetState::Changed)
    }

    /// Rebuilds when the configured flags change, even with no filesystem
    /// change, by comparing against the cache-held depdb.
    struct StampRule;

    impl Rule for StampRule {
        fn matches(&self, _: &Context, _: Action, t: &Target, _: &str) -> Result<bool, Failed> {
            Ok(t.typ.is_a(&types::FILE))
        }

        fn apply(&self, _: &Context, _: Action, t: &Target) -> Result<Recipe, Failed> {
            if t.path().is_none() {
                t.derive_path()?;
            }
            Ok(Recipe::custom(stamp_recipe))
        }
    }

    fn stamp_recipe(ctx: &Context, _: Action, t: &Target) -> Result<TargetState, Failed> {
        let path = t.path().expect("path derived at apply").clone();

        let flags = {
            let scopes = ctx.scopes();
            let sid = scopes.find_dir(t.base_dir());
            scopes
                .find_var(sid, "flags")
                .map(ToString::to_string)
                .unwrap_or_default()
        };

        let mut entry = ctx.cache.entry(Path::new(format!("{path}.d")));
        let mut db = crate::depdb::DepDb::open_cached(&mut entry)
            .map_err(|e| fail(format_args!("cannot open depdb for {path}: {e}")))?;
        db.expect("stamp 1.0");
        db.expect(format!("flags {}", crate::depdb::hash(&flags)));
        let stale = db.writing();
        db.close_cached(&mut entry)
            .map_err(|e| fail(format_args!("cannot close depdb for {path}: {e}")))?;

        if !stale && path.as_std_path().exists() {
            return Ok(TargetState::Unchanged);
        }

        fs::write(path.as_std_path(), &flags)
            .map_err(|e| fail(format_args!("cannot write {path}: {e}")))?;
        t.set_mtime(
            filesystem::mtime(path.as_std_path())
                .map_err(|e| fail(format_args!("cannot stat {path}: {e}")))?,
        );
        Ok(TargetState::Changed)
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        dir: DirPath,
        ctx: Arc<Context>,
        root: ScopeId,
    }

    fn fixture() -> Fixture {
        fixture_cfg(false, false)
    }

    fn fixture_with(keep_going: bool) -> Fixture {
        fixture_cfg(keep_going, false)
    }

    fn fixture_cfg(keep_going: bool, compress_cache: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DirPath::new(tmp.path().to_str().unwrap());

        let ctx = Context::new(2, keep_going, compress_cache).unwrap();
        module::register_builtin(&ctx);

        let root = ctx.scopes_mut().insert(dir.clone());
        module::load(&ctx, root, "core").unwrap();

        {
            let mut scopes = ctx.scopes_mut();
            let s = scopes.get_mut(root);
            s.register_target_type(&CXX);
            s.rules
                .insert(PERFORM, DEFAULT, &types::OBJ, "test.compile", Arc::new(ConcatRule));
            s.rules
                .insert(PERFORM, DEFAULT, &types::EXE, "test.link", Arc::new(ConcatRule));
        }

        Fixture {
            _tmp: tmp,
            dir,
            ctx,
            root,
        }
    }

    impl Fixture {
        fn declare(
            &self,
            tt: &'static TargetType,
            name: &str,
            prereqs: &[(&'static TargetType, &str)],
        ) -> TargetId {
            let (id, target, _) = self.ctx.targets.insert(
                tt,
                self.dir.clone(),
                DirPath::default(),
                name.to_owned(),
                None,
            );
            for &(pt, pn) in prereqs {
                target.add_prerequisite(Prerequisite::new(
                    pt,
                    DirPath::default(),
                    pn,
                    None,
                    self.root,
                ));
            }
            id
        }

        /// One full operation: reset, match, execute, postponed pass.
        fn run(&self, op: OperationId, id: TargetId) -> TargetState {
            let action = Action::new(PERFORM, op);
            self.ctx.reset_operation();

            self.ctx.switch_phase(Phase::Match);
            let matched = match_target(&self.ctx, action, id);
            self.ctx.switch_phase(Phase::Execute);

            if matched.is_ok() {
                execute(&self.ctx, action, id);
                reexamine_postponed(&self.ctx, action);
            }
            self.ctx.switch_phase(Phase::Load);

            if matched.is_err() {
                TargetState::Failed
            } else {
                self.ctx.targets.get(id).state()
            }
        }

        fn state(&self, id: TargetId) -> TargetState {
            self.ctx.targets.get(id).state()
        }

        fn write_src(&self, leaf: &str, content: &str) {
            fs::write(self.dir.join(leaf).as_std_path(), content).unwrap();
        }

        fn out_path(&self, leaf: &str) -> Path {
            self.dir.join(leaf)
        }
    }

    #[test]
    fn minimal_target_graph() {
        let f = fixture();
        f.write_src("a.cxx", "int main() {}\n");

        let exe = f.declare(&types::EXE, "a", &[(&types::OBJ, "a")]);
        f.declare(&types::OBJ, "a", &[(&CXX, "a")]);

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);
        assert!(f.out_path("a.o").as_std_path().exists());
        assert!(f.out_path("a").as_std_path().exists());
        assert_eq!(
            fs::read_to_string(f.out_path("a").as_std_path()).unwrap(),
            "int main() {}\n"
        );

        // Idempotent update: a second run with no changes is a no-op.
        let obj = f.declare(&types::OBJ, "a", &[]);
        assert_eq!(f.run(UPDATE, exe), TargetState::Unchanged);
        assert_eq!(f.state(obj), TargetState::Unchanged);
    }

    #[test]
    fn clean_inverts_update() {
        let f = fixture();
        f.write_src("a.cxx", "void f();\n");

        let exe = f.declare(&types::EXE, "a", &[(&types::OBJ, "a")]);
        f.declare(&types::OBJ, "a", &[(&CXX, "a")]);

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);
        assert_eq!(f.run(CLEAN, exe), TargetState::Changed);

        assert!(!f.out_path("a").as_std_path().exists());
        assert!(!f.out_path("a.o").as_std_path().exists());
        // Sources are not outputs; clean must leave them alone.
        assert!(f.out_path("a.cxx").as_std_path().exists());
    }

    #[test]
    fn no_spurious_rebuilds() {
        let f = fixture();
        f.write_src("a.cxx", "one\n");

        let exe = f.declare(&types::EXE, "a", &[(&types::OBJ, "a")]);
        f.declare(&types::OBJ, "a", &[(&CXX, "a")]);

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);
        assert_eq!(f.run(UPDATE, exe), TargetState::Unchanged);

        // A prerequisite strictly newer than the outputs: exactly one
        // changed run, then quiescence again.
        let future = filetime::FileTime::from_unix_time(
            filetime::FileTime::now().unix_seconds() + 5,
            0,
        );
        filetime::set_file_mtime(f.out_path("a.cxx").as_std_path(), future).unwrap();

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);

        // A prerequisite strictly older triggers nothing.
        let past = filetime::FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(f.out_path("a.cxx").as_std_path(), past).unwrap();

        assert_eq!(f.run(UPDATE, exe), TargetState::Unchanged);
    }

    #[test]
    fn missing_source_has_no_rule() {
        let f = fixture();
        // No a.cxx on disk and no rule can produce one.
        let obj = f.declare(&types::OBJ, "a", &[(&CXX, "a")]);
        assert_eq!(f.run(UPDATE, obj), TargetState::Failed);
    }

    #[test]
    fn failure_propagates_without_invoking_dependents() {
        struct FailRule;

        impl Rule for FailRule {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
                Ok(Recipe::custom(|_, _, _| Ok(TargetState::Failed)))
            }
        }

        struct ProbeRule(Arc<AtomicBool>);

        impl Rule for ProbeRule {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
                let invoked = Arc::clone(&self.0);
                Ok(Recipe::custom(move |_, _, _| {
                    invoked.store(true, Ordering::Release);
                    Ok(TargetState::Changed)
                }))
            }
        }

        let f = fixture();
        f.write_src("a.cxx", "x\n");

        let link_invoked = Arc::new(AtomicBool::new(false));
        {
            let mut scopes = f.ctx.scopes_mut();
            let s = scopes.get_mut(f.root);
            // "fail" and "a.probe" sort before the concat hints and win.
            s.rules
                .insert(PERFORM, DEFAULT, &types::OBJ, "fail", Arc::new(FailRule));
            s.rules.insert(
                PERFORM,
                DEFAULT,
                &types::EXE,
                "a.probe",
                Arc::new(ProbeRule(Arc::clone(&link_invoked))),
            );
        }

        let exe = f.declare(&types::EXE, "a", &[(&types::OBJ, "a")]);
        f.declare(&types::OBJ, "a", &[(&CXX, "a")]);

        assert_eq!(f.run(UPDATE, exe), TargetState::Failed);
        assert!(!link_invoked.load(Ordering::Acquire));
    }

    #[test]
    fn postponed_is_revisited() {
        struct PostponeRule(Arc<AtomicUsize>);

        impl Rule for PostponeRule {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
                let calls = Arc::clone(&self.0);
                Ok(Recipe::custom(move |_, _, _| {
                    if calls.fetch_add(1, Ordering::AcqRel) == 0 {
                        Ok(TargetState::Postponed)
                    } else {
                        Ok(TargetState::Unchanged)
                    }
                }))
            }
        }

        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let mut scopes = f.ctx.scopes_mut();
            scopes.get_mut(f.root).rules.insert(
                PERFORM,
                DEFAULT,
                &types::EXE,
                "defer",
                Arc::new(PostponeRule(Arc::clone(&calls))),
            );
        }

        let exe = f.declare(&types::EXE, "p", &[]);
        let action = Action::new(PERFORM, UPDATE);

        f.ctx.reset_operation();
        f.ctx.switch_phase(Phase::Match);
        match_target(&f.ctx, action, exe).unwrap();
        f.ctx.switch_phase(Phase::Execute);

        assert_eq!(execute(&f.ctx, action, exe), TargetState::Postponed);

        let (revisited, stuck) = reexamine_postponed(&f.ctx, action);
        assert_eq!((revisited, stuck), (1, 0));
        assert_eq!(f.state(exe), TargetState::Unchanged);
        assert_eq!(calls.load(Ordering::Acquire), 2);
    }

    #[test]
    fn depdb_rebuilds_on_command_change() {
        let f = fixture();
        {
            let mut scopes = f.ctx.scopes_mut();
            let s = scopes.get_mut(f.root);
            s.assign("flags", crate::variable::Value::String("-O0".into()));
            s.rules
                .insert(PERFORM, DEFAULT, &types::EXE, "a.stamp", Arc::new(StampRule));
        }

        let exe = f.declare(&types::EXE, "stamp", &[]);

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);
        assert_eq!(f.run(UPDATE, exe), TargetState::Unchanged);

        // The command line changed; mtimes alone would say up to date.
        f.ctx
            .scopes_mut()
            .get_mut(f.root)
            .assign("flags", crate::variable::Value::String("-O2".into()));

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);
        assert_eq!(
            fs::read_to_string(f.out_path("stamp").as_std_path()).unwrap(),
            "-O2"
        );
    }

    #[test]
    fn depdb_is_preempted_between_runs_when_compression_is_on() {
        let f = fixture_cfg(false, true);
        {
            let mut scopes = f.ctx.scopes_mut();
            let s = scopes.get_mut(f.root);
            s.assign("flags", crate::variable::Value::String("-O0".into()));
            s.rules
                .insert(PERFORM, DEFAULT, &types::EXE, "a.stamp", Arc::new(StampRule));
        }

        let exe = f.declare(&types::EXE, "stamp", &[]);

        assert_eq!(f.run(UPDATE, exe), TargetState::Changed);

        // Between runs only the compressed depdb remains.
        assert!(!f.out_path("stamp.d").as_std_path().exists());
        assert!(f.out_path("stamp.d.zst").as_std_path().exists());

        // The next open restores it transparently.
        assert_eq!(f.run(UPDATE, exe), TargetState::Unchanged);
        assert!(!f.out_path("stamp.d").as_std_path().exists());
    }

    #[test]
    fn dependency_cycle_is_diagnosed() {
        let f = fixture();

        let x = f.declare(&types::ALIAS, "x", &[(&types::ALIAS, "y")]);
        f.declare(&types::ALIAS, "y", &[(&types::ALIAS, "x")]);

        assert_eq!(f.run(UPDATE, x), TargetState::Failed);
    }

    #[test]
    fn equal_hints_bind_in_registration_order() {
        struct Marker(TargetState);

        impl Rule for Marker {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
                let state = self.0;
                Ok(Recipe::custom(move |_, _, _| Ok(state)))
            }
        }

        let f = fixture();
        {
            let mut scopes = f.ctx.scopes_mut();
            let s = scopes.get_mut(f.root);
            s.rules.insert(
                PERFORM,
                DEFAULT,
                &types::MTIME_TARGET,
                "same",
                Arc::new(Marker(TargetState::Changed)),
            );
            s.rules.insert(
                PERFORM,
                DEFAULT,
                &types::MTIME_TARGET,
                "same",
                Arc::new(Marker(TargetState::Failed)),
            );
        }

        let a = f.declare(&types::MTIME_TARGET, "pick", &[]);
        assert_eq!(f.run(UPDATE, a), TargetState::Changed);
        assert_eq!(
            f.ctx.targets.get(a).opstate().rule_hint.as_deref(),
            Some("same")
        );
    }

    #[test]
    fn group_recipe_delegates() {
        struct GroupAware;

        impl Rule for GroupAware {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, t: &Target) -> Result<Recipe, Failed> {
                if t.group().is_some() {
                    Ok(Recipe::Group)
                } else {
                    Ok(Recipe::custom(|_, _, _| Ok(TargetState::Changed)))
                }
            }
        }

        let f = fixture();
        {
            let mut scopes = f.ctx.scopes_mut();
            scopes.get_mut(f.root).rules.insert(
                PERFORM,
                DEFAULT,
                &types::MTIME_TARGET,
                "grp",
                Arc::new(GroupAware),
            );
        }

        let g = f.declare(&types::MTIME_TARGET, "g", &[]);
        let m = f.declare(&types::MTIME_TARGET, "m", &[]);
        let (gt, mt) = (f.ctx.targets.get(g), f.ctx.targets.get(m));
        mt.join_group(g, &gt, m);

        assert_eq!(f.run(UPDATE, m), TargetState::Changed);
        assert_eq!(f.state(g), TargetState::Changed);
    }

    #[test]
    fn see_through_group_members_are_reached() {
        let f = fixture();
        f.write_src("member.cxx", "inside\n");

        // A target depending on a see-through alias reaches its members.
        let top = f.declare(&types::ALIAS, "top", &[(&types::ALIAS, "grp")]);
        let grp = f.declare(&types::ALIAS, "grp", &[]);
        let member = f.declare(&types::OBJ, "member", &[(&CXX, "member")]);

        let (gt, mt) = (f.ctx.targets.get(grp), f.ctx.targets.get(member));
        mt.join_group(grp, &gt, member);

        assert_eq!(f.run(UPDATE, top), TargetState::Changed);
        assert_eq!(f.state(member), TargetState::Changed);
        assert!(f.out_path("member.o").as_std_path().exists());
    }

    #[test]
    fn keep_going_builds_independent_subgraphs() {
        struct FailRule;

        impl Rule for FailRule {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
                Ok(Recipe::custom(|_, _, _| Ok(TargetState::Failed)))
            }
        }

        let f = fixture_with(true);
        f.write_src("good.cxx", "ok\n");

        {
            let mut scopes = f.ctx.scopes_mut();
            // "bad" targets are exe{bad}; give them a dedicated failing
            // hint that sorts first.
            scopes
                .get_mut(f.root)
                .rules
                .insert(PERFORM, DEFAULT, &types::EXE, "boom", Arc::new(FailRule));
        }

        let all = f.declare(
            &types::ALIAS,
            "all",
            &[(&types::EXE, "bad"), (&types::OBJ, "good")],
        );
        f.declare(&types::EXE, "bad", &[]);
        f.declare(&types::OBJ, "good", &[(&CXX, "good")]);

        assert_eq!(f.run(UPDATE, all), TargetState::Failed);

        // The independent sub-graph was still built.
        let (good, _, _) = f.ctx.targets.insert(
            &types::OBJ,
            f.dir.clone(),
            DirPath::default(),
            "good".into(),
            None,
        );
        assert_eq!(f.state(good), TargetState::Changed);
        assert!(f.out_path("good.o").as_std_path().exists());
    }

    #[test]
    fn update_during_match_switches_phases() {
        let f = fixture();
        f.write_src("d.cxx", "dep\n");

        let obj = f.declare(&types::OBJ, "d", &[(&CXX, "d")]);
        let action = Action::new(PERFORM, UPDATE);

        f.ctx.reset_operation();
        f.ctx.switch_phase(Phase::Match);
        match_target(&f.ctx, action, obj).unwrap();

        let state = update_during_match(&f.ctx, action, &[obj]).unwrap();
        assert_eq!(state, TargetState::Changed);
        assert_eq!(f.ctx.phase(), Phase::Match);
        assert!(f.out_path("d.o").as_std_path().exists());
    }

    #[test]
    fn parallel_match_and_execute_wide_graph() {
        let f = fixture();

        let mut names = Vec::new();
        for i in 0..32 {
            let name = format!("w{i}");
            f.write_src(&format!("{name}.cxx"), &format!("unit {i}\n"));
            names.push(name);
        }

        let prereqs: Vec<(&'static TargetType, &str)> = names
            .iter()
            .map(|n| (&types::OBJ as &'static TargetType, n.as_str()))
            .collect();
        let all = f.declare(&types::ALIAS, "all", &prereqs);
        for name in &names {
            f.declare(&types::OBJ, name, &[(&CXX, name)]);
        }

        assert_eq!(f.run(UPDATE, all), TargetState::Changed);
        for name in &names {
            assert!(f.out_path(&format!("{name}.o")).as_std_path().exists());
        }
        assert_eq!(f.run(UPDATE, all), TargetState::Unchanged);
    }

    #[test]
    fn shared_prerequisite_is_executed_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        struct CountingRule;

        impl Rule for CountingRule {
            fn matches(&self, _: &Context, _: Action, _: &Target, _: &str) -> Result<bool, Failed> {
                Ok(true)
            }

            fn apply(&self, _: &Context, _: Action, _: &Target) -> Result<Recipe, Failed> {
                Ok(Recipe::custom(|_, _, _| {
                    BUILDS.fetch_add(1, Ordering::AcqRel);
                    Ok(TargetState::Changed)
                }))
            }
        }

        let f = fixture();
        {
            let mut scopes = f.ctx.scopes_mut();
            scopes
                .get_mut(f.root)
                .rules
                .insert(PERFORM, DEFAULT, &types::OBJ, "count", Arc::new(CountingRule));
        }

        // Two parents share one prerequisite.
        let all = f.declare(
            &types::ALIAS,
            "all",
            &[(&types::ALIAS, "left"), (&types::ALIAS, "right")],
        );
        f.declare(&types::ALIAS, "left", &[(&types::OBJ, "shared")]);
        f.declare(&types::ALIAS, "right", &[(&types::OBJ, "shared")]);
        f.declare(&types::OBJ, "shared", &[]);

        BUILDS.store(0, Ordering::Release);
        assert_eq!(f.run(UPDATE, all), TargetState::Changed);
        assert_eq!(BUILDS.load(Ordering::Acquire), 1);
    }
}
