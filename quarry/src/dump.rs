// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Human-readable dump of the scope tree and declared targets, backing the
//! `info` meta-operation.

use std::io;

use itertools::Itertools;

use crate::context::Context;

/// Write every scope with its variables and the targets declared in its
/// directory.
pub fn scopes(ctx: &Context, out: &mut impl io::Write) -> io::Result<()> {
    let scopes = ctx.scopes();
    let targets = ctx.targets.snapshot();

    for (_, scope) in scopes.iter() {
        let marker = if scope.is_root() { " [project root]" } else { "" };
        writeln!(out, "{}{marker}", scope.dir)?;
        writeln!(out, "{{")?;

        for (name, value) in scope.vars.iter() {
            writeln!(out, "  {name} = {value}")?;
        }

        for (_, target) in targets.iter().filter(|(_, t)| t.dir == scope.dir) {
            let prereqs = target.prerequisites();
            if prereqs.is_empty() {
                writeln!(out, "  {target}:")?;
            } else {
                writeln!(
                    out,
                    "  {target}: {}",
                    prereqs.iter().map(ToString::to_string).join(" ")
                )?;
            }
        }

        writeln!(out, "}}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module;
    use crate::path::DirPath;
    use crate::prerequisite::Prerequisite;
    use crate::target::types;
    use crate::variable::Value;

    #[test]
    fn dump_lists_scopes_variables_and_targets() {
        let ctx = Context::for_tests();
        module::register_builtin(&ctx);

        let dir = DirPath::new("/proj");
        let root = ctx.scopes_mut().insert(dir.clone());
        module::load(&ctx, root, "core").unwrap();
        ctx.scopes_mut()
            .get_mut(root)
            .assign("cxx", Value::String("g++".into()));

        let (_, exe, _) = ctx.targets.insert(
            &types::EXE,
            dir.clone(),
            DirPath::default(),
            "a".into(),
            None,
        );
        exe.add_prerequisite(Prerequisite::new(
            &types::OBJ,
            DirPath::default(),
            "a",
            None,
            root,
        ));

        let mut buffer = Vec::new();
        scopes(&ctx, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("/proj/"));
        assert!(text.contains("cxx = g++"));
        assert!(text.contains("exe{a}"));
        assert!(text.contains("obj{a}"));
    }
}
