// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use super::{Context, Error};

/// Hosts a script step's body.
///
/// The default host hands the body to `/bin/sh` in the source root
/// with the step's environment applied. Alternative hosts (e.g. an
/// embedded interpreter offering a `shell(path, args)` primitive over
/// the recipe's platform/arch variables) implement the same trait and
/// render whatever bootstrap they need.
pub trait ScriptHost {
    fn render(&self, ctx: &Context<'_>, body: &str) -> Result<String, Error>;
}

/// Plain POSIX shell host
#[derive(Debug, Default)]
pub struct ShellHost;

impl ScriptHost for ShellHost {
    fn render(&self, ctx: &Context<'_>, body: &str) -> Result<String, Error> {
        let mut script = ctx.preamble(&ctx.paths.source_root);
        script.push_str(body);
        if !body.ends_with('\n') {
            script.push('\n');
        }
        Ok(script)
    }
}

pub(super) fn script(ctx: &Context<'_>) -> Result<String, Error> {
    let body = ctx.step.script.as_deref().ok_or_else(|| Error::MissingScript {
        part: ctx.part.to_owned(),
        step: ctx.step.name.clone(),
    })?;

    ShellHost.render(ctx, body)
}
