// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;

use super::{Context, Error, Phase};

/// Upstream `configure` only participates in the generate phase;
/// building is make's job.
pub(super) fn script(ctx: &Context<'_>) -> Result<String, Error> {
    if ctx.phase != Phase::Generate {
        return Err(ctx.unsupported());
    }

    let mut script = ctx.preamble(&ctx.paths.build);

    let _ = writeln!(
        script,
        "\"{}\" --prefix=\"{}\" {}",
        ctx.paths.source_root.join("configure").display(),
        ctx.paths.install.display(),
        ctx.arguments(),
    );

    Ok(script)
}
