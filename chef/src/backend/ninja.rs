// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;

use super::{Context, Error, Phase};

pub(super) fn script(ctx: &Context<'_>) -> Result<String, Error> {
    let mut script = ctx.preamble(&ctx.paths.build);

    match ctx.phase {
        Phase::Build => {
            let _ = writeln!(script, "ninja {}", ctx.arguments());
            let _ = writeln!(script, "ninja install");
        }
        Phase::Clean => {
            let _ = writeln!(script, "ninja clean");
        }
        Phase::Generate => return Err(ctx.unsupported()),
    }

    Ok(script)
}
