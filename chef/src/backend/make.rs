// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;

use bake_recipe::{MakeOptions, StepOptions};

use super::{options, Context, Error, Phase};

pub(super) fn script(ctx: &Context<'_>) -> Result<String, Error> {
    let defaults = MakeOptions::default();
    let make = options(ctx.step, |o| match o {
        StepOptions::Make(make) => Some(make),
        _ => None,
    })
    .unwrap_or(&defaults);

    // In-tree builds run from the source root
    let work_dir = if make.in_tree {
        &ctx.paths.source_root
    } else {
        &ctx.paths.build
    };

    let jobs = if make.parallel > 0 {
        format!("-j{} ", make.parallel)
    } else {
        String::new()
    };

    let mut script = ctx.preamble(work_dir);

    match ctx.phase {
        Phase::Build => {
            let _ = writeln!(script, "make {jobs}{}", ctx.arguments());
            let _ = writeln!(script, "make install DESTDIR=\"{}\"", ctx.paths.install.display());
        }
        Phase::Clean => {
            let _ = writeln!(script, "make clean");
        }
        Phase::Generate => return Err(ctx.unsupported()),
    }

    Ok(script)
}
