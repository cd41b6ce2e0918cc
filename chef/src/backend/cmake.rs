// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;

use bake_recipe::StepOptions;

use super::{options, Context, Error, Phase};

pub(super) fn script(ctx: &Context<'_>) -> Result<String, Error> {
    let generator = options(ctx.step, |o| match o {
        StepOptions::Cmake(cmake) => cmake.generator.as_deref(),
        _ => None,
    });

    let mut script = ctx.preamble(&ctx.paths.build);
    let build = ctx.paths.build.display();

    match ctx.phase {
        Phase::Generate => {
            let _ = write!(
                script,
                "cmake -S \"{}\" -B \"{build}\" -DCMAKE_INSTALL_PREFIX=\"{}\"",
                ctx.paths.source_root.display(),
                ctx.paths.install.display(),
            );
            if let Some(generator) = generator {
                let _ = write!(script, " -G \"{generator}\"");
            }
            let _ = writeln!(script, " {}", ctx.arguments());
        }
        Phase::Build => {
            let _ = writeln!(script, "cmake --build \"{build}\" {}", ctx.arguments());
            let _ = writeln!(script, "cmake --install \"{build}\"");
        }
        Phase::Clean => {
            let _ = writeln!(script, "cmake --build \"{build}\" --target clean");
        }
    }

    Ok(script)
}
