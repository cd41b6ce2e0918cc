// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;
use std::path::Path;

use bake_recipe::{MesonOptions, StepOptions, Wrap};

use super::{options, Context, Error, Phase};

pub(super) fn script(ctx: &Context<'_>) -> Result<String, Error> {
    let defaults = MesonOptions::default();
    let meson = options(ctx.step, |o| match o {
        StepOptions::Meson(meson) => Some(meson),
        _ => None,
    })
    .unwrap_or(&defaults);

    let mut script = ctx.preamble(&ctx.paths.build);
    let build = ctx.paths.build.display();

    match ctx.phase {
        Phase::Generate => {
            let _ = write!(script, "meson setup \"{build}\" \"{}\"", ctx.paths.source_root.display());
            if let Some(cross_file) = &meson.cross_file {
                let _ = write!(script, " --cross-file=\"{}\"", cross_file.display());
            }
            let _ = writeln!(script, " {}", ctx.arguments());
        }
        Phase::Build => {
            let _ = writeln!(script, "meson compile -C \"{build}\" {}", ctx.arguments());
            let _ = writeln!(script, "meson install -C \"{build}\" --destdir \"{}\"", ctx.paths.install.display());
        }
        Phase::Clean => {
            let _ = writeln!(script, "meson compile -C \"{build}\" --clean");
        }
    }

    Ok(script)
}

/// Contents of a `<name>.wrap` file pointing meson at an extracted
/// ingredient instead of a downloadable subproject.
///
/// The orchestrator writes these into the source tree's `subprojects/`
/// directory host-side, before the container sees the step.
pub fn wrap_file_contents(wrap: &Wrap, ingredients_dir: &Path) -> String {
    format!(
        "[wrap-file]\ndirectory = {}\n",
        ingredients_dir.join(&wrap.ingredient).display()
    )
}
