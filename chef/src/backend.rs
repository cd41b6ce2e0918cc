// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Uniform contract between the orchestrator and the build backends.
//!
//! Every backend receives the same [`Context`] and renders a shell
//! script realizing its phase; the orchestrator runs that script inside
//! the container and treats a non-zero exit as a fatal step error.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use bake_recipe::{Step, StepOptions, System};
use thiserror::Error;

mod cmake;
mod configure;
mod make;
mod meson;
mod ninja;
mod script;

pub use self::meson::wrap_file_contents;
pub use self::script::{ScriptHost, ShellHost};

/// Paths a backend operates over, all container view
#[derive(Debug, Clone)]
pub struct Paths {
    pub source_root: PathBuf,
    pub build: PathBuf,
    pub install: PathBuf,
    pub ingredients: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Generate,
    Build,
    Clean,
}

pub struct Context<'a> {
    pub part: &'a str,
    pub step: &'a Step,
    pub phase: Phase,
    pub paths: Paths,
    /// Environment published into the sandbox for every step
    pub process_environment: &'a BTreeMap<String, String>,
}

impl Context<'_> {
    fn arguments(&self) -> String {
        self.step.arguments.join(" ")
    }

    /// Script header: strict mode, process + step environment (the
    /// step's own variables win), then chdir into `work_dir`
    fn preamble(&self, work_dir: &std::path::Path) -> String {
        let mut script = String::from("#!/bin/sh\nset -e\n");

        for (key, value) in self.process_environment {
            if !self.step.env.contains_key(key) {
                let _ = writeln!(script, "export {key}=\"{}\"", shell_escape(value));
            }
        }
        for (key, value) in &self.step.env {
            let _ = writeln!(script, "export {key}=\"{}\"", shell_escape(value));
        }

        let _ = writeln!(script, "mkdir -p \"{}\"", work_dir.display());
        let _ = writeln!(script, "cd \"{}\"", work_dir.display());

        script
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedPhase {
            part: self.part.to_owned(),
            step: self.step.name.clone(),
            system: self.step.system,
            phase: self.phase,
        }
    }
}

fn shell_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('$', "\\$")
}

/// Render the script realizing `ctx` under its step's backend
pub fn script(ctx: &Context<'_>) -> Result<String, Error> {
    match ctx.step.system {
        System::Configure => configure::script(ctx),
        System::Cmake => cmake::script(ctx),
        System::Make => make::script(ctx),
        System::Meson => meson::script(ctx),
        System::Ninja => ninja::script(ctx),
        System::Script => script::script(ctx),
    }
}

/// Fetch the step's option block, already validated to match the
/// backend by the recipe parser
fn options<'a, T: ?Sized>(step: &'a Step, select: impl Fn(&'a StepOptions) -> Option<&'a T>) -> Option<&'a T> {
    step.options.as_ref().and_then(select)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("step {part}/{step} is a script step without a script body")]
    MissingScript { part: String, step: String },
    #[error("step {part}/{step}: {system} has no {phase} phase")]
    UnsupportedPhase {
        part: String,
        step: String,
        system: System,
        phase: Phase,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    pub(super) fn fixture_step(system: &str, extra: &str) -> Step {
        let yaml = format!(
            r#"
name: fixture
type: build
system: {system}
arguments: [--fast]
env:
  STEP_VAR: step value
{extra}
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    pub(super) fn fixture_paths() -> Paths {
        Paths {
            source_root: "/chef/project".into(),
            build: "/chef/build/vali/amd64/core".into(),
            install: "/chef/install/vali/amd64".into(),
            ingredients: "/chef/ingredients/vali/amd64".into(),
        }
    }

    fn context<'a>(step: &'a Step, phase: Phase, env: &'a BTreeMap<String, String>) -> Context<'a> {
        Context {
            part: "core",
            step,
            phase,
            paths: fixture_paths(),
            process_environment: env,
        }
    }

    #[test]
    fn preamble_exports_and_moves() {
        let step = fixture_step("make", "");
        let env = BTreeMap::from([("CHEF_BUILD_PATH".to_owned(), "/chef/ingredients/bin".to_owned())]);
        let ctx = context(&step, Phase::Build, &env);

        let script = script(&ctx).unwrap();
        assert!(script.starts_with("#!/bin/sh\nset -e\n"));
        assert!(script.contains("export CHEF_BUILD_PATH=\"/chef/ingredients/bin\""));
        assert!(script.contains("export STEP_VAR=\"step value\""));
        assert!(script.contains("cd \"/chef/build/vali/amd64/core\""));
    }

    #[test]
    fn step_env_wins_over_process_env() {
        let step = fixture_step("make", "");
        let env = BTreeMap::from([("STEP_VAR".to_owned(), "process value".to_owned())]);
        let ctx = context(&step, Phase::Build, &env);

        let script = script(&ctx).unwrap();
        assert!(script.contains("export STEP_VAR=\"step value\""));
        assert!(!script.contains("process value"));
    }

    #[test]
    fn configure_generate() {
        let step = fixture_step("configure", "");
        let env = BTreeMap::new();
        let ctx = context(&step, Phase::Generate, &env);

        let script = script(&ctx).unwrap();
        assert!(script.contains("\"/chef/project/configure\" --prefix=\"/chef/install/vali/amd64\" --fast"));

        // configure has nothing to do at build time
        let ctx = context(&step, Phase::Build, &env);
        assert!(matches!(script_err(&ctx), Error::UnsupportedPhase { .. }));
    }

    #[test]
    fn cmake_phases() {
        let step = fixture_step("cmake", "");
        let env = BTreeMap::new();

        let generated = script(&context(&step, Phase::Generate, &env)).unwrap();
        assert!(generated.contains(
            "cmake -S \"/chef/project\" -B \"/chef/build/vali/amd64/core\" \
             -DCMAKE_INSTALL_PREFIX=\"/chef/install/vali/amd64\" --fast"
        ));

        let built = script(&context(&step, Phase::Build, &env)).unwrap();
        assert!(built.contains("cmake --build \"/chef/build/vali/amd64/core\""));
        assert!(built.contains("cmake --install \"/chef/build/vali/amd64/core\""));

        let cleaned = script(&context(&step, Phase::Clean, &env)).unwrap();
        assert!(cleaned.contains("--target clean"));
    }

    #[test]
    fn make_options_respected() {
        let step = fixture_step(
            "make",
            r#"options:
  make:
    in-tree: true
    parallel: 7
"#,
        );
        let env = BTreeMap::new();

        let built = script(&context(&step, Phase::Build, &env)).unwrap();
        // in-tree runs from the source root
        assert!(built.contains("cd \"/chef/project\""));
        assert!(built.contains("make -j7 --fast"));
        assert!(built.contains("make install DESTDIR=\"/chef/install/vali/amd64\""));

        let cleaned = script(&context(&step, Phase::Clean, &env)).unwrap();
        assert!(cleaned.contains("make clean"));
    }

    #[test]
    fn meson_cross_file() {
        let step = fixture_step(
            "meson",
            r#"options:
  meson:
    cross-file: cross/amd64.txt
"#,
        );
        let env = BTreeMap::new();

        let generated = script(&context(&step, Phase::Generate, &env)).unwrap();
        assert!(generated.contains(
            "meson setup \"/chef/build/vali/amd64/core\" \"/chef/project\" --cross-file=\"cross/amd64.txt\" --fast"
        ));

        let built = script(&context(&step, Phase::Build, &env)).unwrap();
        assert!(built.contains("meson compile -C \"/chef/build/vali/amd64/core\""));
        assert!(built.contains("meson install -C \"/chef/build/vali/amd64/core\" --destdir \"/chef/install/vali/amd64\""));
    }

    #[test]
    fn ninja_phases() {
        let step = fixture_step("ninja", "");
        let env = BTreeMap::new();

        let built = script(&context(&step, Phase::Build, &env)).unwrap();
        assert!(built.contains("ninja --fast"));
        assert!(built.contains("ninja install"));

        let cleaned = script(&context(&step, Phase::Clean, &env)).unwrap();
        assert!(cleaned.contains("ninja clean"));

        assert!(matches!(
            script_err(&context(&step, Phase::Generate, &env)),
            Error::UnsupportedPhase { .. }
        ));
    }

    #[test]
    fn script_backend_requires_body() {
        let step = fixture_step("script", "");
        let env = BTreeMap::new();
        assert!(matches!(
            script_err(&context(&step, Phase::Build, &env)),
            Error::MissingScript { .. }
        ));

        let step = fixture_step(
            "script",
            r#"script: |
  echo building
"#,
        );
        let rendered = script(&context(&step, Phase::Build, &env)).unwrap();
        assert!(rendered.contains("echo building"));
        assert!(rendered.contains("cd \"/chef/project\""));
    }

    fn script_err(ctx: &Context<'_>) -> Error {
        script(ctx).unwrap_err()
    }
}
