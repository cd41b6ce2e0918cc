// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The top-level build orchestrator: prepares the per-recipe working
//! tree and rootfs, materializes ingredients, then drives part/step
//! execution inside the container and emits the declared packs.
//!
//! Every phase records its completion in the cache inside a
//! transaction, so an interrupted run resumes at the unfinished tail.

use std::collections::BTreeMap;
use std::io;
use std::str::FromStr;

use bake_recipe::{Part, Source, StepOptions, StepType};
use containerv::{Container, Mount, SpawnOptions};
use fs_err as fs;
use log::info;
use thiserror::Error;

use crate::backend::{self, Phase};
use crate::cache::{self, Cache, PackageDelta};
use crate::package::{self, NoResolver};
use crate::recipe::Recipe;
use crate::{architecture, util, Env};

pub mod ingredients;
pub mod layout;
pub mod rootfs;
pub mod scripts;

pub use self::layout::{Layout, Mapping};

// Keystore flags driving skip decisions
const SETUP_ROOTFS: &str = "setup_rootfs";
const SETUP_INGREDIENTS: &str = "setup_ingredients";
const SETUP_HOOK: &str = "setup_hook";
const KITCHEN_UUID: &str = "kitchen_uuid";

/// `part` or `part/step` selection from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFilter {
    pub part: String,
    pub step: Option<String>,
}

impl StepFilter {
    fn selects_part(&self, part: &str) -> bool {
        self.part == part
    }

    fn selects_step(&self, part: &str, step: &str) -> bool {
        self.selects_part(part) && self.step.as_deref().map_or(true, |s| s == step)
    }
}

impl FromStr for StepFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (part, step) = match s.split_once('/') {
            Some((part, step)) => (part, Some(step.to_owned())),
            None => (s, None),
        };

        if part.is_empty() || step.as_deref() == Some("") {
            return Err(Error::InvalidStepFilter(s.to_owned()));
        }

        Ok(Self {
            part: part.to_owned(),
            step,
        })
    }
}

pub struct Kitchen {
    pub recipe: Recipe,
    pub env: Env,
    pub layout: Layout,
    pub cache: Cache,
    sandbox_env: BTreeMap<String, String>,
}

impl Kitchen {
    /// Resolve the target, open the cache and settle the kitchen
    /// identity. Target resolution order: explicit override, then the
    /// `CHEF_TARGET_*` environment, then the recipe's first platform,
    /// then the host.
    pub fn new(recipe: Recipe, env: Env, platform: Option<String>, arch: Option<String>) -> Result<Self, Error> {
        let platform = platform
            .or_else(|| env.target_platform.clone())
            .or_else(|| recipe.parsed.platforms.first().map(|p| p.name.clone()))
            .unwrap_or_else(|| "host".to_owned());
        let arch = arch
            .or_else(|| env.target_arch.clone())
            .unwrap_or_else(|| architecture::host().to_owned());

        if !recipe.parsed.platforms.is_empty() {
            recipe.parsed.validate_target(&platform, &arch)?;
        }

        let mut cache = Cache::open(recipe.root())?;

        let uuid = match cache.get_string(KITCHEN_UUID) {
            Some(uuid) => uuid,
            None => {
                let uuid = uuid::Uuid::new_v4().to_string();
                cache.begin()?;
                cache.set_string(KITCHEN_UUID, &uuid)?;
                cache.commit()?;
                uuid
            }
        };

        let layout = Layout::new(&env, &uuid, &platform, &arch, recipe.root());
        let sandbox_env = base_sandbox_env(&platform, &arch);

        Ok(Self {
            recipe,
            env,
            layout,
            cache,
            sandbox_env,
        })
    }

    /// Run the full orchestration: rootfs, ingredients, helper
    /// scripts, container, package update, hook, parts, packs.
    pub fn build(&mut self, filter: Option<&StepFilter>) -> Result<(), Error> {
        self.setup_rootfs()?;
        self.materialize_ingredients()?;

        let diff = self
            .cache
            .package_diff(&self.recipe.parsed.environment.host.packages);
        if !diff.is_empty() {
            scripts::write_update_script(&self.layout, &diff, &self.env.package_manager)?;
        }
        if let Some(hook) = &self.recipe.parsed.environment.hooks.bash {
            scripts::write_hook_script(&self.layout, hook)?;
        }

        let mut container = self.create_container()?;
        let run = self.run_inside(&mut container, &diff, filter);

        // The host-side tree survives for the next incremental run
        container.destroy()?;

        run
    }

    fn run_inside(
        &mut self,
        container: &mut Container,
        diff: &[PackageDelta],
        filter: Option<&StepFilter>,
    ) -> Result<(), Error> {
        self.update_packages(container, diff)?;
        self.run_setup_hook(container)?;
        self.run_parts(container, filter)?;
        self.emit_packs()
    }

    /// Clear completion flags and run each selected step's clean phase
    pub fn clean(&mut self, filter: Option<&StepFilter>) -> Result<(), Error> {
        let mut container = self.create_container()?;
        let run = self.clean_parts(&mut container, filter);
        container.destroy()?;
        run
    }

    /// Interactive shell inside the build container
    pub fn shell(&mut self) -> Result<(), Error> {
        let mut container = self.create_container()?;
        let run = container.spawn(
            "/bin/bash",
            SpawnOptions::default()
                .args(["--login"])
                .envs(self.sandbox_env.iter())
                .wait(),
        );
        container.destroy()?;
        run.map(|_| ()).map_err(Error::Container)
    }

    /// One command inside the build container
    pub fn exec(&mut self, command: &str, args: &[String]) -> Result<(), Error> {
        let mut container = self.create_container()?;
        let run = container.spawn(
            command,
            SpawnOptions::default().args(args).envs(self.sandbox_env.iter()).wait(),
        );
        container.destroy()?;
        run.map(|_| ()).map_err(Error::Container)
    }

    fn setup_rootfs(&mut self) -> Result<(), Error> {
        if self.cache.get_bool(SETUP_ROOTFS) {
            info!("rootfs already set up, skipping");
            self.layout.ensure()?;
            return Ok(());
        }

        let packages = self.recipe.parsed.environment.host.packages.clone();

        util::remove_dir_if_exists(&self.layout.rootfs().host)?;
        rootfs::bootstrap(&self.layout.rootfs().host, &packages)?;

        self.layout.ensure()?;
        rootfs::chown_workspaces(&self.layout)?;
        rootfs::install_controller(&self.layout)?;

        self.cache.begin()?;
        let diff = self.cache.package_diff(&packages);
        self.cache.commit_package_diff(&diff)?;
        self.cache.set_bool(SETUP_ROOTFS, true)?;
        Ok(self.cache.commit()?)
    }

    fn materialize_ingredients(&mut self) -> Result<(), Error> {
        if self.cache.get_bool(SETUP_INGREDIENTS) {
            info!("ingredients already materialized, skipping");
            // The sandbox still wants the accumulated build environment
            let build_env = ingredients::build_environment(&self.env, &self.layout, &self.recipe.parsed)?;
            self.sandbox_env.extend(build_env);
            return Ok(());
        }

        let materialized = ingredients::materialize(&self.env, &self.layout, &self.recipe.parsed)?;
        self.sandbox_env.extend(materialized.build_env);

        self.cache.begin()?;
        self.cache.set_ingredients(materialized.identities)?;
        self.cache.set_bool(SETUP_INGREDIENTS, true)?;
        Ok(self.cache.commit()?)
    }

    fn create_container(&self) -> Result<Container, Error> {
        let project = self.layout.project();

        let options = containerv::Options::new()
            .hostname("chef")
            .networking(true)
            .work_dir(&self.layout.build().guest)
            .mount(Mount::bind(&project.host, &project.guest).read_only().recursive());

        Ok(Container::create(self.layout.rootfs().host, options)?)
    }

    fn update_packages(&mut self, container: &mut Container, diff: &[PackageDelta]) -> Result<(), Error> {
        if diff.is_empty() {
            return Ok(());
        }

        info!("reconciling {} host package change(s)", diff.len());
        container
            .spawn(
                scripts::UPDATE_SCRIPT,
                SpawnOptions::default().envs(self.sandbox_env.iter()).wait(),
            )
            .map_err(|source| Error::UpdatePackages { source })?;

        self.cache.begin()?;
        self.cache.commit_package_diff(diff)?;
        Ok(self.cache.commit()?)
    }

    fn run_setup_hook(&mut self, container: &mut Container) -> Result<(), Error> {
        if self.recipe.parsed.environment.hooks.bash.is_none() || self.cache.get_bool(SETUP_HOOK) {
            return Ok(());
        }

        container
            .spawn(
                scripts::HOOK_SCRIPT,
                SpawnOptions::default().envs(self.sandbox_env.iter()).wait(),
            )
            .map_err(|source| Error::SetupHook { source })?;

        self.cache.begin()?;
        self.cache.set_bool(SETUP_HOOK, true)?;
        Ok(self.cache.commit()?)
    }

    fn run_parts(&mut self, container: &mut Container, filter: Option<&StepFilter>) -> Result<(), Error> {
        for part in &self.recipe.parsed.parts {
            if filter.is_some_and(|f| !f.selects_part(&part.name)) {
                continue;
            }

            if !self.cache.is_part_sourced(&part.name) {
                ensure_source_available(&self.layout, part)?;
                self.cache.begin()?;
                self.cache.mark_part_sourced(&part.name)?;
                self.cache.commit()?;
            }

            for step in &part.steps {
                if filter.is_some_and(|f| !f.selects_step(&part.name, &step.name)) {
                    continue;
                }

                if self.cache.is_step_complete(&part.name, &step.name) {
                    info!("step {}/{} complete, skipping", part.name, step.name);
                    continue;
                }

                for dependency in &step.depends {
                    if !self.cache.is_step_complete(&part.name, dependency) {
                        return Err(Error::DependencyNotComplete {
                            part: part.name.clone(),
                            step: step.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }

                write_meson_wraps(&self.recipe, &self.layout, part, step)?;

                let phase = match step.step_type {
                    StepType::Generate => Phase::Generate,
                    StepType::Build | StepType::Script => Phase::Build,
                };

                let script = backend::script(&backend::Context {
                    part: &part.name,
                    step,
                    phase,
                    paths: backend_paths(&self.layout, part),
                    process_environment: &self.sandbox_env,
                })?;

                info!("running step {}/{}", part.name, step.name);
                container.script(&script).map_err(|source| Error::Step {
                    part: part.name.clone(),
                    step: step.name.clone(),
                    source,
                })?;

                self.cache.begin()?;
                self.cache.mark_step_complete(&part.name, &step.name)?;
                self.cache.commit()?;
            }
        }

        Ok(())
    }

    fn clean_parts(&mut self, container: &mut Container, filter: Option<&StepFilter>) -> Result<(), Error> {
        for part in &self.recipe.parsed.parts {
            if filter.is_some_and(|f| !f.selects_part(&part.name)) {
                continue;
            }

            for step in &part.steps {
                if filter.is_some_and(|f| !f.selects_step(&part.name, &step.name)) {
                    continue;
                }

                let rendered = backend::script(&backend::Context {
                    part: &part.name,
                    step,
                    phase: Phase::Clean,
                    paths: backend_paths(&self.layout, part),
                    process_environment: &self.sandbox_env,
                });

                match rendered {
                    Ok(script) => {
                        info!("cleaning step {}/{}", part.name, step.name);
                        container.script(&script).map_err(|source| Error::Step {
                            part: part.name.clone(),
                            step: step.name.clone(),
                            source,
                        })?;
                    }
                    // Backends without a clean phase only lose the flag
                    Err(backend::Error::UnsupportedPhase { .. }) => {}
                    Err(e) => return Err(e.into()),
                }

                self.cache.begin()?;
                self.cache.clear_step_complete(&part.name, &step.name)?;
                self.cache.commit()?;
            }
        }

        Ok(())
    }

    fn emit_packs(&self) -> Result<(), Error> {
        let architecture = architecture::parse(self.layout.arch()).ok_or_else(|| Error::UnknownArch {
            arch: self.layout.arch().to_owned(),
        })?;

        for pack in &self.recipe.parsed.packs {
            let emitted = package::emit(
                &package::Request {
                    pack,
                    project: &self.recipe.parsed.project,
                    install_root: &self.layout.install().host,
                    project_dir: self.recipe.root(),
                    output_dir: &self.layout.output(),
                    architecture,
                },
                &NoResolver,
            )?;

            if let Some(path) = emitted {
                info!("emitted {}", path.display());
            }
        }

        Ok(())
    }
}

/// Container-view paths one part's steps operate over
fn backend_paths(layout: &Layout, part: &Part) -> backend::Paths {
    let project = layout.project();

    let source_root = match &part.source {
        Source::Path { path } => {
            if path == std::path::Path::new(".") {
                project.guest
            } else {
                project.guest.join(path)
            }
        }
        // Fetched sources are staged into the part's build tree
        Source::Url { .. } | Source::Git { .. } => layout.part_build(&part.name).guest.join("source"),
    };

    backend::Paths {
        source_root,
        build: layout.part_build(&part.name).guest,
        install: layout.install().guest,
        ingredients: layout.ingredients().guest,
    }
}

/// Path sources ship with the project; fetched sources must have been
/// staged already, fetching is outside this tool
fn ensure_source_available(layout: &Layout, part: &Part) -> Result<(), Error> {
    match &part.source {
        Source::Path { .. } => Ok(()),
        Source::Url { .. } | Source::Git { .. } => {
            let staged = layout.part_build(&part.name).host.join("source");
            if staged.exists() {
                Ok(())
            } else {
                Err(Error::MissingSource {
                    part: part.name.clone(),
                })
            }
        }
    }
}

/// Meson wrap files are written host-side, before the container sees
/// the step; the project bind is read-only inside
fn write_meson_wraps(
    recipe: &Recipe,
    layout: &Layout,
    part: &Part,
    step: &bake_recipe::Step,
) -> Result<(), Error> {
    let Some(StepOptions::Meson(meson)) = &step.options else {
        return Ok(());
    };
    if meson.wraps.is_empty() {
        return Ok(());
    }

    let source_root = match &part.source {
        Source::Path { path } => {
            if path == std::path::Path::new(".") {
                recipe.root().to_path_buf()
            } else {
                recipe.root().join(path)
            }
        }
        Source::Url { .. } | Source::Git { .. } => layout.part_build(&part.name).host.join("source"),
    };

    let subprojects = source_root.join("subprojects");
    util::ensure_dir_exists(&subprojects)?;

    for wrap in &meson.wraps {
        fs::write(
            subprojects.join(format!("{}.wrap", wrap.name)),
            backend::wrap_file_contents(wrap, &layout.ingredients().guest),
        )?;
    }

    Ok(())
}

fn base_sandbox_env(platform: &str, arch: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("PATH".to_owned(), "/usr/bin:/usr/sbin:/bin:/sbin".to_owned()),
        ("GIT_SSL_NO_VERIFY".to_owned(), "1".to_owned()),
        ("CHEF_HOST_PLATFORM".to_owned(), std::env::consts::OS.to_owned()),
        ("CHEF_HOST_ARCH".to_owned(), architecture::host().to_owned()),
        ("CHEF_TARGET_PLATFORM".to_owned(), platform.to_owned()),
        ("CHEF_TARGET_ARCH".to_owned(), arch.to_owned()),
    ]);

    for key in [
        ingredients::BUILD_PATH,
        ingredients::BUILD_INCLUDE,
        ingredients::BUILD_LIBS,
        ingredients::BUILD_CCFLAGS,
        ingredients::BUILD_LDFLAGS,
    ] {
        env.insert(key.to_owned(), String::new());
    }

    env
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid step filter `{0}`, expected part or part/step")]
    InvalidStepFilter(String),
    #[error("step {part}/{step} depends on incomplete step {dependency}")]
    DependencyNotComplete {
        part: String,
        step: String,
        dependency: String,
    },
    #[error("part {part} has a fetched source that is not staged; network fetching is out of scope")]
    MissingSource { part: String },
    #[error("no pack architecture tag for target arch `{arch}`")]
    UnknownArch { arch: String },
    #[error("update packages")]
    UpdatePackages {
        #[source]
        source: containerv::Error,
    },
    #[error("setup hook")]
    SetupHook {
        #[source]
        source: containerv::Error,
    },
    #[error("step {part}/{step}")]
    Step {
        part: String,
        step: String,
        #[source]
        source: containerv::Error,
    },
    #[error("config")]
    Config(#[from] bake_recipe::ValidateError),
    #[error("cache")]
    Cache(#[from] cache::Error),
    #[error("container")]
    Container(#[from] containerv::Error),
    #[error("rootfs")]
    Rootfs(#[from] rootfs::Error),
    #[error("ingredients")]
    Ingredients(#[from] ingredients::Error),
    #[error("backend")]
    Backend(#[from] backend::Error),
    #[error("pack")]
    Pack(#[from] package::Error),
    #[error("io")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn step_filter_parses() {
        let filter: StepFilter = "core".parse().unwrap();
        assert_eq!(filter.part, "core");
        assert_eq!(filter.step, None);
        assert!(filter.selects_part("core"));
        assert!(filter.selects_step("core", "anything"));
        assert!(!filter.selects_part("other"));

        let filter: StepFilter = "core/build".parse().unwrap();
        assert_eq!(filter.step.as_deref(), Some("build"));
        assert!(filter.selects_step("core", "build"));
        assert!(!filter.selects_step("core", "configure"));

        assert!("".parse::<StepFilter>().is_err());
        assert!("core/".parse::<StepFilter>().is_err());
    }

    #[test]
    fn sandbox_env_baseline() {
        let env = base_sandbox_env("vali", "amd64");

        assert_eq!(env["GIT_SSL_NO_VERIFY"], "1");
        assert_eq!(env["CHEF_TARGET_PLATFORM"], "vali");
        assert_eq!(env["CHEF_TARGET_ARCH"], "amd64");
        assert_eq!(env[ingredients::BUILD_PATH], "");
        assert_eq!(env[ingredients::BUILD_LDFLAGS], "");
    }

    fn write_recipe(dir: &std::path::Path) {
        fs::write(
            dir.join("chef.yaml"),
            r#"
project:
  name: editor
  summary: A text editor
  version: "1.2"
  author: Jane Doe
  email: jane@example.com
parts:
  - name: core
    source:
      path: .
    steps:
      - name: build
        type: build
        system: make
packs:
  - name: editor
    type: application
"#,
        )
        .unwrap();
    }

    #[test]
    fn kitchen_identity_is_stable() {
        let project = tempfile::tempdir().unwrap();
        let chef_root = tempfile::tempdir().unwrap();
        write_recipe(project.path());

        let env = || Env::new(Some(chef_root.path().to_path_buf())).unwrap();
        let recipe = || Recipe::load(project.path()).unwrap();

        let first = Kitchen::new(recipe(), env(), None, None).unwrap();
        let uuid = first.cache.get_string("kitchen_uuid").unwrap();
        let rootfs = first.layout.rootfs().host;
        drop(first);

        let second = Kitchen::new(recipe(), env(), None, None).unwrap();
        assert_eq!(second.cache.get_string("kitchen_uuid").unwrap(), uuid);
        assert_eq!(second.layout.rootfs().host, rootfs);
    }

    #[test]
    fn target_resolution_defaults_to_host() {
        let project = tempfile::tempdir().unwrap();
        let chef_root = tempfile::tempdir().unwrap();
        write_recipe(project.path());

        let env = Env::new(Some(chef_root.path().to_path_buf())).unwrap();
        let recipe = Recipe::load(project.path()).unwrap();

        let kitchen = Kitchen::new(recipe, env, None, None).unwrap();
        assert_eq!(kitchen.layout.platform(), "host");
        assert_eq!(kitchen.layout.arch(), architecture::host());
    }

    #[test]
    fn backend_paths_follow_source_kind() {
        let project = tempfile::tempdir().unwrap();
        let chef_root = tempfile::tempdir().unwrap();
        write_recipe(project.path());

        let env = Env::new(Some(chef_root.path().to_path_buf())).unwrap();
        let recipe = Recipe::load(project.path()).unwrap();
        let kitchen = Kitchen::new(recipe, env, None, None).unwrap();

        let part = &kitchen.recipe.parsed.parts[0];
        let paths = backend_paths(&kitchen.layout, part);

        assert_eq!(paths.source_root, std::path::Path::new("/chef/project"));
        assert!(paths.build.starts_with("/chef/build"));
        assert!(paths.install.starts_with("/chef/install"));
    }
}
