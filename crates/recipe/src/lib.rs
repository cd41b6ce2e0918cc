// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

mod validate;

pub use self::validate::ValidateError;

pub fn from_str(s: &str) -> Result<Recipe, Error> {
    let recipe: Recipe = serde_yaml::from_str(s)?;
    recipe.validate()?;
    Ok(recipe)
}

pub fn from_slice(bytes: &[u8]) -> Result<Recipe, Error> {
    let recipe: Recipe = serde_yaml::from_slice(bytes)?;
    recipe.validate()?;
    Ok(recipe)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recipe {
    pub project: Project,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub packs: Vec<Pack>,
}

impl Recipe {
    /// Every declared ingredient reference, across host, build and
    /// runtime environments
    pub fn ingredients(&self) -> impl Iterator<Item = &IngredientRef> {
        self.environment
            .host
            .ingredients
            .iter()
            .chain(&self.environment.build.ingredients)
            .chain(&self.environment.runtime.ingredients)
            .chain(self.platforms.iter().filter_map(|platform| platform.toolchain.as_ref()))
    }

    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Check a requested target against the declared platforms. A
    /// platform declaring no archs accepts any arch.
    pub fn validate_target(&self, platform: &str, arch: &str) -> Result<(), ValidateError> {
        let Some(declared) = self.platforms.iter().find(|p| p.name == platform) else {
            return Err(ValidateError::UnknownPlatform {
                platform: platform.to_owned(),
            });
        };

        if declared.archs.is_empty() || declared.archs.iter().any(|a| a == arch) {
            Ok(())
        } else {
            Err(ValidateError::UnsupportedArch {
                platform: platform.to_owned(),
                arch: arch.to_owned(),
            })
        }
    }

    pub fn validate(&self) -> Result<(), ValidateError> {
        validate::validate(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub eula: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    /// Project icon, relative to the recipe directory
    #[serde(default)]
    pub icon: Option<PathBuf>,
    pub author: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub host: HostEnvironment,
    #[serde(default)]
    pub build: BuildEnvironment,
    #[serde(default)]
    pub runtime: RuntimeEnvironment,
    #[serde(default)]
    pub hooks: Hooks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostEnvironment {
    /// OS packages provisioned into the rootfs, in declaration order
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<IngredientRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildEnvironment {
    #[serde(default)]
    pub ingredients: Vec<IngredientRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeEnvironment {
    #[serde(default)]
    pub ingredients: Vec<IngredientRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub bash: Option<String>,
    #[serde(default)]
    pub powershell: Option<String>,
}

/// Reference to a previously built pack consumed as a dependency.
///
/// Accepts a bare string (`name` or `channel/name`) or the full
/// mapping form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientRef {
    pub name: String,
    pub channel: String,
    pub version: Option<String>,
    pub include_filters: Vec<String>,
}

impl IngredientRef {
    /// Stable identity recorded in the cache's ingredient set
    pub fn identity(&self) -> String {
        format!(
            "{}/{}/{}",
            self.channel,
            self.name,
            self.version.as_deref().unwrap_or("latest")
        )
    }
}

fn default_channel() -> String {
    "stable".to_owned()
}

impl<'de> Deserialize<'de> for IngredientRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Debug, Deserialize)]
        struct Inner {
            name: String,
            #[serde(default = "default_channel")]
            channel: String,
            #[serde(default)]
            version: Option<String>,
            #[serde(default, rename = "include-filters")]
            include_filters: Vec<String>,
        }

        #[derive(Debug, Deserialize)]
        #[serde(untagged)]
        enum Outer {
            Shorthand(String),
            Inner(Inner),
        }

        match Outer::deserialize(deserializer)? {
            Outer::Shorthand(reference) => {
                let (channel, name) = match reference.split_once('/') {
                    Some((channel, name)) => (channel.to_owned(), name.to_owned()),
                    None => (default_channel(), reference),
                };

                Ok(IngredientRef {
                    name,
                    channel,
                    version: None,
                    include_filters: vec![],
                })
            }
            Outer::Inner(inner) => Ok(IngredientRef {
                name: inner.name,
                channel: inner.channel,
                version: inner.version,
                include_filters: inner.include_filters,
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    pub name: String,
    #[serde(default)]
    pub toolchain: Option<IngredientRef>,
    /// Empty means the platform builds for any arch
    #[serde(default)]
    pub archs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    pub name: String,
    #[serde(default)]
    pub toolchain: Option<String>,
    pub source: Source,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Path {
        path: PathBuf,
    },
    Url {
        url: Url,
    },
    Git {
        git: Url,
        #[serde(default)]
        branch: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepType {
    Generate,
    Build,
    Script,
}

/// Backend driving a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum System {
    Configure,
    Cmake,
    Make,
    Meson,
    Ninja,
    Script,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub system: System,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub options: Option<StepOptions>,
    /// Script steps carry their script body inline
    #[serde(default)]
    pub script: Option<String>,
}

/// Per-backend option block; the key names the backend it belongs to
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOptions {
    Configure(ConfigureOptions),
    Cmake(CmakeOptions),
    Make(MakeOptions),
    Meson(MesonOptions),
    Ninja(NinjaOptions),
    Script(ScriptOptions),
}

impl StepOptions {
    /// The backend this option block is only legal under
    pub fn system(&self) -> System {
        match self {
            StepOptions::Configure(_) => System::Configure,
            StepOptions::Cmake(_) => System::Cmake,
            StepOptions::Make(_) => System::Make,
            StepOptions::Meson(_) => System::Meson,
            StepOptions::Ninja(_) => System::Ninja,
            StepOptions::Script(_) => System::Script,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigureOptions {}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CmakeOptions {
    #[serde(default)]
    pub generator: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MakeOptions {
    /// Run make in the source tree instead of the build tree
    #[serde(default, rename = "in-tree")]
    pub in_tree: bool,
    /// `-j<parallel>` when non-zero
    #[serde(default)]
    pub parallel: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MesonOptions {
    #[serde(default, rename = "cross-file")]
    pub cross_file: Option<PathBuf>,
    #[serde(default)]
    pub wraps: Vec<Wrap>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wrap {
    pub name: String,
    /// Must name a declared ingredient
    pub ingredient: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NinjaOptions {}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptOptions {
    #[serde(default)]
    pub shell: Option<String>,
}

/// Pack output types; the recipe must be explicit, there is no default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackType {
    Bootloader,
    Os,
    Ingredient,
    Content,
    Application,
    Toolchain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(rename = "type")]
    pub pack_type: PackType,
    #[serde(default)]
    pub filters: Vec<String>,
    /// Only legal on application packs
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub options: Option<PackOptions>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandType {
    #[default]
    Executable,
    Daemon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default, rename = "type")]
    pub command_type: CommandType,
    pub path: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<PathBuf>,
}

/// Consumption data emitted into ingredient packs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackOptions {
    #[serde(default, rename = "bin-paths")]
    pub bin_paths: Vec<String>,
    #[serde(default, rename = "inc-paths")]
    pub inc_paths: Vec<String>,
    #[serde(default, rename = "lib-paths")]
    pub lib_paths: Vec<String>,
    #[serde(default, rename = "compiler-flags")]
    pub compiler_flags: Vec<String>,
    #[serde(default, rename = "linker-flags")]
    pub linker_flags: Vec<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("decode recipe")]
    Decode(#[from] serde_yaml::Error),
    #[error(transparent)]
    Validate(#[from] ValidateError),
}

#[cfg(test)]
mod test {
    use super::*;

    pub(crate) const FULL_RECIPE: &str = r#"
project:
  name: editor
  summary: A text editor
  version: "1.2"
  author: Jane Doe
  email: jane@example.com
environment:
  host:
    packages: [build-essential, pkg-config]
    ingredients:
      - stable/cmake-tools
  build:
    ingredients:
      - name: libfoo
        channel: devel
        version: "2.1"
        include-filters: [include/**, lib/**]
  runtime:
    ingredients: []
  hooks:
    bash: |
      echo hello
platforms:
  - name: vali
    toolchain:
      name: gcc-cross
      channel: stable
    archs: [amd64, arm64]
  - name: host
parts:
  - name: core
    source:
      path: .
    steps:
      - name: configure
        type: generate
        system: meson
        options:
          meson:
            cross-file: cross/amd64.txt
            wraps:
              - name: foo
                ingredient: libfoo
      - name: build
        type: build
        system: ninja
        depends: [configure]
packs:
  - name: editor
    type: application
    filters: [bin]
    commands:
      - name: editor
        type: executable
        path: /bin/editor
  - name: editor-dev
    type: ingredient
    filters: [include, lib]
    options:
      bin-paths: [/bin]
      inc-paths: [/include]
      lib-paths: [/lib]
"#;

    #[test]
    fn parse_full_recipe() {
        let recipe = from_str(FULL_RECIPE).unwrap();

        assert_eq!(recipe.project.name, "editor");
        assert_eq!(recipe.environment.host.packages.len(), 2);

        let host_ingredient = &recipe.environment.host.ingredients[0];
        assert_eq!(host_ingredient.name, "cmake-tools");
        assert_eq!(host_ingredient.channel, "stable");

        let build_ingredient = &recipe.environment.build.ingredients[0];
        assert_eq!(build_ingredient.identity(), "devel/libfoo/2.1");
        assert_eq!(build_ingredient.include_filters.len(), 2);

        assert_eq!(recipe.platforms.len(), 2);
        assert!(recipe.environment.hooks.bash.is_some());

        let part = recipe.part("core").unwrap();
        assert_eq!(part.steps.len(), 2);
        assert_eq!(part.steps[0].system, System::Meson);
        assert!(matches!(part.source, Source::Path { .. }));

        assert_eq!(recipe.packs[0].pack_type, PackType::Application);
        assert_eq!(recipe.packs[1].pack_type, PackType::Ingredient);
    }

    #[test]
    fn pack_type_is_mandatory() {
        let yaml = r#"
project:
  name: p
  summary: s
  version: "1.0"
  author: a
  email: e
packs:
  - name: out
"#;
        assert!(matches!(from_str(yaml), Err(Error::Decode(_))));
    }

    #[test]
    fn target_validation_honors_empty_archs() {
        let recipe = from_str(FULL_RECIPE).unwrap();

        recipe.validate_target("vali", "amd64").unwrap();
        assert!(matches!(
            recipe.validate_target("vali", "riscv64"),
            Err(ValidateError::UnsupportedArch { .. })
        ));

        // `host` declares no archs, any arch goes
        recipe.validate_target("host", "riscv64").unwrap();

        assert!(matches!(
            recipe.validate_target("windows", "amd64"),
            Err(ValidateError::UnknownPlatform { .. })
        ));
    }
}
