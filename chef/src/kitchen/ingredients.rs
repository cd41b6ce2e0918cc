// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;
use std::path::PathBuf;

use bake_recipe::IngredientRef;
use log::{info, warn};
use thiserror::Error;

use super::Layout;
use crate::ingredient::{self, Ingredient};
use crate::recipe::Parsed;
use crate::util::Filter;
use crate::Env;

/// Environment variables accumulated from build ingredients and
/// published into the sandbox
pub const BUILD_PATH: &str = "CHEF_BUILD_PATH";
pub const BUILD_INCLUDE: &str = "CHEF_BUILD_INCLUDE";
pub const BUILD_LIBS: &str = "CHEF_BUILD_LIBS";
pub const BUILD_CCFLAGS: &str = "CHEF_BUILD_CCFLAGS";
pub const BUILD_LDFLAGS: &str = "CHEF_BUILD_LDFLAGS";

pub struct Materialized {
    /// Ingredient identities in materialization order, recorded in
    /// the cache
    pub identities: Vec<String>,
    /// The five `CHEF_BUILD_*` variables
    pub build_env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Host,
    Build,
    Runtime,
}

/// Unpack every declared ingredient into its target-specific tree and
/// make it consumable: host ingredients land in the rootfs, build
/// ingredients in the per-target ingredient tree, runtime ingredients
/// in the install tree, toolchains under a per-name toolchain dir.
pub fn materialize(env: &Env, layout: &Layout, recipe: &Parsed) -> Result<Materialized, Error> {
    let mut accumulator = Accumulator::default();
    let mut identities = vec![];

    let sets = [
        (Kind::Host, &recipe.environment.host.ingredients),
        (Kind::Build, &recipe.environment.build.ingredients),
        (Kind::Runtime, &recipe.environment.runtime.ingredients),
    ];

    for (kind, references) in sets {
        for reference in references {
            materialize_one(env, layout, kind, reference, &mut accumulator)?;
            identities.push(reference.identity());
        }
    }

    // Platform toolchains are materialized alongside
    for platform in &recipe.platforms {
        let Some(toolchain) = &platform.toolchain else {
            continue;
        };
        if platform.name != layout.platform() {
            continue;
        }

        materialize_one(env, layout, Kind::Build, toolchain, &mut accumulator)?;
        identities.push(toolchain.identity());
    }

    Ok(Materialized {
        identities,
        build_env: accumulator.finish(),
    })
}

/// Recompute the five `CHEF_BUILD_*` variables without extracting
/// anything, for runs where materialization is already done. A build
/// ingredient whose store pack has since vanished is skipped; its tree
/// is already in place, only its flags are lost.
pub fn build_environment(env: &Env, layout: &Layout, recipe: &Parsed) -> Result<BTreeMap<String, String>, Error> {
    let mut accumulator = Accumulator::default();

    let toolchain = recipe
        .platforms
        .iter()
        .filter(|platform| platform.name == layout.platform())
        .filter_map(|platform| platform.toolchain.as_ref());

    for reference in recipe.environment.build.ingredients.iter().chain(toolchain) {
        let Ok(pack_path) = locate(env, reference) else {
            warn!("store pack for {} is gone, flags unavailable", reference.identity());
            continue;
        };
        let ingredient = Ingredient::open(&pack_path)?;

        if ingredient.pack_type() == vafs::PackType::Ingredient {
            accumulator.add(&layout.ingredients().guest, ingredient.options.as_ref());
        }
    }

    Ok(accumulator.finish())
}

fn materialize_one(
    env: &Env,
    layout: &Layout,
    kind: Kind,
    reference: &IngredientRef,
    accumulator: &mut Accumulator,
) -> Result<(), Error> {
    let pack_path = locate(env, reference)?;
    let mut ingredient = Ingredient::open(&pack_path)?;

    let filter = Filter::new(&reference.include_filters).map_err(|source| Error::Filter {
        ingredient: reference.name.clone(),
        source,
    })?;

    match ingredient.pack_type() {
        vafs::PackType::Ingredient => {
            let destination = match kind {
                Kind::Host => layout.rootfs(),
                Kind::Build => layout.ingredients(),
                Kind::Runtime => layout.install(),
            };

            info!("materializing {} -> {}", reference.identity(), destination.host.display());
            ingredient.extract_filtered(&destination.host, |path| filter.matches(path))?;
            ingredient.make_available(&destination.host, &destination.guest)?;

            if kind == Kind::Build {
                accumulator.add(&destination.guest, ingredient.options.as_ref());
            }
        }
        vafs::PackType::Toolchain => {
            let base = layout.toolchains();
            let host = base.host.join(ingredient.name());

            info!("materializing toolchain {} -> {}", reference.identity(), host.display());
            ingredient.extract_filtered(&host, |path| filter.matches(path))?;
        }
        other => {
            warn!("ingredient {} is a {other} pack, skipping", reference.identity());
        }
    }

    Ok(())
}

/// Resolve a reference against the local store:
/// `<store>/<channel>/<name>-<version>.pack`, falling back to the
/// unversioned `<name>.pack`
fn locate(env: &Env, reference: &IngredientRef) -> Result<PathBuf, Error> {
    let channel_dir = env.store_dir().join(&reference.channel);

    let mut candidates = vec![];
    if let Some(version) = &reference.version {
        candidates.push(channel_dir.join(format!("{}-{version}.pack", reference.name)));
    }
    candidates.push(channel_dir.join(format!("{}.pack", reference.name)));

    candidates
        .iter()
        .find(|path| path.exists())
        .cloned()
        .ok_or_else(|| Error::MissingIngredient {
            identity: reference.identity(),
            searched: channel_dir,
        })
}

#[derive(Default)]
struct Accumulator {
    paths: Vec<String>,
    includes: Vec<String>,
    libs: Vec<String>,
    ccflags: Vec<String>,
    ldflags: Vec<String>,
}

impl Accumulator {
    fn add(&mut self, prefix: &std::path::Path, options: Option<&vafs::Options>) {
        let Some(options) = options else { return };

        let prefixed = |dirs: &[String]| {
            dirs.iter()
                .map(|dir| format!("{}{dir}", prefix.display()))
                .collect::<Vec<_>>()
        };

        self.paths.extend(prefixed(&options.bin_dirs));
        self.includes.extend(prefixed(&options.inc_dirs));
        self.libs.extend(prefixed(&options.lib_dirs));
        self.ccflags.extend(options.compiler_flags.iter().cloned());
        self.ldflags.extend(options.linker_flags.iter().cloned());
    }

    fn finish(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BUILD_PATH.to_owned(), self.paths.join(";")),
            (BUILD_INCLUDE.to_owned(), self.includes.join(";")),
            (BUILD_LIBS.to_owned(), self.libs.join(";")),
            (BUILD_CCFLAGS.to_owned(), self.ccflags.join(";")),
            (BUILD_LDFLAGS.to_owned(), self.ldflags.join(";")),
        ])
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("ingredient {identity} not found in store, searched {searched:?}")]
    MissingIngredient { identity: String, searched: PathBuf },
    #[error("ingredient {ingredient} carries an invalid include filter")]
    Filter {
        ingredient: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("ingredient")]
    Ingredient(#[from] ingredient::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
}
