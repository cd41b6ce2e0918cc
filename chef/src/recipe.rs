// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use thiserror::Error;

pub type Parsed = bake_recipe::Recipe;

/// A loaded recipe plus where it was loaded from; the parent directory
/// is the recipe root all relative paths and the cache hang off
#[derive(Debug)]
pub struct Recipe {
    pub path: PathBuf,
    pub parsed: Parsed,
}

impl Recipe {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = resolve_path(path)?;
        let source = fs::read_to_string(&path)?;
        let parsed = bake_recipe::from_str(&source)?;

        Ok(Self { path, parsed })
    }

    /// Directory the recipe lives in
    pub fn root(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    pub fn name(&self) -> &str {
        &self.parsed.project.name
    }
}

pub fn resolve_path(path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let path = path.as_ref();

    // Resolve dir to dir + chef.yaml
    let path = if path.is_dir() { path.join("chef.yaml") } else { path.to_path_buf() };

    // Ensure it's absolute & exists
    fs::canonicalize(&path).map_err(|_| Error::MissingRecipe(path))
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("recipe file does not exist: {0:?}")]
    MissingRecipe(PathBuf),
    #[error("load recipe")]
    Load(#[from] io::Error),
    #[error("decode recipe")]
    Decode(#[from] bake_recipe::Error),
}
