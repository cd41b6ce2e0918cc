// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::{env, io};

use thiserror::Error;

use crate::util;

/// Environment variables consumed from the caller
pub const TARGET_PLATFORM: &str = "CHEF_TARGET_PLATFORM";
pub const TARGET_ARCH: &str = "CHEF_TARGET_ARCH";
pub const PACKAGE_MANAGER: &str = "CHEF_PACKAGE_MANAGER";

/// Host side environment: where the kitchens, the ingredient store and
/// overrides from the process environment live
pub struct Env {
    pub home_dir: PathBuf,
    pub chef_dir: PathBuf,
    pub target_platform: Option<String>,
    pub target_arch: Option<String>,
    pub package_manager: String,
}

impl Env {
    pub fn new(chef_root: Option<PathBuf>) -> Result<Self, Error> {
        let home_dir = dirs::home_dir().ok_or(Error::UserHome)?;
        let chef_dir = chef_root.unwrap_or_else(|| home_dir.join(".chef"));

        util::ensure_dir_exists(&chef_dir)?;

        Ok(Self {
            home_dir,
            chef_dir,
            target_platform: env::var(TARGET_PLATFORM).ok(),
            target_arch: env::var(TARGET_ARCH).ok(),
            package_manager: env::var(PACKAGE_MANAGER).unwrap_or_else(|_| "apt-get".to_owned()),
        })
    }

    /// Root of all per-recipe kitchens
    pub fn kitchen_dir(&self) -> PathBuf {
        self.chef_dir.join("kitchen")
    }

    /// Local store previously built packs are consumed from
    pub fn store_dir(&self) -> PathBuf {
        self.chef_dir.join("store")
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find home dir, $HOME env not set")]
    UserHome,
    #[error("io")]
    Io(#[from] io::Error),
}
