// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0
use std::path::PathBuf;

use chef::env;
use clap::{Args, Parser};
use thiserror::Error;

mod build;
mod clean;

#[derive(Debug, Parser)]
#[command(name = "bake", about = "Build reproducible artifacts from a recipe")]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Args)]
pub struct Global {
    /// Override the chef root (defaults to ~/.chef)
    #[arg(long, global = true)]
    pub chef_root: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    Build(build::Command),
    Clean(clean::Command),
}

pub fn process() -> Result<(), Error> {
    let Command { global, subcommand } = Command::parse();

    let env = chef::Env::new(global.chef_root)?;

    match subcommand {
        Subcommand::Build(command) => build::handle(command, env)?,
        Subcommand::Clean(command) => clean::handle(command, env)?,
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("build")]
    Build(#[from] build::Error),
    #[error("clean")]
    Clean(#[from] clean::Error),
    #[error("env")]
    Env(#[from] env::Error),
}
