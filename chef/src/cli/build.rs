// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use chef::kitchen::StepFilter;
use chef::{kitchen, recipe, Env, Kitchen, Recipe};
use clap::Parser;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(about = "Run the orchestrator through build, emitting packs")]
pub struct Command {
    /// Project directory holding the recipe
    #[arg(short, long, default_value = ".")]
    project: PathBuf,
    /// Recipe file, resolved against the project directory
    #[arg(short, long)]
    recipe: Option<PathBuf>,
    /// Target platform (else CHEF_TARGET_PLATFORM, else the recipe)
    #[arg(long)]
    platform: Option<String>,
    /// Target arch (else CHEF_TARGET_ARCH, else the host)
    #[arg(long)]
    arch: Option<String>,
    /// Restrict the run to one part, or one part/step
    #[arg(long)]
    step: Option<StepFilter>,
}

pub fn handle(command: Command, env: Env) -> Result<(), Error> {
    let Command {
        project,
        recipe,
        platform,
        arch,
        step,
    } = command;

    let recipe_path = recipe.map(|r| project.join(r)).unwrap_or(project);
    let recipe = Recipe::load(recipe_path)?;

    let mut kitchen = Kitchen::new(recipe, env, platform, arch)?;
    kitchen.build(step.as_ref())?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("recipe")]
    Recipe(#[from] recipe::Error),
    #[error("kitchen")]
    Kitchen(#[from] kitchen::Error),
}
