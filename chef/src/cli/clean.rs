// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use chef::kitchen::StepFilter;
use chef::{kitchen, recipe, Env, Kitchen, Recipe};
use clap::Parser;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(about = "Clear step completions and run clean phases")]
pub struct Command {
    /// Project directory holding the recipe
    #[arg(short, long, default_value = ".")]
    project: PathBuf,
    /// Restrict cleaning to one part, or one part/step
    #[arg(long)]
    step: Option<StepFilter>,
}

pub fn handle(command: Command, env: Env) -> Result<(), Error> {
    let Command { project, step } = command;

    let recipe = Recipe::load(project)?;

    let mut kitchen = Kitchen::new(recipe, env, None, None)?;
    kitchen.clean(step.as_ref())?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("recipe")]
    Recipe(#[from] recipe::Error),
    #[error("kitchen")]
    Kitchen(#[from] kitchen::Error),
}
