// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Standalone container control: bring up a recipe's build container
//! for inspection, or run one command inside it.

use std::error::Error as _;
use std::path::PathBuf;

use chef::{Env, Kitchen, Recipe};
use clap::Parser;
use thiserror::Error;

#[derive(Debug, Parser)]
#[command(name = "cvctl", about = "Enter or drive a recipe's build container")]
struct Command {
    /// Override the chef root (defaults to ~/.chef)
    #[arg(long, global = true)]
    chef_root: Option<PathBuf>,
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Start an interactive shell inside the recipe's container
    Start {
        /// Recipe file or project directory
        recipe: PathBuf,
    },
    /// Execute one command inside the recipe's container
    Exec {
        /// Recipe file or project directory
        #[arg(short, long, default_value = ".")]
        recipe: PathBuf,
        command: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = process() {
        let mut sources = vec![error.to_string()];
        let mut source = error.source();
        while let Some(error) = source.take() {
            sources.push(error.to_string());
            source = error.source();
        }
        eprintln!("Error: {}", sources.join(": "));
        std::process::exit(1);
    }
}

fn process() -> Result<(), Error> {
    let Command { chef_root, subcommand } = Command::parse();

    let env = Env::new(chef_root)?;

    match subcommand {
        Subcommand::Start { recipe } => {
            let recipe = Recipe::load(recipe)?;
            Kitchen::new(recipe, env, None, None)?.shell()?;
        }
        Subcommand::Exec { recipe, command, args } => {
            let recipe = Recipe::load(recipe)?;
            Kitchen::new(recipe, env, None, None)?.exec(&command, &args)?;
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
enum Error {
    #[error("env")]
    Env(#[from] chef::env::Error),
    #[error("recipe")]
    Recipe(#[from] chef::recipe::Error),
    #[error("kitchen")]
    Kitchen(#[from] chef::kitchen::Error),
}
