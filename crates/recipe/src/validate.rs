// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::{PackType, Recipe, StepOptions, System};

static NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new("^[A-Za-z0-9_-]+$").expect("valid regex"));

pub(crate) fn validate(recipe: &Recipe) -> Result<(), ValidateError> {
    let ingredient_names: HashSet<&str> = recipe.ingredients().map(|i| i.name.as_str()).collect();

    for part in &recipe.parts {
        check_name("part", &part.name)?;

        let step_names: HashSet<&str> = part.steps.iter().map(|step| step.name.as_str()).collect();

        for step in &part.steps {
            check_name("step", &step.name)?;

            for dependency in &step.depends {
                if !step_names.contains(dependency.as_str()) {
                    return Err(ValidateError::UnknownStepDependency {
                        part: part.name.clone(),
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            if let Some(options) = &step.options {
                if options.system() != step.system {
                    return Err(ValidateError::OptionsSystemMismatch {
                        part: part.name.clone(),
                        step: step.name.clone(),
                        expected: step.system,
                        got: options.system(),
                    });
                }

                if let StepOptions::Meson(meson) = options {
                    for wrap in &meson.wraps {
                        if !ingredient_names.contains(wrap.ingredient.as_str()) {
                            return Err(ValidateError::UnknownWrapIngredient {
                                part: part.name.clone(),
                                step: step.name.clone(),
                                wrap: wrap.name.clone(),
                                ingredient: wrap.ingredient.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    for pack in &recipe.packs {
        if !pack.commands.is_empty() && pack.pack_type != PackType::Application {
            return Err(ValidateError::CommandsOnNonApplication {
                pack: pack.name.clone(),
                pack_type: pack.pack_type,
            });
        }

        for command in &pack.commands {
            check_name("command", &command.name)?;
        }
    }

    Ok(())
}

fn check_name(kind: &'static str, name: &str) -> Result<(), ValidateError> {
    if NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidateError::InvalidName {
            kind,
            name: name.to_owned(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("{kind} name `{name}` may only contain alphanumerics, `_` and `-`")]
    InvalidName { kind: &'static str, name: String },
    #[error("step {part}/{step} depends on `{dependency}` which is not a step of {part}")]
    UnknownStepDependency { part: String, step: String, dependency: String },
    #[error("step {part}/{step} carries {got} options but runs under {expected}")]
    OptionsSystemMismatch {
        part: String,
        step: String,
        expected: System,
        got: System,
    },
    #[error("step {part}/{step} wrap `{wrap}` names undeclared ingredient `{ingredient}`")]
    UnknownWrapIngredient {
        part: String,
        step: String,
        wrap: String,
        ingredient: String,
    },
    #[error("pack {pack} is of type {pack_type}, only application packs may carry commands")]
    CommandsOnNonApplication { pack: String, pack_type: PackType },
    #[error("recipe declares no platform named `{platform}`")]
    UnknownPlatform { platform: String },
    #[error("platform {platform} does not build for arch `{arch}`")]
    UnsupportedArch { platform: String, arch: String },
}
