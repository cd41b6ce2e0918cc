// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use thiserror::Error;

use crate::caps::CapabilitySet;

/// Capability policy a container runs under. The defaults reproduce
/// the base behaviour: full init set while preparing the environment,
/// a minimal worker set afterwards, dangerous capabilities gone from
/// the bounding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Held while the environment is prepared
    pub init: CapabilitySet,
    /// Retained by the worker after the identity switch
    pub primary: CapabilitySet,
    /// Removed from the bounding set before anything runs
    pub dropped: CapabilitySet,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            init: CapabilitySet::CONTAINER_INIT,
            primary: CapabilitySet::PRIMARY_PROCESS,
            dropped: CapabilitySet::DANGEROUS,
        }
    }
}

/// Identity the primary process switches to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunAs {
    pub uid: u32,
    pub gid: u32,
    pub user: Option<String>,
}

/// Action a syscall filter takes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FilterAction {
    #[default]
    Allow,
    Deny,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallRule {
    pub name: String,
    pub action: FilterAction,
}

/// Carried as data for the seccomp collaborator; the runtime itself
/// only validates and transports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyscallFilter {
    pub default_action: FilterAction,
    pub rules: Vec<SyscallRule>,
}

/// An optional hardening layer composed over the default [`Policy`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub allowed: CapabilitySet,
    pub dropped: CapabilitySet,
    pub no_new_privileges: bool,
    pub run_as: Option<RunAs>,
    pub no_suid: bool,
    pub read_only_root: bool,
    pub network_isolated: bool,
    pub writable_paths: Vec<PathBuf>,
    pub masked_paths: Vec<PathBuf>,
    pub syscalls: Option<SyscallFilter>,
}

impl Profile {
    /// A profile granting and removing the same capability is
    /// contradictory and refused outright
    pub fn validate(&self) -> Result<(), Error> {
        if !self.allowed.is_disjoint(self.dropped) {
            return Err(Error::OverlappingCapabilities {
                profile: self.name.clone(),
                overlap: self.allowed.intersection(self.dropped),
            });
        }
        Ok(())
    }

    /// Fold this profile over `base`, producing the effective policy.
    ///
    /// Grants extend the worker set, drops win over grants, and the
    /// dropped sets accumulate.
    pub fn compose(&self, base: Policy) -> Result<Policy, Error> {
        self.validate()?;

        Ok(Policy {
            init: base.init.difference(self.dropped),
            primary: base.primary.union(self.allowed).difference(self.dropped),
            dropped: base.dropped.union(self.dropped),
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("profile {profile}: capabilities both allowed and dropped: {overlap:?}")]
    OverlappingCapabilities { profile: String, overlap: CapabilitySet },
}
