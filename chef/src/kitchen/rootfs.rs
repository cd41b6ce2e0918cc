// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io;
use std::path::Path;
use std::process::Command;

use fs_err as fs;
use log::info;
use nix::unistd::{chown, getgid, getuid};
use thiserror::Error;

use super::Layout;
use crate::util;

/// Populate a fresh base system at `rootfs` with the requested host
/// packages preinstalled. The heavy lifting is an external
/// debootstrap-style tool.
pub fn bootstrap(rootfs: &Path, packages: &[String]) -> Result<(), Error> {
    util::ensure_dir_exists(rootfs)?;

    let mut command = Command::new("debootstrap");

    if !packages.is_empty() {
        command.arg(format!("--include={}", packages.join(",")));
    }

    let status = command
        .arg("stable")
        .arg(rootfs)
        .status()
        .map_err(Error::Spawn)?;

    if !status.success() {
        return Err(Error::Bootstrap {
            code: status.code().unwrap_or(1),
        });
    }

    Ok(())
}

/// Hand the scratch trees to the invoking user so in-container builds
/// dropped to that identity can write them
pub fn chown_workspaces(layout: &Layout) -> Result<(), Error> {
    let uid = getuid();
    let gid = getgid();

    for path in [layout.build().host, layout.install().host, layout.output()] {
        chown(&path, Some(uid), Some(gid)).map_err(|source| Error::Chown {
            path: path.display().to_string(),
            source,
        })?;
    }

    Ok(())
}

/// Place the in-container controller binary at its fixed path inside
/// the rootfs
pub fn install_controller(layout: &Layout) -> Result<(), Error> {
    let controller = layout.controller();

    if let Some(parent) = controller.host.parent() {
        util::ensure_dir_exists(parent)?;
    }

    let current = std::env::current_exe()?;
    info!("installing controller {} -> {}", current.display(), controller.host.display());
    fs::copy(current, &controller.host)?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("spawn debootstrap")]
    Spawn(#[source] io::Error),
    #[error("debootstrap failed with status code {code}")]
    Bootstrap { code: i32 },
    #[error("chown {path}")]
    Chown { path: String, source: nix::Error },
    #[error("io")]
    Io(#[from] io::Error),
}
