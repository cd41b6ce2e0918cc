// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use fs_err as fs;

use super::Layout;
use crate::cache::{DeltaKind, PackageDelta};
use crate::util;

/// Container-view path of the host-package update script
pub const UPDATE_SCRIPT: &str = "/chef/update.sh";
/// Container-view path of the recipe's bash setup hook
pub const HOOK_SCRIPT: &str = "/chef/hook-setup.sh";

/// Render the script reconciling the rootfs with a host-package diff
pub fn update_script(diff: &[PackageDelta], package_manager: &str) -> String {
    let removed: Vec<&str> = diff
        .iter()
        .filter(|d| d.kind == DeltaKind::Removed)
        .map(|d| d.name.as_str())
        .collect();
    let added: Vec<&str> = diff
        .iter()
        .filter(|d| matches!(d.kind, DeltaKind::Added | DeltaKind::Updated))
        .map(|d| d.name.as_str())
        .collect();

    let mut script = String::from("#!/bin/sh\nset -e\n");
    let _ = writeln!(script, "{package_manager} update");

    if !removed.is_empty() {
        let _ = writeln!(script, "{package_manager} remove -y {}", removed.join(" "));
    }
    if !added.is_empty() {
        let _ = writeln!(
            script,
            "{package_manager} install -y --no-install-recommends {}",
            added.join(" ")
        );
    }

    script
}

pub fn write_update_script(layout: &Layout, diff: &[PackageDelta], package_manager: &str) -> io::Result<PathBuf> {
    write_script(layout, UPDATE_SCRIPT, &update_script(diff, package_manager))
}

pub fn write_hook_script(layout: &Layout, body: &str) -> io::Result<PathBuf> {
    let mut script = String::from("#!/bin/bash\nset -e\n");
    script.push_str(body);
    if !body.ends_with('\n') {
        script.push('\n');
    }

    write_script(layout, HOOK_SCRIPT, &script)
}

fn write_script(layout: &Layout, guest_path: &str, contents: &str) -> io::Result<PathBuf> {
    let host_path = layout.host_view(guest_path);

    if let Some(parent) = host_path.parent() {
        util::ensure_dir_exists(parent)?;
    }

    fs::write(&host_path, contents)?;
    fs::set_permissions(&host_path, Permissions::from_mode(0o755))?;

    Ok(host_path)
}
