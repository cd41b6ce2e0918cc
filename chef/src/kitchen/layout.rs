// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io;
use std::path::{Path, PathBuf};

use crate::util;
use crate::Env;

/// Paired host-view and container-view paths. The guest path is what a
/// process sees after the rootfs becomes `/`.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub host: PathBuf,
    pub guest: PathBuf,
}

/// The per-recipe working tree. Every path derives deterministically
/// from the kitchen root, the recipe's uuid and the build target.
#[derive(Debug, Clone)]
pub struct Layout {
    kitchen_dir: PathBuf,
    project_dir: PathBuf,
    platform: String,
    arch: String,
}

impl Layout {
    pub fn new(env: &Env, uuid: &str, platform: &str, arch: &str, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            kitchen_dir: env.kitchen_dir().join(uuid),
            project_dir: project_dir.into(),
            platform: platform.to_owned(),
            arch: arch.to_owned(),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn rootfs(&self) -> Mapping {
        Mapping {
            host: self.kitchen_dir.join("ns"),
            guest: "/".into(),
        }
    }

    /// The recipe's project directory, bound read-only into the
    /// container
    pub fn project(&self) -> Mapping {
        Mapping {
            host: self.project_dir.clone(),
            guest: "/chef/project".into(),
        }
    }

    pub fn ingredients(&self) -> Mapping {
        self.guest_rooted(format!("chef/ingredients/{}/{}", self.platform, self.arch))
    }

    pub fn toolchains(&self) -> Mapping {
        self.guest_rooted("chef/toolchains")
    }

    pub fn build(&self) -> Mapping {
        self.guest_rooted(format!("chef/build/{}/{}", self.platform, self.arch))
    }

    /// Scratch tree for one part
    pub fn part_build(&self, part: &str) -> Mapping {
        let base = self.build();
        Mapping {
            host: base.host.join(part),
            guest: base.guest.join(part),
        }
    }

    pub fn install(&self) -> Mapping {
        self.guest_rooted(format!("chef/install/{}/{}", self.platform, self.arch))
    }

    /// The in-container controller binary
    pub fn controller(&self) -> Mapping {
        self.guest_rooted("usr/local/bin/bakectl")
    }

    /// Host-only; emitted packs land here
    pub fn output(&self) -> PathBuf {
        self.kitchen_dir.join("output")
    }

    /// For the provided [`Mapping`], return the guest path as it lives
    /// on the host fs
    pub fn guest_host_path(&self, mapping: &Mapping) -> PathBuf {
        self.host_view(&mapping.guest)
    }

    /// Host view of an absolute container path
    pub fn host_view(&self, guest: impl AsRef<Path>) -> PathBuf {
        let guest = guest.as_ref();
        let relative = guest.strip_prefix("/").unwrap_or(guest);

        self.rootfs().host.join(relative)
    }

    /// Create every host-side directory of the kitchen tree
    pub fn ensure(&self) -> io::Result<()> {
        util::ensure_dir_exists(&self.rootfs().host)?;
        util::ensure_dir_exists(&self.guest_host_path(&self.project()))?;
        util::ensure_dir_exists(&self.ingredients().host)?;
        util::ensure_dir_exists(&self.toolchains().host)?;
        util::ensure_dir_exists(&self.build().host)?;
        util::ensure_dir_exists(&self.install().host)?;
        util::ensure_dir_exists(&self.output())?;
        Ok(())
    }

    fn guest_rooted(&self, relative: impl AsRef<Path>) -> Mapping {
        let relative = relative.as_ref();
        Mapping {
            host: self.rootfs().host.join(relative),
            guest: Path::new("/").join(relative),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture() -> Layout {
        let env = Env {
            home_dir: "/home/jane".into(),
            chef_dir: "/home/jane/.chef".into(),
            target_platform: None,
            target_arch: None,
            package_manager: "apt-get".into(),
        };

        Layout::new(&env, "5a1e", "vali", "amd64", "/src/editor")
    }

    #[test]
    fn paths_derive_from_inputs() {
        let layout = fixture();

        assert_eq!(layout.rootfs().host, Path::new("/home/jane/.chef/kitchen/5a1e/ns"));
        assert_eq!(layout.rootfs().guest, Path::new("/"));

        assert_eq!(layout.project().host, Path::new("/src/editor"));
        assert_eq!(layout.project().guest, Path::new("/chef/project"));

        let ingredients = layout.ingredients();
        assert_eq!(
            ingredients.host,
            Path::new("/home/jane/.chef/kitchen/5a1e/ns/chef/ingredients/vali/amd64")
        );
        assert_eq!(ingredients.guest, Path::new("/chef/ingredients/vali/amd64"));

        assert_eq!(
            layout.build().host,
            Path::new("/home/jane/.chef/kitchen/5a1e/ns/chef/build/vali/amd64")
        );
        assert_eq!(layout.install().guest, Path::new("/chef/install/vali/amd64"));

        let controller = layout.controller();
        assert_eq!(controller.guest, Path::new("/usr/local/bin/bakectl"));
        assert_eq!(
            controller.host,
            Path::new("/home/jane/.chef/kitchen/5a1e/ns/usr/local/bin/bakectl")
        );

        assert_eq!(layout.output(), Path::new("/home/jane/.chef/kitchen/5a1e/output"));
    }

    #[test]
    fn part_build_nests_below_build() {
        let layout = fixture();
        let part = layout.part_build("core");

        assert_eq!(part.guest, Path::new("/chef/build/vali/amd64/core"));
        assert!(part.host.starts_with(layout.build().host));
    }

    #[test]
    fn guest_host_path_rebases_into_rootfs() {
        let layout = fixture();
        let mapped = layout.guest_host_path(&layout.project());

        assert_eq!(
            mapped,
            Path::new("/home/jane/.chef/kitchen/5a1e/ns/chef/project")
        );
    }
}
