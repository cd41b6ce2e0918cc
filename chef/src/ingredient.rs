// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use thiserror::Error;

use crate::util;

/// A previously built pack opened for consumption: metadata up front,
/// extraction on demand
pub struct Ingredient {
    reader: vafs::Reader<std::fs::File>,
    pub package: vafs::Package,
    pub version: vafs::Version,
    pub options: Option<vafs::Options>,
}

impl Ingredient {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let reader = vafs::read(file.into_parts().0)?;

        let package = reader.package().cloned().ok_or_else(|| Error::MissingMetadata {
            pack: path.to_path_buf(),
        })?;
        let version = reader.version().cloned().ok_or_else(|| Error::MissingMetadata {
            pack: path.to_path_buf(),
        })?;
        let options = reader.options().cloned();

        Ok(Self {
            reader,
            package,
            version,
            options,
        })
    }

    pub fn pack_type(&self) -> vafs::PackType {
        self.package.pack_type.unwrap_or(vafs::PackType::Unknown)
    }

    pub fn name(&self) -> &str {
        &self.package.package
    }

    pub fn architecture(&self) -> vafs::Architecture {
        self.reader.architecture()
    }

    /// Unpack the ingredient's tree below `destination`; existing
    /// entries are left alone
    pub fn extract(&mut self, destination: &Path) -> Result<vafs::ExtractReport, Error> {
        util::ensure_dir_exists(destination)?;
        Ok(self.reader.extract(destination)?)
    }

    /// [`Ingredient::extract`], limited to entries passing `matcher`
    /// (the reference's include filters)
    pub fn extract_filtered(
        &mut self,
        destination: &Path,
        matcher: impl Fn(&Path) -> bool,
    ) -> Result<vafs::ExtractReport, Error> {
        util::ensure_dir_exists(destination)?;
        Ok(self.reader.extract_with(destination, matcher)?)
    }

    /// Render the pkg-config glue making this ingredient consumable
    /// from the sandbox.
    ///
    /// `host_root` is where the ingredient was unpacked as seen from
    /// the host, `target_prefix` the same tree as seen after chroot.
    /// Ingredients without options contribute no consumable flags and
    /// no file.
    pub fn make_available(&self, host_root: &Path, target_prefix: &Path) -> Result<Option<PathBuf>, Error> {
        let Some(options) = &self.options else {
            return Ok(None);
        };

        let dir = host_root.join("usr/share/pkgconfig");
        util::ensure_dir_exists(&dir)?;

        let path = dir.join(format!("{}.pc", self.name()));
        fs::write(&path, self.render_pkgconfig(target_prefix, options))?;

        Ok(Some(path))
    }

    fn render_pkgconfig(&self, prefix: &Path, options: &vafs::Options) -> String {
        let mut rendered = format!("prefix={}\n\n", prefix.display());

        let _ = writeln!(rendered, "Name: {}", self.name());
        let _ = writeln!(rendered, "Description: {} by {}", self.name(), self.package.maintainer);
        let _ = writeln!(
            rendered,
            "Version: {}.{}.{}",
            self.version.major, self.version.minor, self.version.patch
        );

        let flags = |paths: &[String], switch: &str| {
            paths
                .iter()
                .map(|dir| format!("{switch}${{prefix}}{dir}"))
                .collect::<Vec<_>>()
                .join(" ")
        };

        let _ = writeln!(rendered, "Cflags: {}", flags(&options.inc_dirs, "-I"));
        let _ = writeln!(rendered, "Libs: {}", flags(&options.lib_dirs, "-L"));

        rendered
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("pack {pack:?} carries no package metadata")]
    MissingMetadata { pack: PathBuf },
    #[error("pack read")]
    Read(#[from] vafs::ReadError),
    #[error("io")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn write_ingredient(dir: &Path, options: Option<vafs::Options>) -> PathBuf {
        let tree = dir.join("tree");
        fs::create_dir_all(tree.join("include")).unwrap();
        fs::write(tree.join("include/foo.h"), b"#pragma once\n").unwrap();

        let path = dir.join("libfoo.pack");
        let file = fs::File::create(&path).unwrap();

        let mut writer = vafs::Writer::new(file.into_parts().0, Cursor::new(Vec::new()), vafs::Architecture::X64).unwrap();
        writer
            .package(&vafs::Package {
                pack_type: Some(vafs::PackType::Ingredient),
                package: "libfoo".into(),
                maintainer: "Jane Doe".into(),
                ..Default::default()
            })
            .unwrap();
        writer.version(&"2.1".parse().unwrap()).unwrap();
        if let Some(options) = &options {
            writer.options(options).unwrap();
        }
        writer.add_tree(&tree, |_| true).unwrap();
        writer.finalize().unwrap();

        path
    }

    #[test]
    fn pkgconfig_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let pack = write_ingredient(
            dir.path(),
            Some(vafs::Options {
                inc_dirs: vec!["/include".into()],
                lib_dirs: vec!["/lib".into(), "/lib64".into()],
                ..Default::default()
            }),
        );

        let ingredient = Ingredient::open(&pack).unwrap();
        assert_eq!(ingredient.pack_type(), vafs::PackType::Ingredient);

        let host_root = dir.path().join("rootfs");
        let written = ingredient
            .make_available(&host_root, Path::new("/chef/ingredients/vali/amd64"))
            .unwrap()
            .expect("options produce a file");

        let rendered = fs::read_to_string(written).unwrap();
        assert!(rendered.starts_with("prefix=/chef/ingredients/vali/amd64\n"));
        assert!(rendered.contains("Name: libfoo"));
        assert!(rendered.contains("Description: libfoo by Jane Doe"));
        assert!(rendered.contains("Version: 2.1.0"));
        assert!(rendered.contains("Cflags: -I${prefix}/include"));
        assert!(rendered.contains("Libs: -L${prefix}/lib -L${prefix}/lib64"));
    }

    #[test]
    fn no_options_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let pack = write_ingredient(dir.path(), None);

        let ingredient = Ingredient::open(&pack).unwrap();
        let host_root = dir.path().join("rootfs");

        assert!(ingredient
            .make_available(&host_root, Path::new("/chef/ingredients/vali/amd64"))
            .unwrap()
            .is_none());
        assert!(!host_root.join("usr/share/pkgconfig/libfoo.pc").exists());
    }

    #[test]
    fn extraction() {
        let dir = tempfile::tempdir().unwrap();
        let pack = write_ingredient(dir.path(), None);

        let mut ingredient = Ingredient::open(&pack).unwrap();
        let dest = dir.path().join("extracted");
        ingredient.extract(&dest).unwrap();

        assert_eq!(fs::read(dest.join("include/foo.h")).unwrap(), b"#pragma once\n");
    }
}
