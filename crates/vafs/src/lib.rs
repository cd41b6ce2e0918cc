// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

pub(crate) mod digest;
pub(crate) mod field;

mod descriptor;
mod feature;
mod header;
mod meta;
mod read;
mod write;

pub use self::descriptor::{Descriptor, Entry, FileType};
pub use self::feature::{
    Compression, DecodeError as FeatureDecodeError, EncodeError as FeatureEncodeError, FeatureId, FilterOps,
};
pub use self::header::{
    v1::Architecture, AgnosticHeader, DecodeError as HeaderDecodeError, Header, Version as HeaderVersion, VAFS_MAGIC,
};
pub use self::meta::{App, AppType, Options, Package, PackType, ParseVersionError, Version};
pub use self::read::{read, read_bytes, Error as ReadError, ExtractReport, Reader};
pub use self::write::{tree_stats, Error as WriteError, TreeStats, Writer};

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::Cursor;
    use std::os::unix::fs::{symlink, PermissionsExt};

    use super::*;

    fn pseudo_random_bytes(len: usize) -> Vec<u8> {
        // xorshift keeps the fixture deterministic yet incompressible-ish
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            bytes.extend(state.to_le_bytes());
        }
        bytes.truncate(len);
        bytes
    }

    fn sample_package() -> Package {
        Package {
            pack_type: Some(PackType::Application),
            package: "editor".into(),
            summary: "A text editor".into(),
            description: "Edits text".into(),
            license: "MPL-2.0".into(),
            eula: String::new(),
            homepage: "https://example.com".into(),
            maintainer: "Jane Doe".into(),
            maintainer_email: "jane@example.com".into(),
        }
    }

    #[test]
    fn roundtrip() {
        let source = tempfile::tempdir().unwrap();
        let root = source.path();

        fs::create_dir(root.join("bin")).unwrap();
        fs::write(root.join("bin/tool"), b"#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(root.join("bin/tool"), fs::Permissions::from_mode(0o755)).unwrap();
        symlink("tool", root.join("bin/latest")).unwrap();
        fs::create_dir(root.join("share")).unwrap();
        let blob = pseudo_random_bytes(3 * 1024 * 1024);
        fs::write(root.join("share/blob"), &blob).unwrap();

        let mut out = vec![];
        let mut writer = Writer::new(&mut out, Cursor::new(Vec::new()), Architecture::X64).unwrap();

        writer.package(&sample_package()).unwrap();
        writer.version(&"1.2.3".parse().unwrap()).unwrap();
        writer
            .apps(&[App {
                name: "tool".into(),
                path: "/bin/tool".into(),
                ..Default::default()
            }])
            .unwrap();

        let stats = writer.add_tree(root, |_| true).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.symlinks, 1);

        writer.finalize().unwrap();

        let mut pack = read_bytes(&out).unwrap();
        assert_eq!(pack.architecture(), Architecture::X64);
        assert_eq!(pack.package().unwrap(), &sample_package());
        assert_eq!(pack.version().unwrap().to_string(), "1.2.3");
        assert_eq!(pack.apps().len(), 1);
        assert_eq!(pack.files().count(), 2);
        assert_eq!(pack.symlinks().count(), 1);

        let destination = tempfile::tempdir().unwrap();
        let report = pack.extract(destination.path()).unwrap();
        assert!(report.skipped.is_empty());

        // Contents and permissions survive
        assert_eq!(fs::read(destination.path().join("bin/tool")).unwrap(), b"#!/bin/sh\nexit 0\n");
        assert_eq!(fs::read(destination.path().join("share/blob")).unwrap(), blob);
        let mode = fs::metadata(destination.path().join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        // The symlink is preserved as a link, not dereferenced
        let latest = destination.path().join("bin/latest");
        assert!(fs::symlink_metadata(&latest).unwrap().is_symlink());
        assert_eq!(fs::read_link(&latest).unwrap().to_str(), Some("tool"));
    }

    #[test]
    fn filters_select_subtree() {
        let source = tempfile::tempdir().unwrap();
        let root = source.path();

        fs::create_dir(root.join("bin")).unwrap();
        fs::write(root.join("bin/tool"), b"tool").unwrap();
        fs::create_dir(root.join("doc")).unwrap();
        fs::write(root.join("doc/README"), b"docs").unwrap();

        let matcher = |path: &std::path::Path| path.starts_with("bin");

        let stats = tree_stats(root, matcher).unwrap();
        assert_eq!(stats.files, 1);

        let mut out = vec![];
        let mut writer = Writer::new(&mut out, Cursor::new(Vec::new()), Architecture::X64).unwrap();
        writer
            .package(&Package {
                pack_type: Some(PackType::Content),
                package: "docs".into(),
                ..Default::default()
            })
            .unwrap();
        writer.version(&"0.1".parse().unwrap()).unwrap();
        writer.add_tree(root, matcher).unwrap();
        writer.finalize().unwrap();

        let pack = read_bytes(&out).unwrap();
        let targets: Vec<_> = pack.descriptors().iter().map(|d| d.entry.target().to_owned()).collect();
        assert_eq!(targets, vec!["bin", "bin/tool"]);
    }

    #[test]
    fn refuses_unknown_pack_type() {
        let mut out = vec![];
        let mut writer = Writer::new(&mut out, Cursor::new(Vec::new()), Architecture::ARM64).unwrap();

        let package = Package {
            pack_type: None,
            ..Default::default()
        };
        assert!(matches!(writer.package(&package), Err(WriteError::UnknownPackType)));

        let package = Package {
            pack_type: Some(PackType::Unknown),
            ..Default::default()
        };
        assert!(matches!(writer.package(&package), Err(WriteError::UnknownPackType)));
    }

    #[test]
    fn extract_skips_existing_entries() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("present"), b"new").unwrap();

        let mut out = vec![];
        let mut writer = Writer::new(&mut out, Cursor::new(Vec::new()), Architecture::X64).unwrap();
        writer
            .package(&Package {
                pack_type: Some(PackType::Content),
                package: "clobber".into(),
                ..Default::default()
            })
            .unwrap();
        writer.version(&"1.0".parse().unwrap()).unwrap();
        writer.add_tree(source.path(), |_| true).unwrap();
        writer.finalize().unwrap();

        let destination = tempfile::tempdir().unwrap();
        fs::write(destination.path().join("present"), b"old").unwrap();

        let mut pack = read_bytes(&out).unwrap();
        let report = pack.extract(destination.path()).unwrap();

        assert_eq!(report.skipped, vec!["present".to_owned()]);
        assert_eq!(fs::read(destination.path().join("present")).unwrap(), b"old");
    }
}
