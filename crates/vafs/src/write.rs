// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use thiserror::Error;

use crate::descriptor::{self, Descriptor, Entry};
use crate::feature::{self, Compression, FeatureId, FilterOps};
use crate::field::FieldWrite;
use crate::header::v1::Architecture;
use crate::meta::{self, PackType};
use crate::{digest, Header};

mod zstd;

/// Builds a pack: metadata features are staged in memory, file content
/// is compressed into a caller provided spool buffer, and everything is
/// framed out on [`Writer::finalize`].
pub struct Writer<W, B> {
    writer: W,
    architecture: Architecture,
    metadata: Vec<EncodedFeature>,
    descriptors: Vec<Descriptor>,
    content: Content<B>,
    feature_hasher: digest::Hasher,
    encoder: zstd::Encoder,
}

impl<W, B> Writer<W, B>
where
    W: Write,
    B: Read + Write + Seek,
{
    pub fn new(writer: W, buffer: B, architecture: Architecture) -> Result<Self, Error> {
        Ok(Self {
            writer,
            architecture,
            metadata: vec![],
            descriptors: vec![],
            content: Content {
                buffer,
                plain_size: 0,
                stored_size: 0,
                num_files: 0,
                file_hasher: digest::Hasher::new(),
                buffer_hasher: digest::Hasher::new(),
                encoder: zstd::Encoder::new()?,
            },
            feature_hasher: digest::Hasher::new(),
            encoder: zstd::Encoder::new()?,
        })
    }

    /// Stage the package header feature. Packs without an explicit,
    /// known type are refused.
    pub fn package(&mut self, package: &meta::Package) -> Result<(), Error> {
        match package.pack_type {
            None | Some(PackType::Unknown) => return Err(Error::UnknownPackType),
            Some(_) => {}
        }

        let mut plain = Vec::with_capacity(package.size());
        package.encode(&mut plain)?;
        self.stage_metadata(FeatureId::PACKAGE_HEADER, 1, &plain)
    }

    pub fn version(&mut self, version: &meta::Version) -> Result<(), Error> {
        let mut plain = Vec::with_capacity(version.size());
        version.encode(&mut plain)?;
        self.stage_metadata(FeatureId::PACKAGE_VERSION, 1, &plain)
    }

    pub fn icon(&mut self, icon: &[u8]) -> Result<(), Error> {
        let mut plain = Vec::with_capacity(4 + icon.len());
        plain.put_count(icon.len())?;
        plain.write_all(icon)?;
        self.stage_metadata(FeatureId::PACKAGE_ICON, 1, &plain)
    }

    /// Stage the apps feature; a pack with no commands carries none.
    pub fn apps(&mut self, apps: &[meta::App]) -> Result<(), Error> {
        if apps.is_empty() {
            return Ok(());
        }

        let mut plain = Vec::with_capacity(meta::apps_total_size(apps));
        meta::encode_apps(&mut plain, apps)?;
        self.stage_metadata(FeatureId::PACKAGE_APPS, apps.len(), &plain)
    }

    pub fn options(&mut self, options: &meta::Options) -> Result<(), Error> {
        let mut plain = Vec::with_capacity(options.size());
        options.encode(&mut plain)?;
        self.stage_metadata(FeatureId::PACKAGE_OPTIONS, 1, &plain)
    }

    pub fn add_directory(&mut self, target: impl Into<String>, mode: u32) {
        self.descriptors.push(Descriptor {
            mode,
            entry: Entry::Directory { target: target.into() },
        });
    }

    pub fn add_symlink(&mut self, target: impl Into<String>, link: impl Into<String>, mode: u32) {
        self.descriptors.push(Descriptor {
            mode,
            entry: Entry::Symlink {
                link: link.into(),
                target: target.into(),
            },
        });
    }

    /// Compress one file into the content spool as a standalone frame.
    /// `plain_size` is pledged so the frame declares its content size.
    pub fn add_file<R: Read>(
        &mut self,
        target: impl Into<String>,
        mode: u32,
        plain_size: u64,
        content: &mut R,
    ) -> Result<(), Error> {
        let start = self.content.plain_size;

        self.content.file_hasher.reset();

        // Bytes -> file digest -> frame -> stored checksum -> spool
        let mut stored = digest::Summed::new(&mut self.content.buffer, &mut self.content.buffer_hasher);
        let mut frame = self.content.encoder.frame(&mut stored, plain_size)?;
        let mut plain = digest::Summed::new(&mut frame, &mut self.content.file_hasher);

        let copied = io::copy(content, &mut plain)?;

        if copied != plain_size {
            return Err(Error::ContentSize {
                pledged: plain_size,
                got: copied,
            });
        }

        let digest = self.content.file_hasher.digest128();

        frame.finish()?;

        self.content.stored_size += stored.bytes;
        self.content.plain_size += copied;
        self.content.num_files += 1;

        let end = self.content.plain_size;

        self.descriptors.push(Descriptor {
            mode,
            entry: Entry::Regular {
                digest,
                start,
                end,
                target: target.into(),
            },
        });

        Ok(())
    }

    /// Walk `root` depth first in sorted order, adding every directory,
    /// regular file and symlink whose root-relative path passes
    /// `matcher`. Nodes of any other type are ignored.
    pub fn add_tree(&mut self, root: &Path, matcher: impl Fn(&Path) -> bool + Copy) -> Result<TreeStats, Error> {
        let mut stats = TreeStats::default();
        self.add_tree_inner(root, root, matcher, &mut stats)?;
        Ok(stats)
    }

    fn add_tree_inner(
        &mut self,
        root: &Path,
        dir: &Path,
        matcher: impl Fn(&Path) -> bool + Copy,
        stats: &mut TreeStats,
    ) -> Result<(), Error> {
        let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(std::fs::DirEntry::file_name);

        for entry in entries {
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);

            if !matcher(relative) {
                continue;
            }

            let target = relative.to_string_lossy().into_owned();
            let metadata = std::fs::symlink_metadata(&path)?;
            let mode = metadata.permissions().mode() & 0o7777;

            if metadata.is_symlink() {
                let link = std::fs::read_link(&path)?.to_string_lossy().into_owned();
                self.add_symlink(target, link, mode);
                stats.symlinks += 1;
            } else if metadata.is_dir() {
                self.add_directory(target, mode);
                self.add_tree_inner(root, &path, matcher, stats)?;
            } else if metadata.is_file() {
                let mut file = std::fs::File::open(&path)?;
                self.add_file(target, mode, metadata.size(), &mut file)?;
                stats.files += 1;
            }
        }

        Ok(())
    }

    pub fn num_files(&self) -> usize {
        self.content.num_files
    }

    pub fn finalize(mut self) -> Result<(), Error> {
        // Tree descriptors become the filter feature
        let mut filter_plain = Vec::with_capacity(descriptor::records_total_size(&self.descriptors));
        descriptor::encode_records(&mut filter_plain, &self.descriptors)?;
        let filter = encode_feature(
            FeatureId::FILTER,
            self.descriptors.len(),
            &filter_plain,
            &mut self.feature_hasher,
            &mut self.encoder,
        )?;

        // Filter-ops install the codec; stored plain so a reader can
        // check codec support before decompressing anything
        let mut ops_data = vec![];
        FilterOps::ZSTD.encode_to(&mut ops_data)?;
        self.feature_hasher.reset();
        self.feature_hasher.update(&ops_data);
        let ops = EncodedFeature {
            header: feature::Header {
                id: FeatureId::FILTER_OPS,
                stored_size: ops_data.len() as u64,
                plain_size: ops_data.len() as u64,
                checksum: self.feature_hasher.digest().to_be_bytes(),
                num_records: 1,
                version: 1,
                compression: Compression::None,
            },
            data: ops_data,
        };

        let num_features = (2 + self.metadata.len() + 1) as u16;

        Header::V1(crate::header::v1::Header {
            architecture: self.architecture,
            num_features,
            num_descriptors: self.descriptors.len() as u32,
        })
        .encode(&mut self.writer)?;

        for encoded in std::iter::once(ops).chain(self.metadata).chain(std::iter::once(filter)) {
            encoded.header.encode(&mut self.writer)?;
            self.writer.write_all(&encoded.data)?;
        }

        // Content feature header + spooled frames
        feature::Header {
            id: FeatureId::CONTENT,
            stored_size: self.content.stored_size,
            plain_size: self.content.plain_size,
            checksum: self.content.buffer_hasher.digest().to_be_bytes(),
            num_records: self.content.num_files,
            version: 1,
            compression: Compression::Zstd,
        }
        .encode(&mut self.writer)?;

        self.content.buffer.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.content.buffer, &mut self.writer)?;

        self.writer.flush()?;

        Ok(())
    }

    fn stage_metadata(&mut self, id: FeatureId, num_records: usize, plain: &[u8]) -> Result<(), Error> {
        let encoded = encode_feature(id, num_records, plain, &mut self.feature_hasher, &mut self.encoder)?;
        self.metadata.push(encoded);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub files: usize,
    pub symlinks: usize,
}

/// Count the regular files and symlinks `matcher` selects below `root`
/// without touching any content, so callers can skip empty packs before
/// creating an output file.
pub fn tree_stats(root: &Path, matcher: impl Fn(&Path) -> bool + Copy) -> io::Result<TreeStats> {
    fn walk(root: &Path, dir: &Path, matcher: impl Fn(&Path) -> bool + Copy, stats: &mut TreeStats) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);

            if !matcher(relative) {
                continue;
            }

            let metadata = std::fs::symlink_metadata(&path)?;

            if metadata.is_symlink() {
                stats.symlinks += 1;
            } else if metadata.is_dir() {
                walk(root, &path, matcher, stats)?;
            } else if metadata.is_file() {
                stats.files += 1;
            }
        }
        Ok(())
    }

    let mut stats = TreeStats::default();
    if root.exists() {
        walk(root, root, matcher, &mut stats)?;
    }
    Ok(stats)
}

struct Content<B> {
    buffer: B,
    plain_size: u64,
    stored_size: u64,
    num_files: usize,
    /// Digest of one file's plain bytes, reset per file
    file_hasher: digest::Hasher,
    /// Digest of the stored (compressed) bytes across all files
    buffer_hasher: digest::Hasher,
    encoder: zstd::Encoder,
}

struct EncodedFeature {
    header: feature::Header,
    data: Vec<u8>,
}

fn encode_feature(
    id: FeatureId,
    num_records: usize,
    plain: &[u8],
    hasher: &mut digest::Hasher,
    encoder: &mut zstd::Encoder,
) -> Result<EncodedFeature, Error> {
    // Hasher is shared across all features
    hasher.reset();

    let mut data = vec![];

    // Checksum covers the compressed body, so the summing adaptor
    // wraps outside the frame
    let mut stored = digest::Summed::new(&mut data, hasher);
    let mut frame = encoder.frame(&mut stored, plain.len() as u64)?;

    frame.write_all(plain)?;

    let plain_size = frame.plain_bytes;

    frame.finish()?;

    let stored_size = stored.bytes;

    let header = feature::Header {
        id,
        stored_size,
        plain_size,
        checksum: hasher.digest().to_be_bytes(),
        num_records,
        version: 1,
        compression: Compression::Zstd,
    };

    Ok(EncodedFeature { header, data })
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("pack type must be explicit and known")]
    UnknownPackType,
    #[error("content pledged {pledged} bytes but produced {got}")]
    ContentSize { pledged: u64, got: u64 },
    #[error("feature encode")]
    FeatureEncode(#[from] feature::EncodeError),
    #[error("io")]
    Io(#[from] io::Error),
}
