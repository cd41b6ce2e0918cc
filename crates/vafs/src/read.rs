// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

use crate::descriptor::{self, Descriptor, Entry};
use crate::feature::{self, Compression, FeatureId, FilterOps};
use crate::field::FieldRead;
use crate::header::v1::Architecture;
use crate::{digest, meta, Header, HeaderDecodeError};

mod zstd;

pub fn read<R: Read + Seek>(mut reader: R) -> Result<Reader<R>, Error> {
    let header = Header::decode(&mut reader).map_err(Error::HeaderDecode)?;

    let mut pack = Reader {
        header,
        reader,
        filter_ops: None,
        package: None,
        version: None,
        icon: None,
        apps: vec![],
        options: None,
        descriptors: vec![],
        content: None,
        hasher: digest::Hasher::new(),
    };

    for _ in 0..header.num_features() {
        pack.decode_feature()?;
    }

    // The codec must be installed before any content is trusted
    match pack.filter_ops {
        Some(ops) if ops.encode == Compression::Zstd as u32 && ops.decode == Compression::Zstd as u32 => {}
        Some(ops) => {
            return Err(Error::UnsupportedFilterOps {
                encode: ops.encode,
                decode: ops.decode,
            })
        }
        None => return Err(Error::MissingFilterOps),
    }

    Ok(pack)
}

pub fn read_bytes(bytes: &[u8]) -> Result<Reader<Cursor<&[u8]>>, Error> {
    read(Cursor::new(bytes))
}

pub struct Reader<R> {
    pub header: Header,
    reader: R,
    filter_ops: Option<FilterOps>,
    package: Option<meta::Package>,
    version: Option<meta::Version>,
    icon: Option<Vec<u8>>,
    apps: Vec<meta::App>,
    options: Option<meta::Options>,
    descriptors: Vec<Descriptor>,
    content: Option<Located>,
    hasher: digest::Hasher,
}

struct Located {
    header: feature::Header,
    offset: u64,
}

impl<R: Read + Seek> Reader<R> {
    fn decode_feature(&mut self) -> Result<(), Error> {
        let header = feature::Header::decode(&mut self.reader)?;

        // Content is consumed lazily, everything else eagerly
        if header.id == FeatureId::CONTENT {
            let offset = self.reader.stream_position()?;
            self.reader.seek(SeekFrom::Current(header.stored_size as i64))?;
            self.content = Some(Located { header, offset });
            return Ok(());
        }

        let stored = self.reader.blob(header.stored_size as usize)?;

        self.hasher.reset();
        self.hasher.update(&stored);
        validate_checksum(&self.hasher, &header)?;

        let plain = match header.compression {
            Compression::None => stored,
            Compression::Zstd => {
                let mut plain = Vec::with_capacity(header.plain_size as usize);
                zstd::Frames::new(stored.as_slice())?.read_to_end(&mut plain)?;
                plain
            }
        };

        match header.id {
            FeatureId::FILTER_OPS => self.filter_ops = Some(FilterOps::decode_from(plain.as_slice())?),
            FeatureId::FILTER => self.descriptors = descriptor::decode_records(plain.as_slice(), header.num_records)?,
            FeatureId::PACKAGE_HEADER => self.package = Some(meta::Package::decode(plain.as_slice())?),
            FeatureId::PACKAGE_VERSION => self.version = Some(meta::Version::decode(plain.as_slice())?),
            FeatureId::PACKAGE_ICON => {
                let mut reader = plain.as_slice();
                let length = reader.count()?;
                self.icon = Some(reader.blob(length)?);
            }
            FeatureId::PACKAGE_APPS => self.apps = meta::decode_apps(plain.as_slice())?,
            FeatureId::PACKAGE_OPTIONS => self.options = Some(meta::Options::decode(plain.as_slice())?),
            // Unrecognized features are skipped, not fatal
            _ => {}
        }

        Ok(())
    }

    pub fn architecture(&self) -> Architecture {
        self.header.architecture()
    }

    pub fn package(&self) -> Option<&meta::Package> {
        self.package.as_ref()
    }

    pub fn version(&self) -> Option<&meta::Version> {
        self.version.as_ref()
    }

    pub fn icon(&self) -> Option<&[u8]> {
        self.icon.as_deref()
    }

    pub fn apps(&self) -> &[meta::App] {
        &self.apps
    }

    pub fn options(&self) -> Option<&meta::Options> {
        self.options.as_ref()
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn files(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors
            .iter()
            .filter(|descriptor| matches!(descriptor.entry, Entry::Regular { .. }))
    }

    pub fn symlinks(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors
            .iter()
            .filter(|descriptor| matches!(descriptor.entry, Entry::Symlink { .. }))
    }

    /// Decompress the whole content stream to `writer`, validating the
    /// stored checksum, the declared frame sizes and the plain size.
    pub fn unpack_content<W: Write>(&mut self, writer: &mut W) -> Result<u64, Error> {
        let Some(content) = &self.content else {
            return Err(Error::MissingContent);
        };

        self.reader.seek(SeekFrom::Start(content.offset))?;

        // A conforming encoder pledges every frame's content size
        if content.header.stored_size > 0 {
            let probe_len = usize::min(content.header.stored_size as usize, 32);
            let probe = self.reader.blob(probe_len)?;
            if zstd::declared_size(&probe).is_none() {
                return Err(Error::UnknownFrameSize);
            }
            self.reader.seek(SeekFrom::Start(content.offset))?;
        }

        self.hasher.reset();

        let plain = {
            let mut summed = digest::Summed::new(&mut self.reader, &mut self.hasher);
            let mut framed = (&mut summed).take(content.header.stored_size);
            io::copy(&mut zstd::Frames::new(&mut framed)?, writer)?
        };

        validate_checksum(&self.hasher, &content.header)?;

        if plain != content.header.plain_size {
            return Err(Error::FrameSize {
                declared: content.header.plain_size,
                got: plain,
            });
        }

        Ok(plain)
    }

    /// Rebuild the packed tree below `destination`, preserving modes
    /// and symlink targets. Entries that already exist are skipped and
    /// reported; any other per-entry failure aborts.
    pub fn extract(&mut self, destination: &Path) -> Result<ExtractReport, Error> {
        self.extract_with(destination, |_| true)
    }

    /// [`Reader::extract`], limited to entries whose target passes
    /// `matcher`
    pub fn extract_with(&mut self, destination: &Path, matcher: impl Fn(&Path) -> bool) -> Result<ExtractReport, Error> {
        use std::os::unix::fs::{symlink, PermissionsExt};

        let mut report = ExtractReport::default();

        let content = if self.content.is_some() && self.descriptors.iter().any(is_regular) {
            let mut buffer = Vec::new();
            self.unpack_content(&mut buffer)?;
            buffer
        } else {
            vec![]
        };

        std::fs::create_dir_all(destination)?;

        for descriptor in &self.descriptors {
            if !matcher(Path::new(descriptor.entry.target())) {
                continue;
            }

            let path = destination.join(descriptor.entry.target());

            // Filtered-out parents still need to exist on disk
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            match &descriptor.entry {
                Entry::Directory { target } => match std::fs::create_dir(&path) {
                    Ok(_) => {
                        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(descriptor.mode))?;
                        report.entries += 1;
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => report.skipped.push(target.clone()),
                    Err(e) => return Err(e.into()),
                },
                Entry::Regular {
                    digest, start, end, target,
                } => {
                    let bytes = content
                        .get(*start as usize..*end as usize)
                        .ok_or(Error::TruncatedContent)?;

                    if xxh3_128(bytes) != *digest {
                        return Err(Error::ContentDigest { target: target.clone() });
                    }

                    let mut open = std::fs::OpenOptions::new();
                    open.write(true).create_new(true);

                    match open.open(&path) {
                        Ok(mut file) => {
                            file.write_all(bytes)?;
                            file.set_permissions(std::fs::Permissions::from_mode(descriptor.mode))?;
                            report.entries += 1;
                        }
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => report.skipped.push(target.clone()),
                        Err(e) => return Err(e.into()),
                    }
                }
                Entry::Symlink { link, target } => match symlink(link, &path) {
                    Ok(_) => report.entries += 1,
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => report.skipped.push(target.clone()),
                    Err(e) => return Err(e.into()),
                },
            }
        }

        Ok(report)
    }
}

fn is_regular(descriptor: &Descriptor) -> bool {
    matches!(descriptor.entry, Entry::Regular { .. })
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub entries: usize,
    /// Targets skipped because they already existed at the destination
    pub skipped: Vec<String>,
}

fn validate_checksum(hasher: &digest::Hasher, header: &feature::Header) -> Result<(), Error> {
    let got = hasher.digest();
    let expected = u64::from_be_bytes(header.checksum);

    if got != expected {
        Err(Error::FeatureChecksum { got, expected })
    } else {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("header decode")]
    HeaderDecode(#[from] HeaderDecodeError),
    #[error("feature decode")]
    FeatureDecode(#[from] feature::DecodeError),
    #[error("feature checksum mismatch: got {got:02x}, expected {expected:02x}")]
    FeatureChecksum { got: u64, expected: u64 },
    #[error("container carries no filter-ops feature")]
    MissingFilterOps,
    #[error("unsupported filter-ops codec pair: encode {encode}, decode {decode}")]
    UnsupportedFilterOps { encode: u32, decode: u32 },
    #[error("container carries no content feature")]
    MissingContent,
    #[error("content frame does not declare its content size")]
    UnknownFrameSize,
    #[error("content declared {declared} plain bytes, produced {got}")]
    FrameSize { declared: u64, got: u64 },
    #[error("content span for {target} fails digest validation")]
    ContentDigest { target: String },
    #[error("content stream shorter than descriptor spans")]
    TruncatedContent,
    #[error("io")]
    Io(#[from] io::Error),
}
