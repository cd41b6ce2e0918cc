// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt;
use std::io::{self, Read, Write};

use thiserror::Error;

use crate::field::{FieldRead, FieldWrite};

/// Features are keyed by a fixed 16-byte identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId(pub [u8; 16]);

impl FeatureId {
    /// Tree descriptors: directories, regular files and symlinks
    pub const FILTER: Self = Self([
        0xb3, 0x9c, 0x2a, 0x10, 0x4e, 0x7d, 0x41, 0xa6, 0x8f, 0x35, 0xd1, 0x0c, 0x5b, 0x92, 0xee, 0x01,
    ]);
    /// Names the content codec pair; always stored uncompressed
    pub const FILTER_OPS: Self = Self([
        0xb3, 0x9c, 0x2a, 0x10, 0x4e, 0x7d, 0x41, 0xa6, 0x8f, 0x35, 0xd1, 0x0c, 0x5b, 0x92, 0xee, 0x02,
    ]);
    /// Package identity, descriptive text and maintainer fields
    pub const PACKAGE_HEADER: Self = Self([
        0x6e, 0x21, 0xcc, 0x84, 0x9a, 0x0b, 0x4f, 0x17, 0xb2, 0x60, 0x7f, 0xd4, 0x38, 0x5e, 0xaa, 0x10,
    ]);
    /// Package semantic version
    pub const PACKAGE_VERSION: Self = Self([
        0x6e, 0x21, 0xcc, 0x84, 0x9a, 0x0b, 0x4f, 0x17, 0xb2, 0x60, 0x7f, 0xd4, 0x38, 0x5e, 0xaa, 0x11,
    ]);
    /// Raw package icon bytes
    pub const PACKAGE_ICON: Self = Self([
        0x6e, 0x21, 0xcc, 0x84, 0x9a, 0x0b, 0x4f, 0x17, 0xb2, 0x60, 0x7f, 0xd4, 0x38, 0x5e, 0xaa, 0x12,
    ]);
    /// Application commands exposed by the package
    pub const PACKAGE_APPS: Self = Self([
        0x6e, 0x21, 0xcc, 0x84, 0x9a, 0x0b, 0x4f, 0x17, 0xb2, 0x60, 0x7f, 0xd4, 0x38, 0x5e, 0xaa, 0x13,
    ]);
    /// Consumption data for ingredient packs: search paths and flags
    pub const PACKAGE_OPTIONS: Self = Self([
        0x6e, 0x21, 0xcc, 0x84, 0x9a, 0x0b, 0x4f, 0x17, 0xb2, 0x60, 0x7f, 0xd4, 0x38, 0x5e, 0xaa, 0x14,
    ]);
    /// Compressed regular-file bytes; always the final feature
    pub const CONTENT: Self = Self([
        0xb3, 0x9c, 0x2a, 0x10, 0x4e, 0x7d, 0x41, 0xa6, 0x8f, 0x35, 0xd1, 0x0c, 0x5b, 0x92, 0xee, 0xff,
    ]);
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum Compression {
    // Feature has no compression
    None = 1,
    // Feature uses ZSTD compression
    Zstd = 2,
}

/// Each feature is framed by this header, immediately followed by
/// `stored_size` bytes of (possibly compressed) feature data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    pub id: FeatureId,
    pub stored_size: u64,
    pub plain_size: u64,
    pub checksum: [u8; 8],
    pub num_records: usize,
    pub version: u16,
    pub compression: Compression,
}

impl Header {
    /// Size of the encoded feature header in bytes
    pub const SIZE: usize = 16 + 8 + 8 + 8 + 4 + 2 + 1 + 1;

    pub fn decode<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let id = FeatureId(reader.guid()?);
        let stored_size = reader.size()?;
        let plain_size = reader.size()?;
        let checksum = reader.checksum()?;
        let num_records = reader.count()?;
        let version = reader.half()?;

        let compression = match reader.byte()? {
            1 => Compression::None,
            2 => Compression::Zstd,
            c => return Err(DecodeError::UnknownCompression(c)),
        };

        reader.padding::<1>()?;

        Ok(Self {
            id,
            stored_size,
            plain_size,
            checksum,
            num_records,
            version,
            compression,
        })
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.put_guid(self.id.0)?;
        writer.put_size(self.stored_size)?;
        writer.put_size(self.plain_size)?;
        writer.put_checksum(self.checksum)?;
        writer.put_count(self.num_records)?;
        writer.put_half(self.version)?;
        writer.put_byte(self.compression as u8)?;
        writer.put_padding::<1>()?;

        Ok(())
    }
}

/// The filter-ops feature names the codec pair used for tree content
/// by identifier, mirroring [`Compression`] discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOps {
    pub encode: u32,
    pub decode: u32,
}

impl FilterOps {
    pub const ZSTD: Self = Self {
        encode: Compression::Zstd as u32,
        decode: Compression::Zstd as u32,
    };

    pub const SIZE: usize = 8;

    pub fn decode_from<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let encode = reader.word()?;
        let decode = reader.word()?;
        Ok(Self { encode, decode })
    }

    pub fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.put_word(self.encode)?;
        writer.put_word(self.decode)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown feature compression: {0}")]
    UnknownCompression(u8),
    #[error("Unknown file type: {0}")]
    UnknownFileType(u8),
    #[error("Unknown pack type: {0}")]
    UnknownPackType(u32),
    #[error("Unknown command type: {0}")]
    UnknownCommandType(u32),
    #[error("io")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("io")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header {
            id: FeatureId::PACKAGE_VERSION,
            stored_size: 48,
            plain_size: 96,
            checksum: [1, 2, 3, 4, 5, 6, 7, 8],
            num_records: 1,
            version: 1,
            compression: Compression::Zstd,
        };

        let mut bytes = vec![];
        header.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Header::SIZE);

        let decoded = Header::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn filter_ops_roundtrip() {
        let mut bytes = vec![];
        FilterOps::ZSTD.encode_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), FilterOps::SIZE);

        let decoded = FilterOps::decode_from(bytes.as_slice()).unwrap();
        assert_eq!(decoded, FilterOps::ZSTD);
    }
}
