// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::field::{FieldRead, FieldWrite};

pub mod v1;

/// Well defined magic field for a vafs container header
pub const VAFS_MAGIC: &[u8; 16] = b"\0VaFS\0container\0";

/// Format versions are defined as u32, to allow further mangling in future
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1 = 1,
}

/// The container format is agnostic past the first 36 bytes: a 16-byte
/// magic, a version specific data block, and a trailing version specifier
/// in big endian order.
///
/// Once the version is decoded the appropriate version-specific header
/// is materialized from the data block, keeping the format extensible.
#[repr(C)]
pub struct AgnosticHeader {
    /// 16-bytes: Magic to quickly identify a vafs container
    pub magic: [u8; 16],

    /// 16 bytes, version specific
    pub data: [u8; 16],

    /// 4-bytes, BE (u32): Format version used in the container
    pub version: [u8; 4],
}

impl AgnosticHeader {
    fn decode<R: Read>(mut reader: R) -> Result<Self, io::Error> {
        let magic = FieldRead::bytes(&mut reader)?;
        let data = FieldRead::bytes(&mut reader)?;
        let version = FieldRead::bytes(&mut reader)?;

        Ok(Self { magic, data, version })
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.put_bytes(self.magic)?;
        writer.put_bytes(self.data)?;
        writer.put_bytes(self.version)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    V1(v1::Header),
}

impl Header {
    /// Size of the encoded header in bytes
    pub const SIZE: usize = std::mem::size_of::<AgnosticHeader>();

    pub fn version(&self) -> Version {
        match self {
            Header::V1(_) => Version::V1,
        }
    }

    pub fn num_features(&self) -> u16 {
        match self {
            Header::V1(header) => header.num_features,
        }
    }

    pub fn architecture(&self) -> v1::Architecture {
        match self {
            Header::V1(header) => header.architecture,
        }
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        let version = u32::to_be_bytes(self.version() as u32);

        let data = match self {
            Header::V1(v1) => v1.encode(),
        };

        AgnosticHeader {
            magic: *VAFS_MAGIC,
            data,
            version,
        }
        .encode(writer)
    }

    pub fn decode<R: Read>(reader: R) -> Result<Self, DecodeError> {
        let header = AgnosticHeader::decode(reader)?;

        if *VAFS_MAGIC != header.magic {
            return Err(DecodeError::InvalidMagic);
        }

        let version = match u32::from_be_bytes(header.version) {
            1 => Version::V1,
            v => return Err(DecodeError::UnknownVersion(v)),
        };

        Ok(match version {
            Version::V1 => Self::V1(v1::Header::decode(header.data)?),
        })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Header must be {} bytes long", std::mem::size_of::<AgnosticHeader>())]
    NotEnoughBytes,
    #[error("Invalid magic")]
    InvalidMagic,
    #[error("Unknown version: {0}")]
    UnknownVersion(u32),
    #[error("v1 decode")]
    V1(#[from] v1::DecodeError),
    #[error("io")]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::NotEnoughBytes,
            _ => DecodeError::Io(error),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = Header::V1(v1::Header {
            architecture: v1::Architecture::X64,
            num_features: 7,
            num_descriptors: 142,
        });

        let mut bytes = vec![];
        header.encode(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Header::SIZE);

        let decoded = Header::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vec![];
        Header::V1(v1::Header {
            architecture: v1::Architecture::ARM64,
            num_features: 0,
            num_descriptors: 0,
        })
        .encode(&mut bytes)
        .unwrap();

        bytes[0] = b'x';

        assert!(matches!(Header::decode(bytes.as_slice()), Err(DecodeError::InvalidMagic)));
    }

    #[test]
    fn rejects_truncated() {
        let bytes = [0u8; 12];
        assert!(matches!(
            Header::decode(bytes.as_slice()),
            Err(DecodeError::NotEnoughBytes)
        ));
    }
}
