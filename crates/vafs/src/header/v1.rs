// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

/// Machine architecture the packed tree was built for
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Architecture {
    X86 = 1,
    X64 = 2,
    ARM = 3,
    ARM64 = 4,
    RISCV32 = 5,
    RISCV64 = 6,
}

/// Version 1 header block: architecture tag, feature count and the
/// total number of tree descriptors across the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub architecture: Architecture,
    pub num_features: u16,
    pub num_descriptors: u32,
}

impl Header {
    /// Encode the v1 header into the agnostic data block
    pub fn encode(&self) -> [u8; 16] {
        let mut data = [0u8; 16];

        data[0..2].copy_from_slice(&(self.architecture as u16).to_be_bytes());
        data[2..4].copy_from_slice(&self.num_features.to_be_bytes());
        data[4..8].copy_from_slice(&self.num_descriptors.to_be_bytes());

        data
    }

    pub fn decode(data: [u8; 16]) -> Result<Self, DecodeError> {
        let architecture = match u16::from_be_bytes([data[0], data[1]]) {
            1 => Architecture::X86,
            2 => Architecture::X64,
            3 => Architecture::ARM,
            4 => Architecture::ARM64,
            5 => Architecture::RISCV32,
            6 => Architecture::RISCV64,
            a => return Err(DecodeError::UnknownArchitecture(a)),
        };
        let num_features = u16::from_be_bytes([data[2], data[3]]);
        let num_descriptors = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

        Ok(Self {
            architecture,
            num_features,
            num_descriptors,
        })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(u16),
}
