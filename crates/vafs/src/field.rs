// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Field-level codec shared by the container header, the feature table
//! and the record types.
//!
//! Every multi-byte integer is big endian. Strings and blobs are raw
//! runs; their lengths travel in whichever record owns them, never
//! inline.

use std::io::{Error, ErrorKind, Read, Result, Write};

pub(crate) trait FieldRead: Read {
    /// Fixed-width run: magics, version blocks, reserved regions
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn half(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.bytes()?))
    }

    fn word(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.bytes()?))
    }

    /// A u32 length or count field, widened for indexing
    fn count(&mut self) -> Result<usize> {
        Ok(self.word()? as usize)
    }

    /// A u64 size or offset field
    fn size(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.bytes()?))
    }

    /// 16-byte feature identifier
    fn guid(&mut self) -> Result<[u8; 16]> {
        self.bytes()
    }

    /// 8-byte feature checksum (xxh3-64 of the stored bytes)
    fn checksum(&mut self) -> Result<[u8; 8]> {
        self.bytes()
    }

    /// 16-byte content digest (xxh3-128 of a file's plain bytes)
    fn digest(&mut self) -> Result<u128> {
        Ok(u128::from_be_bytes(self.bytes()?))
    }

    /// Discard a reserved region
    fn padding<const N: usize>(&mut self) -> Result<()> {
        self.bytes::<N>().map(|_| ())
    }

    fn blob(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// A UTF-8 run of exactly `length` bytes
    fn text(&mut self, length: usize) -> Result<String> {
        String::from_utf8(self.blob(length)?).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }
}

impl<T: Read> FieldRead for T {}

pub(crate) trait FieldWrite: Write {
    fn put_bytes<const N: usize>(&mut self, bytes: [u8; N]) -> Result<()> {
        self.write_all(&bytes)
    }

    fn put_byte(&mut self, field: u8) -> Result<()> {
        self.put_bytes([field])
    }

    fn put_half(&mut self, field: u16) -> Result<()> {
        self.put_bytes(field.to_be_bytes())
    }

    fn put_word(&mut self, field: u32) -> Result<()> {
        self.put_bytes(field.to_be_bytes())
    }

    fn put_count(&mut self, field: usize) -> Result<()> {
        self.put_word(field as u32)
    }

    fn put_size(&mut self, field: u64) -> Result<()> {
        self.put_bytes(field.to_be_bytes())
    }

    fn put_guid(&mut self, guid: [u8; 16]) -> Result<()> {
        self.put_bytes(guid)
    }

    fn put_checksum(&mut self, checksum: [u8; 8]) -> Result<()> {
        self.put_bytes(checksum)
    }

    fn put_digest(&mut self, digest: u128) -> Result<()> {
        self.put_bytes(digest.to_be_bytes())
    }

    fn put_padding<const N: usize>(&mut self) -> Result<()> {
        self.put_bytes([0u8; N])
    }

    fn put_text(&mut self, text: &str) -> Result<()> {
        self.write_all(text.as_bytes())
    }
}

impl<T: Write> FieldWrite for T {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields_roundtrip() {
        let mut bytes = vec![];
        bytes.put_byte(7).unwrap();
        bytes.put_half(0x0102).unwrap();
        bytes.put_word(0x0304_0506).unwrap();
        bytes.put_count(9).unwrap();
        bytes.put_size(0x0708_090a_0b0c_0d0e).unwrap();
        bytes.put_digest(42).unwrap();
        bytes.put_padding::<3>().unwrap();
        bytes.put_text("pack").unwrap();

        let mut reader = bytes.as_slice();
        assert_eq!(reader.byte().unwrap(), 7);
        assert_eq!(reader.half().unwrap(), 0x0102);
        assert_eq!(reader.word().unwrap(), 0x0304_0506);
        assert_eq!(reader.count().unwrap(), 9);
        assert_eq!(reader.size().unwrap(), 0x0708_090a_0b0c_0d0e);
        assert_eq!(reader.digest().unwrap(), 42);
        reader.padding::<3>().unwrap();
        assert_eq!(reader.text(4).unwrap(), "pack");
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let mut reader = [0xff, 0xfe].as_slice();
        assert!(reader.text(2).is_err());
    }
}
