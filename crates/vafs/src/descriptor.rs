// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::{Read, Write};

use crate::feature::{DecodeError, EncodeError};
use crate::field::{FieldRead, FieldWrite};

/// Descriptors record their target file type so the tree can be
/// rebuilt at extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum FileType {
    /// Regular file
    Regular = 1,

    /// Symbolic link (link + target set)
    Symlink,

    /// Directory node
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Content digest plus the `[start, end)` span into the
    /// decompressed content stream
    Regular { digest: u128, start: u64, end: u64, target: String },
    /// Stored link value and the path the symlink lives at
    Symlink { link: String, target: String },
    Directory { target: String },
}

impl Entry {
    fn source(&self) -> Vec<u8> {
        match self {
            Entry::Regular { digest, start, end, .. } => {
                let mut bytes = Vec::with_capacity(32);
                bytes.extend(digest.to_be_bytes());
                bytes.extend(start.to_be_bytes());
                bytes.extend(end.to_be_bytes());
                bytes
            }
            Entry::Symlink { link, .. } => link.as_bytes().to_vec(),
            Entry::Directory { .. } => vec![],
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Entry::Regular { target, .. } => target,
            Entry::Symlink { target, .. } => target,
            Entry::Directory { target } => target,
        }
    }

    pub fn file_type(&self) -> FileType {
        match self {
            Entry::Regular { .. } => FileType::Regular,
            Entry::Symlink { .. } => FileType::Symlink,
            Entry::Directory { .. } => FileType::Directory,
        }
    }
}

/// One node of the packed install tree with its UNIX permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub mode: u32,
    pub entry: Entry,
}

impl Descriptor {
    pub(crate) fn decode<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let mode = reader.word()?;
        let source_length = reader.half()?;
        let target_length = reader.half()?;

        let file_type = match reader.byte()? {
            1 => FileType::Regular,
            2 => FileType::Symlink,
            3 => FileType::Directory,
            t => return Err(DecodeError::UnknownFileType(t)),
        };

        reader.padding::<7>()?;

        let entry = match file_type {
            FileType::Regular => {
                let digest = reader.digest()?;
                let start = reader.size()?;
                let end = reader.size()?;
                Entry::Regular {
                    digest,
                    start,
                    end,
                    target: reader.text(target_length as usize)?,
                }
            }
            FileType::Symlink => Entry::Symlink {
                link: reader.text(source_length as usize)?,
                target: reader.text(target_length as usize)?,
            },
            FileType::Directory => Entry::Directory {
                target: reader.text(target_length as usize)?,
            },
        };

        Ok(Self { mode, entry })
    }

    pub(crate) fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let source = self.entry.source();
        let target = self.entry.target();

        writer.put_word(self.mode)?;
        writer.put_half(source.len() as u16)?;
        writer.put_half(target.len() as u16)?;
        writer.put_byte(self.entry.file_type() as u8)?;
        writer.put_padding::<7>()?;
        writer.write_all(&source)?;
        writer.put_text(target)?;

        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        4 + 2 + 2 + 1 + 7 + self.entry.source().len() + self.entry.target().len()
    }
}

pub(crate) fn decode_records<R: Read>(mut reader: R, num_records: usize) -> Result<Vec<Descriptor>, DecodeError> {
    let mut records = Vec::with_capacity(num_records);

    for _ in 0..num_records {
        records.push(Descriptor::decode(&mut reader)?);
    }

    Ok(records)
}

pub(crate) fn encode_records<W: Write>(writer: &mut W, records: &[Descriptor]) -> Result<(), EncodeError> {
    for record in records {
        record.encode(writer)?;
    }
    Ok(())
}

pub(crate) fn records_total_size(records: &[Descriptor]) -> usize {
    records.iter().map(Descriptor::size).sum()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let records = vec![
            Descriptor {
                mode: 0o755,
                entry: Entry::Directory { target: "bin".into() },
            },
            Descriptor {
                mode: 0o755,
                entry: Entry::Regular {
                    digest: 0xdead_beef_cafe,
                    start: 0,
                    end: 1024,
                    target: "bin/tool".into(),
                },
            },
            Descriptor {
                mode: 0o777,
                entry: Entry::Symlink {
                    link: "tool".into(),
                    target: "bin/latest".into(),
                },
            },
        ];

        let mut bytes = vec![];
        encode_records(&mut bytes, &records).unwrap();
        assert_eq!(bytes.len(), records_total_size(&records));

        let decoded = decode_records(bytes.as_slice(), records.len()).unwrap();
        assert_eq!(decoded, records);
    }
}
