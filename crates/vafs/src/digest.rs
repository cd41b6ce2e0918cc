// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Checksum plumbing: features carry an xxh3-64 over their stored
//! bytes, regular files an xxh3-128 over their plain bytes. Both flow
//! through the same summing adaptor.

use std::io::{Read, Result, Write};

use xxhash_rust::xxh3::Xxh3;

pub type Hasher = Xxh3;

/// Feeds every byte that passes through it into a shared [`Hasher`],
/// counting as it goes. Wraps a writer to sum what lands in a spool,
/// or a reader to sum what comes back out; only bytes the inner side
/// actually accepted are summed.
pub struct Summed<'a, T> {
    inner: T,
    hasher: &'a mut Hasher,
    pub bytes: u64,
}

impl<'a, T> Summed<'a, T> {
    pub fn new(inner: T, hasher: &'a mut Hasher) -> Self {
        Self {
            inner,
            hasher,
            bytes: 0,
        }
    }
}

impl<T: Write> Write for Summed<'_, T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

impl<T: Read> Read for Summed<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.bytes += read as u64;
        Ok(read)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let payload = b"content under test";

        let mut write_hasher = Hasher::new();
        let mut spool = vec![];
        {
            let mut summed = Summed::new(&mut spool, &mut write_hasher);
            summed.write_all(payload).unwrap();
            assert_eq!(summed.bytes, payload.len() as u64);
        }

        let mut read_hasher = Hasher::new();
        let mut drained = vec![];
        {
            let mut summed = Summed::new(spool.as_slice(), &mut read_hasher);
            summed.read_to_end(&mut drained).unwrap();
        }

        assert_eq!(drained, payload);
        assert_eq!(write_hasher.digest(), read_hasher.digest());
    }
}
