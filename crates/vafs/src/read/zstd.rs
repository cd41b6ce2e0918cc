// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Streaming decode of a pack's zstd frames.

use std::io::{BufReader, Read, Result};

use zstd::stream::read::Decoder;

/// Decoder over one or more concatenated frames, as stored in the
/// content feature (one frame per file) and in compressed features
/// (a single frame)
pub struct Frames<R: Read> {
    decoder: Decoder<'static, BufReader<R>>,
}

impl<R: Read> Frames<R> {
    pub fn new(reader: R) -> Result<Self> {
        Ok(Self {
            decoder: Decoder::new(reader)?,
        })
    }
}

impl<R: Read> Read for Frames<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.decoder.read(buf)
    }
}

/// Decompressed size declared by the frame starting at `bytes`.
///
/// A conforming encoder pledges every frame's size; a frame without
/// one was not produced by this codec and is refused upstream.
pub fn declared_size(bytes: &[u8]) -> Option<u64> {
    zstd::zstd_safe::get_frame_content_size(bytes).ok().flatten()
}
