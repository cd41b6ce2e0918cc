// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Zstd framing for pack output.
//!
//! Readers refuse content whose frames do not declare their
//! decompressed size, so the encoder only hands out frame writers
//! pledged to an exact size: one frame per stored file, one per
//! compressed feature.

use std::io::{self, Result, Write};

use zstd::zstd_safe::zstd_sys::ZSTD_EndDirective;
use zstd::zstd_safe::{self, CParameter, InBuffer, OutBuffer, ResetDirective};

type Context = zstd_safe::CCtx<'static>;

pub struct Encoder {
    context: Context,
    output: Vec<u8>,
    read_size: usize,
}

impl Encoder {
    pub fn new() -> Result<Self> {
        let mut context = Context::create();
        context
            .set_parameter(CParameter::CompressionLevel(zstd::DEFAULT_COMPRESSION_LEVEL))
            .map_err(map_error_code)?;
        Ok(Self {
            context,
            output: vec![0; Context::out_size()],
            read_size: Context::in_size(),
        })
    }

    /// Begin a frame pledged to exactly `plain_size` decompressed
    /// bytes; the pledge lands in the frame header where decoders
    /// verify it
    pub fn frame<W: Write>(&mut self, writer: W, plain_size: u64) -> Result<Frame<'_, W>> {
        self.context
            .set_pledged_src_size(Some(plain_size))
            .map_err(map_error_code)?;

        Ok(Frame {
            writer,
            encoder: self,
            plain_bytes: 0,
        })
    }
}

/// One in-flight frame; [`Frame::finish`] terminates it and readies
/// the encoder for the next
pub struct Frame<'a, W: Write> {
    writer: W,
    encoder: &'a mut Encoder,
    pub plain_bytes: u64,
}

impl<W: Write> Frame<'_, W> {
    pub fn finish(mut self) -> Result<()> {
        let mut finished = false;

        while !finished {
            let mut output = OutBuffer::around(&mut self.encoder.output);

            let remaining = self
                .encoder
                .context
                .compress_stream2(&mut output, &mut InBuffer::around(&[]), ZSTD_EndDirective::ZSTD_e_end)
                .map_err(map_error_code)?;

            self.writer.write_all(output.as_slice())?;

            finished = remaining == 0;
        }

        self.encoder
            .context
            .reset(ResetDirective::SessionOnly)
            .map_err(map_error_code)?;
        self.encoder
            .context
            .set_pledged_src_size(None)
            .map_err(map_error_code)?;

        self.writer.flush()?;

        Ok(())
    }
}

impl<W: Write> Write for Frame<'_, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut input = InBuffer::around(&buf[0..usize::min(self.encoder.read_size, buf.len())]);
        let mut finished = false;

        while !finished {
            let mut output = OutBuffer::around(&mut self.encoder.output);

            let remaining = self
                .encoder
                .context
                .compress_stream2(&mut output, &mut input, ZSTD_EndDirective::ZSTD_e_continue)
                .map_err(map_error_code)?;

            self.writer.write_all(output.as_slice())?;

            finished = remaining == 0;
        }

        self.plain_bytes += input.pos as u64;

        Ok(input.pos)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }
}

fn map_error_code(code: usize) -> io::Error {
    let msg = zstd_safe::get_error_name(code);
    io::Error::other(msg.to_string())
}
