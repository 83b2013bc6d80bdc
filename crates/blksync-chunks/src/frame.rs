//! Streaming zstd frames for fixed-size blocks
//!
//! Each stored block is exactly one zstd frame. Encoding and decoding are
//! driven in three explicit phases (begin, update, end) over the raw zstd
//! streaming API, so callers can feed input in whatever pieces they read it
//! and a complete frame is distinguishable from a truncated one.
//!
//! Frame layout: standard zstd frame header with the content size pledged
//! (always `BLOCK_SIZE`), compressed blocks, and an optional 4-byte content
//! checksum trailer.

use std::io;

use blksync_core::config::CodecConfig;
use blksync_core::{Block, BLOCK_SIZE};
use thiserror::Error;
use zstd::stream::raw::{CParameter, Decoder, Encoder, Operation, OutBuffer};

/// Extra room added whenever the encoder runs out of output space
const GROW_STEP: usize = 4 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame error: {0}")]
    Frame(#[from] io::Error),

    #[error("incomplete frame: input ended after {0} decoded bytes")]
    Incomplete(usize),

    #[error("block length mismatch: got {actual} bytes, expected {expected}")]
    Length { actual: usize, expected: usize },

    #[error("trailing data after end of frame")]
    TrailingData,
}

/// Compression settings for new frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub level: i32,
    pub checksum: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
            checksum: true,
        }
    }
}

impl From<&CodecConfig> for FrameOptions {
    fn from(cfg: &CodecConfig) -> Self {
        Self {
            level: cfg.level,
            checksum: cfg.checksum,
        }
    }
}

/// Worst-case size of a frame holding `len` input bytes.
///
/// Holds even for incompressible input, so callers can allocate once.
pub fn frame_bound(len: usize) -> usize {
    zstd::zstd_safe::compress_bound(len)
}

/// Incremental encoder producing one frame for one block
pub struct FrameEncoder {
    ctx: Encoder<'static>,
    out: Vec<u8>,
    written: usize,
    fed: usize,
}

impl FrameEncoder {
    /// Start a new frame. The block size is pledged up front and written into
    /// the frame header.
    pub fn begin(opts: FrameOptions) -> Result<Self, CodecError> {
        let mut ctx = Encoder::new(opts.level)?;
        ctx.set_parameter(CParameter::ChecksumFlag(opts.checksum))?;
        ctx.set_pledged_src_size(Some(BLOCK_SIZE as u64))?;

        Ok(Self {
            ctx,
            out: vec![0u8; frame_bound(BLOCK_SIZE)],
            written: 0,
            fed: 0,
        })
    }

    /// Feed the next piece of block data
    pub fn update(&mut self, input: &[u8]) -> Result<(), CodecError> {
        if self.fed + input.len() > BLOCK_SIZE {
            return Err(CodecError::Length {
                actual: self.fed + input.len(),
                expected: BLOCK_SIZE,
            });
        }

        let mut consumed = 0;
        while consumed < input.len() {
            if self.written == self.out.len() {
                self.grow();
            }
            let status = self
                .ctx
                .run_on_buffers(&input[consumed..], &mut self.out[self.written..])?;
            consumed += status.bytes_read;
            self.written += status.bytes_written;
            if status.bytes_read == 0 && status.bytes_written == 0 {
                self.grow();
            }
        }

        self.fed += input.len();
        Ok(())
    }

    /// Flush the frame epilogue and return the finished frame bytes
    pub fn end(mut self) -> Result<Vec<u8>, CodecError> {
        if self.fed != BLOCK_SIZE {
            return Err(CodecError::Length {
                actual: self.fed,
                expected: BLOCK_SIZE,
            });
        }

        loop {
            if self.written == self.out.len() {
                self.grow();
            }
            let mut out = OutBuffer::around(&mut self.out[self.written..]);
            let remaining = self.ctx.finish(&mut out, true)?;
            let pos = out.pos();
            self.written += pos;
            if remaining == 0 {
                break;
            }
            self.grow();
        }

        self.out.truncate(self.written);
        Ok(self.out)
    }

    fn grow(&mut self) {
        self.out.resize(self.out.len() + GROW_STEP, 0);
    }
}

/// Incremental decoder reconstructing one block from one frame.
///
/// Input may arrive in pieces of any size. The output buffer carries one
/// byte of slack past `BLOCK_SIZE`, so an oversized payload is detected as
/// soon as it overflows instead of stalling the decoder.
pub struct FrameDecoder {
    ctx: Decoder<'static>,
    block: Vec<u8>,
    filled: usize,
    complete: bool,
}

impl FrameDecoder {
    pub fn new() -> Result<Self, CodecError> {
        Ok(Self {
            ctx: Decoder::new()?,
            block: vec![0u8; BLOCK_SIZE + 1],
            filled: 0,
            complete: false,
        })
    }

    /// Feed the next piece of frame data
    pub fn update(&mut self, chunk: &[u8]) -> Result<(), CodecError> {
        let mut consumed = 0;
        while consumed < chunk.len() {
            if self.complete {
                return Err(CodecError::TrailingData);
            }

            let status = self
                .ctx
                .run_on_buffers(&chunk[consumed..], &mut self.block[self.filled..])?;
            consumed += status.bytes_read;
            self.filled += status.bytes_written;

            if self.filled > BLOCK_SIZE {
                return Err(CodecError::Length {
                    actual: self.filled,
                    expected: BLOCK_SIZE,
                });
            }
            if status.remaining == 0 {
                self.complete = true;
            } else if status.bytes_read == 0 && status.bytes_written == 0 {
                return Err(CodecError::Frame(io::Error::other(
                    "zstd decoder made no progress",
                )));
            }
        }
        Ok(())
    }

    /// Whether the end-of-frame marker has been reached
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Finish decoding; the frame must be complete and hold exactly one block
    pub fn finish(mut self) -> Result<Block, CodecError> {
        if !self.complete {
            return Err(CodecError::Incomplete(self.filled));
        }
        if self.filled != BLOCK_SIZE {
            return Err(CodecError::Length {
                actual: self.filled,
                expected: BLOCK_SIZE,
            });
        }
        self.block.truncate(BLOCK_SIZE);
        Block::try_from(self.block).map_err(|e| CodecError::Length {
            actual: e.0,
            expected: BLOCK_SIZE,
        })
    }
}

/// Compress one block into a complete frame
pub fn encode_block(block: &Block, opts: FrameOptions) -> Result<Vec<u8>, CodecError> {
    let mut encoder = FrameEncoder::begin(opts)?;
    encoder.update(block.as_bytes())?;
    let frame = encoder.end()?;
    tracing::trace!(
        compressed = frame.len(),
        level = opts.level,
        "encoded block frame"
    );
    Ok(frame)
}

/// Decompress a complete frame held in memory
pub fn decode_block(frame: &[u8]) -> Result<Block, CodecError> {
    let mut decoder = FrameDecoder::new()?;
    decoder.update(frame)?;
    decoder.finish()
}
