//! blksync-chunks: content hashing and frame compression for fixed-size blocks
//!
//! # Overview
//! - `crc64`: deterministic 64-bit checksum (content identity / storage key)
//! - `frame`: streaming zstd frames with begin/update/end phases

pub mod crc64;
pub mod frame;

// Convenience re-exports for the most common operations
pub use crc64::{hash_block, hash_bytes, Crc64};
pub use frame::{
    decode_block, encode_block, frame_bound, CodecError, FrameDecoder, FrameEncoder, FrameOptions,
};
