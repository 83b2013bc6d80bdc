//! Content-addressed block store.
//!
//! Each block is stored as one zstd frame at `{root}/{hex_hash}`, where the
//! hash is the CRC-64 of the uncompressed block. Identical content always
//! maps to the same file, so writes are idempotent and need no locking.
//! There is no in-memory cache: every call goes to the operator.

use blksync_chunks::{encode_block, hash_block, CodecError, FrameDecoder, FrameOptions};
use blksync_core::config::{CodecConfig, ServerConfig};
use blksync_core::{BlksyncResult, Block, BlockHash};
use bytes::Buf;
use opendal::{Buffer, ErrorKind, Operator};
use thiserror::Error;
use tracing::{debug, warn};

use crate::operator;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("No such block: {0}")]
    NoSuchBlock(BlockHash),

    #[error("Corrupt block {hash}: {reason}")]
    CorruptBlock { hash: BlockHash, reason: String },

    #[error("Store I/O failure: {0}")]
    StoreIo(#[from] opendal::Error),

    #[error("Block encoding failed: {0}")]
    Encode(#[source] CodecError),
}

/// Handle to a block store. Cheap to clone; clones share the same operator.
#[derive(Debug, Clone)]
pub struct BlockStore {
    op: Operator,
    frame: FrameOptions,
}

impl BlockStore {
    /// Wrap an existing operator (e.g. an in-memory one in tests)
    pub fn new(op: Operator, frame: FrameOptions) -> Self {
        Self { op, frame }
    }

    /// Open the on-disk store described by `server`, creating directories
    /// as needed.
    pub async fn open(server: &ServerConfig, codec: &CodecConfig) -> BlksyncResult<Self> {
        operator::prepare_dirs(server).await?;
        let op = operator::build_fs_operator(server)?;
        Ok(Self::new(op, FrameOptions::from(codec)))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Read and decompress the block stored under `hash`.
    pub async fn get(&self, hash: &BlockHash) -> Result<Block, BlockError> {
        let buffer = match self.op.read(&hash.to_string()).await {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlockError::NoSuchBlock(*hash));
            }
            Err(e) => return Err(BlockError::StoreIo(e)),
        };

        let block = decode_buffer(buffer).map_err(|e| corrupt(hash, e.to_string()))?;

        // Content no longer matching its address is corruption too
        let actual = hash_block(&block);
        if actual != *hash {
            return Err(corrupt(hash, format!("content hashes to {actual}")));
        }

        debug!(hash = %hash, "block read");
        Ok(block)
    }

    /// Compress and store `block` under its content hash, returning the hash.
    ///
    /// Storing the same content again rewrites an identical file.
    pub async fn put(&self, block: &Block) -> Result<BlockHash, BlockError> {
        let hash = hash_block(block);
        let frame = encode_block(block, self.frame).map_err(BlockError::Encode)?;
        let compressed = frame.len();

        self.op.write(&hash.to_string(), frame).await?;

        debug!(hash = %hash, compressed, "block written");
        Ok(hash)
    }

    /// Check whether a block is stored, without decoding it
    pub async fn exists(&self, hash: &BlockHash) -> Result<bool, BlockError> {
        Ok(self.op.exists(&hash.to_string()).await?)
    }
}

fn corrupt(hash: &BlockHash, reason: String) -> BlockError {
    warn!(hash = %hash, reason = %reason, "corrupt block");
    BlockError::CorruptBlock {
        hash: *hash,
        reason,
    }
}

/// Feed the stored bytes to the frame decoder piece by piece, as they were read
fn decode_buffer(mut buffer: Buffer) -> Result<Block, CodecError> {
    let mut decoder = FrameDecoder::new()?;
    while buffer.has_remaining() {
        let chunk = buffer.chunk();
        let len = chunk.len();
        decoder.update(chunk)?;
        buffer.advance(len);
    }
    decoder.finish()
}
