//! CRC-64 content hashing for blocks
//!
//! The checksum is CRC-64/XZ (ECMA-182 polynomial, reflected), which is
//! defined bit-for-bit so the same bytes give the same storage key on every
//! platform and in every process.

use blksync_core::{Block, BlockHash};

/// Incremental CRC-64 state
pub struct Crc64 {
    digest: crc64fast::Digest,
}

impl Crc64 {
    pub fn new() -> Self {
        Self {
            digest: crc64fast::Digest::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.write(data);
    }

    pub fn finish(&self) -> BlockHash {
        BlockHash::from_u64(self.digest.sum64())
    }
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash an arbitrary byte slice
pub fn hash_bytes(data: &[u8]) -> BlockHash {
    let mut crc = Crc64::new();
    crc.update(data);
    crc.finish()
}

/// Compute the content address of a block
pub fn hash_block(block: &Block) -> BlockHash {
    hash_bytes(block.as_bytes())
}
