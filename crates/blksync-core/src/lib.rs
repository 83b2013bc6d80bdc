pub mod config;
pub mod error;
pub mod types;

pub use error::{BlksyncError, BlksyncResult};
pub use types::{Block, BlockHash, BLOCK_SIZE};

/// Version of the block format and protocol core, reported by `/version`.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
