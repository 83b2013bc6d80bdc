use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Size of every stored block: 64 KiB
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Width of a rendered block hash (64-bit checksum as hex)
pub const HASH_HEX_LEN: usize = 16;

/// A buffer was not exactly [`BLOCK_SIZE`] bytes long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("block must be exactly {BLOCK_SIZE} bytes, got {0}")]
pub struct BlockSizeError(pub usize);

/// A fixed-size unit of data, the unit of deduplication and storage.
///
/// The length invariant is enforced at construction, so anything holding a
/// `Block` can hash and encode it without re-checking.
#[derive(Clone, PartialEq, Eq)]
pub struct Block(Box<[u8]>);

impl Block {
    /// A block of all zero bytes
    pub fn zeroed() -> Self {
        Self(vec![0u8; BLOCK_SIZE].into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for Block {
    type Error = BlockSizeError;

    fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
        if data.len() != BLOCK_SIZE {
            return Err(BlockSizeError(data.len()));
        }
        Ok(Self(data.into_boxed_slice()))
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block").field("len", &self.0.len()).finish()
    }
}

/// Error parsing a block hash from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid block hash '{0}': expected {HASH_HEX_LEN} hex characters")]
pub struct BlockHashParseError(pub String);

/// Content address of a block: a 64-bit checksum of its bytes.
///
/// Rendered as 16 lowercase hex characters; that string is the stored file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockHash(u64);

impl BlockHash {
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for BlockHash {
    type Err = BlockHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // from_str_radix alone would accept a leading '+' and short strings
        if s.len() != HASH_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BlockHashParseError(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| BlockHashParseError(s.to_string()))
    }
}

impl TryFrom<String> for BlockHash {
    type Error = BlockHashParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlockHash> for String {
    fn from(hash: BlockHash) -> Self {
        hash.to_string()
    }
}

/// Snapshot of a file's stat metadata at ingest time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
    /// Status change time, seconds since the Unix epoch
    pub ctime: i64,
}

impl FileStat {
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            size: meta.size(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            nlink: meta.nlink(),
            mtime: meta.mtime(),
            ctime: meta.ctime(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self {
            size: meta.len(),
            nlink: 1,
            mtime,
            ..Default::default()
        }
    }
}

/// Manifest for one logical file: its entry name, a stat snapshot, and the
/// ordered block hashes ("pages") that make up its content.
///
/// This is a passive value type. Nothing in the store reads or writes it; a
/// chunking component would own its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub entry: String,
    pub stat: FileStat,
    pub pages: Vec<BlockHash>,
}

impl DirectoryEntry {
    pub fn new(path: &str, stat: FileStat) -> Self {
        Self {
            entry: Self::path_to_entry(path),
            stat,
            pages: Vec::new(),
        }
    }

    /// Encode a file path as an entry name (standard base64 of the path bytes)
    pub fn path_to_entry(path: &str) -> String {
        STANDARD.encode(path.as_bytes())
    }

    /// Build an entry from a file on disk with no pages yet
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self::new(
            &path.to_string_lossy(),
            FileStat::from_metadata(&meta),
        ))
    }
}
