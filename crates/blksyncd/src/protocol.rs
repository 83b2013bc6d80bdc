//! Sync protocol messages
//!
//! Every application message is one JSON object. The `Request` field selects
//! the operation; other fields carry its arguments and unknown fields are
//! ignored:
//!
//! ```text
//! {"Request":"query_block","Path":"<16 hex chars>"}
//! {"Request":"dump_block","Content":"<base64 of 65536 bytes>"}
//! {"Request":"close"}
//! ```
//!
//! Replies are `{"Result":"Success","Content":...}` or
//! `{"Result":"Error","Error":"<message>"}`.

use base64::{engine::general_purpose::STANDARD, Engine};
use blksync_core::types::{BlockHashParseError, BlockSizeError};
use blksync_core::{Block, BlockHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const OP_QUERY_BLOCK: &str = "query_block";
pub const OP_DUMP_BLOCK: &str = "dump_block";
pub const OP_CLOSE: &str = "close";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{0}")]
    Hash(#[from] BlockHashParseError),

    #[error("{0}")]
    BlockSize(#[from] BlockSizeError),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

/// A decoded inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    QueryBlock(BlockHash),
    DumpBlock(Block),
    Close,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "Request")]
    request: String,
}

#[derive(Deserialize)]
struct QueryBlockArgs {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Deserialize)]
struct DumpBlockArgs {
    #[serde(rename = "Content")]
    content: String,
}

impl Request {
    /// Decode one message payload. Text and binary frames carry the same
    /// UTF-8 JSON, so both arrive here as bytes.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let header = Header::deserialize(&value)?;

        match header.request.as_str() {
            OP_QUERY_BLOCK => {
                let args = QueryBlockArgs::deserialize(&value)?;
                Ok(Self::QueryBlock(args.path.parse()?))
            }
            OP_DUMP_BLOCK => {
                let args = DumpBlockArgs::deserialize(&value)?;
                let bytes = STANDARD.decode(args.content.as_bytes())?;
                Ok(Self::DumpBlock(Block::try_from(bytes)?))
            }
            OP_CLOSE => Ok(Self::Close),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Result")]
pub enum Response {
    Success {
        #[serde(rename = "Content")]
        content: String,
    },
    Error {
        #[serde(rename = "Error")]
        error: String,
    },
}

impl Response {
    /// Success carrying a block's bytes as base64
    pub fn block(block: &Block) -> Self {
        Self::Success {
            content: STANDARD.encode(block.as_bytes()),
        }
    }

    /// Success carrying the hash a block was stored under
    pub fn stored(hash: &BlockHash) -> Self {
        Self::Success {
            content: hash.to_string(),
        }
    }

    pub fn error(err: impl ToString) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
