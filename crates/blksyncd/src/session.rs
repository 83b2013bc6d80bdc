//! Per-connection sync session
//!
//! A session answers each inbound message with exactly one reply, in order,
//! in the same framing (text or binary) the request used. It holds no state
//! about the store between requests; its only state is whether it is still
//! open. No error from a request closes the session.

use axum::extract::ws::{close_code, CloseFrame, Message};
use blksync_core::{Block, BlockHash};
use blksync_storage::{BlockError, BlockStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::protocol::{Request, Response, OP_DUMP_BLOCK, OP_QUERY_BLOCK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// Framing of an inbound message, mirrored on the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Text,
    Binary,
}

pub struct Session {
    store: BlockStore,
    metrics: Arc<Metrics>,
    peer: SocketAddr,
    state: State,
}

impl Session {
    pub fn new(store: BlockStore, metrics: Arc<Metrics>, peer: SocketAddr) -> Self {
        Self {
            store,
            metrics,
            peer,
            state: State::Open,
        }
    }

    pub fn on_open(&self) {
        self.metrics.sessions_open.inc();
        info!(peer = %self.peer, "sync connection opened");
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Handle one inbound frame and return the frame to send back, if any.
    ///
    /// A `close` request yields a normal-closure Close frame; a Close frame
    /// from the peer closes the session without a reply (the websocket layer
    /// answers it).
    pub async fn on_message(&mut self, msg: Message) -> Option<Message> {
        if !self.is_open() {
            return None;
        }

        let (framing, request) = match &msg {
            Message::Text(text) => (Framing::Text, Request::parse(text.as_str().as_bytes())),
            Message::Binary(data) => (Framing::Binary, Request::parse(data)),
            Message::Close(frame) => {
                debug!(peer = %self.peer, frame = ?frame, "peer sent close");
                self.state = State::Closed;
                return None;
            }
            Message::Ping(_) | Message::Pong(_) => return None,
        };

        let response = match request {
            Ok(Request::Close) => {
                debug!(peer = %self.peer, "close requested");
                self.state = State::Closed;
                return Some(Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "".into(),
                })));
            }
            Ok(Request::QueryBlock(hash)) => self.query_block(hash).await,
            Ok(Request::DumpBlock(block)) => self.dump_block(block).await,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "bad request");
                Response::error(e)
            }
        };

        if matches!(response, Response::Error { .. }) {
            self.metrics.request_errors.inc();
        }
        encode_reply(&response, framing)
    }

    /// Called once per `on_open`, when the transport is gone
    pub fn on_close(&mut self) {
        self.state = State::Closed;
        self.metrics.sessions_open.dec();
        info!(peer = %self.peer, "sync connection closed");
    }

    async fn query_block(&self, hash: BlockHash) -> Response {
        debug!(peer = %self.peer, hash = %hash, "query_block");
        match self.store.get(&hash).await {
            Ok(block) => {
                self.metrics.blocks_read.inc();
                Response::block(&block)
            }
            Err(e) => store_error(OP_QUERY_BLOCK, e),
        }
    }

    async fn dump_block(&self, block: Block) -> Response {
        debug!(peer = %self.peer, "dump_block");
        match self.store.put(&block).await {
            Ok(hash) => {
                self.metrics.blocks_written.inc();
                Response::stored(&hash)
            }
            Err(e) => store_error(OP_DUMP_BLOCK, e),
        }
    }
}

fn store_error(operation: &str, err: BlockError) -> Response {
    match &err {
        BlockError::NoSuchBlock(hash) => debug!(operation, hash = %hash, "no such block"),
        // Already logged by the store
        BlockError::CorruptBlock { .. } => {}
        BlockError::StoreIo(e) => error!(operation, error = %e, "store I/O failure"),
        BlockError::Encode(e) => error!(operation, error = %e, "block encoding failed"),
    }
    Response::error(err)
}

fn encode_reply(response: &Response, framing: Framing) -> Option<Message> {
    let json = match response.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "failed to encode response");
            return None;
        }
    };
    Some(match framing {
        Framing::Text => Message::Text(json.into()),
        Framing::Binary => Message::Binary(json.into_bytes().into()),
    })
}
