//! Sync endpoint: websocket at `/stream`, version info at `/version`

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use blksync_storage::BlockStore;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::metrics::Metrics;
use crate::session::Session;

/// Shared by every connection; the store handle is cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub store: BlockStore,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    #[serde(rename = "Backend")]
    backend: &'static str,
    #[serde(rename = "Core")]
    core: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_upgrade))
        .route("/version", get(version))
        .with_state(state)
}

/// Serve the sync endpoint on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("sync server")
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        backend: env!("CARGO_PKG_VERSION"),
        core: blksync_core::CORE_VERSION,
    })
}

/// GET /stream
async fn stream_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state, peer))
}

/// Drive one session: one reply per message, each request finished before
/// the next frame is read.
async fn run_connection(mut socket: WebSocket, state: AppState, peer: SocketAddr) {
    let mut session = Session::new(state.store, state.metrics, peer);
    session.on_open();

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "websocket receive error");
                break;
            }
        };

        if let Some(reply) = session.on_message(msg).await {
            if let Err(e) = socket.send(reply).await {
                tracing::warn!(peer = %peer, error = %e, "websocket send error");
                break;
            }
        }
        if !session.is_open() {
            break;
        }
    }

    session.on_close();
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use blksync_chunks::hash_block;
    use blksync_core::config::{CodecConfig, ServerConfig};
    use blksync_core::{Block, BLOCK_SIZE};
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    use crate::protocol::Response;

    async fn start_server(
        dir: &std::path::Path,
    ) -> (SocketAddr, Arc<Metrics>, tokio::sync::oneshot::Sender<()>) {
        let server = ServerConfig {
            dictionary: dir.join("blocks"),
            ..Default::default()
        };
        let store = BlockStore::open(&server, &CodecConfig::default())
            .await
            .expect("open store");
        let metrics = Arc::new(Metrics::default());
        let state = AppState {
            store,
            metrics: metrics.clone(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            serve(listener, state, async move {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
        });
        (addr, metrics, stop_tx)
    }

    fn parse_reply(msg: Message) -> Response {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            Message::Binary(data) => serde_json::from_slice(&data).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_roundtrip_over_websocket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (addr, _metrics, _stop) = start_server(tmp.path()).await;

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/stream"))
            .await
            .expect("websocket connect");
        let (mut write, mut read) = ws.split();

        // Scenario A: store the zero block, then read it back
        let content = STANDARD.encode(vec![0u8; BLOCK_SIZE]);
        let dump = format!(r#"{{"Request":"dump_block","Content":"{content}"}}"#);
        write.send(Message::text(dump)).await.unwrap();
        let reply = read.next().await.unwrap().unwrap();
        assert!(reply.is_text());
        let zero_hash = hash_block(&Block::zeroed()).to_string();
        assert_eq!(
            parse_reply(reply),
            Response::Success {
                content: zero_hash.clone()
            }
        );

        let query = format!(r#"{{"Request":"query_block","Path":"{zero_hash}"}}"#);
        write.send(Message::text(query)).await.unwrap();
        let reply = read.next().await.unwrap().unwrap();
        assert_eq!(parse_reply(reply), Response::Success { content });

        // Scenario B: unknown operation, sent as a binary frame
        write
            .send(Message::binary(br#"{"Request":"frobnicate"}"#.to_vec()))
            .await
            .unwrap();
        let reply = read.next().await.unwrap().unwrap();
        assert!(reply.is_binary());
        assert_eq!(
            parse_reply(reply),
            Response::Error {
                error: "Unknown operation: frobnicate".into()
            }
        );

        // Connection remains usable, then closes normally on request
        write
            .send(Message::text(r#"{"Request":"close"}"#))
            .await
            .unwrap();
        match read.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    async fn wait_for_sessions(metrics: &Metrics, expected: i64) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while metrics.sessions_open.get() != expected {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("sessions_open never reached {expected}"));
    }

    #[tokio::test]
    async fn client_dropped_mid_session_ends_connection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (addr, metrics, _stop) = start_server(tmp.path()).await;
        let url = format!("ws://{addr}/stream");

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        ws.send(Message::text(r#"{"Request":"frobnicate"}"#))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert!(matches!(parse_reply(reply), Response::Error { .. }));
        wait_for_sessions(&metrics, 1).await;

        // Gone without a close handshake
        drop(ws);
        wait_for_sessions(&metrics, 0).await;

        // The server keeps accepting sessions
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let zero = hash_block(&Block::zeroed());
        ws.send(Message::text(format!(
            r#"{{"Request":"query_block","Path":"{zero}"}}"#
        )))
        .await
        .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(
            parse_reply(reply),
            Response::Error {
                error: format!("No such block: {zero}")
            }
        );
        assert_eq!(metrics.request_errors.get(), 2);
    }

    #[tokio::test]
    async fn version_reports_backend_and_core() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (addr, _metrics, _stop) = start_server(tmp.path()).await;

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let req = format!("GET /version HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).await.unwrap();

        assert!(resp.starts_with("HTTP/1.1 200"), "{resp}");
        let body = resp.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["Backend"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["Core"], blksync_core::CORE_VERSION);
    }

    #[tokio::test]
    async fn server_stops_on_shutdown_signal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let server = ServerConfig {
            dictionary: tmp.path().join("blocks"),
            ..Default::default()
        };
        let state = AppState {
            store: BlockStore::open(&server, &CodecConfig::default()).await.unwrap(),
            metrics: Arc::new(Metrics::default()),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, state, async move {
            let _ = stop_rx.await;
        }));

        stop_tx.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not stop");
        assert!(result.unwrap().is_ok());
    }
}
