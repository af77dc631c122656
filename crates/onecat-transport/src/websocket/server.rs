//! WebSocket server binding.
//!
//! The gateway connects to us. Every accepted socket is checked against the
//! configured token before any frame is read; a missing or wrong
//! `access_token` closes the socket with `1008`. Text frames are then handed
//! to the installed [`FrameHandler`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use onecat_core::{
    CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, ListenerHandle, TransportError, TransportResult,
    WsSender, WsServerConfig, WsConnection,
};

/// Processes frames of accepted WebSocket connections.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Called once per accepted, authenticated connection.
    async fn on_open(&self, _peer: SocketAddr, _sender: WsSender) {}

    /// Handles one text frame. A returned string is sent back on the same
    /// socket; an error closes the socket with `1011`.
    async fn on_frame(&self, peer: SocketAddr, text: &str) -> TransportResult<Option<String>>;

    /// Called when a connection ends.
    async fn on_close(&self, _peer: SocketAddr) {}
}

/// Default frame handler: sends every frame back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoFrames;

#[async_trait]
impl FrameHandler for EchoFrames {
    async fn on_frame(&self, _peer: SocketAddr, text: &str) -> TransportResult<Option<String>> {
        Ok(Some(text.to_string()))
    }
}

const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

struct ServerState {
    name: String,
    token: Option<String>,
    handler: Arc<RwLock<Arc<dyn FrameHandler>>>,
}

/// A bound WebSocket server.
pub struct WsServerBinding {
    config: WsServerConfig,
    handler: Arc<RwLock<Arc<dyn FrameHandler>>>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl WsServerBinding {
    /// Creates the binding with the echo handler installed.
    pub fn new(config: WsServerConfig) -> Self {
        Self {
            config,
            handler: Arc::new(RwLock::new(Arc::new(EchoFrames))),
            listener: Mutex::new(None),
        }
    }

    /// The binding configuration.
    pub fn config(&self) -> &WsServerConfig {
        &self.config
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Replaces the frame handler. Applies to connections accepted afterwards.
    pub fn set_frame_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write() = handler;
    }

    /// Returns the bound address, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(ListenerHandle::local_addr)
    }

    /// Binds the listener and starts accepting connections.
    pub async fn bind(&self) -> TransportResult<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let path = onecat_core::binding::normalize_path(&self.config.path);
        let state = Arc::new(ServerState {
            name: self.config.name.clone(),
            token: self.config.token.clone().filter(|t| !t.is_empty()),
            handler: self.handler.clone(),
        });

        let router = Router::new()
            .route(&path, get(ws_handler))
            .with_state(state);

        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!(name = %self.config.name, addr = %local_addr, path = %path, "WebSocket server listening");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let name = self.config.name.clone();
        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

            if let Err(e) = server.await {
                error!(name = %name, error = %e, "WebSocket server error");
            }
            info!(name = %name, "WebSocket server stopped");
        });

        *self.listener.lock() = Some(ListenerHandle::new(
            self.config.name.clone(),
            local_addr,
            shutdown_tx,
        ));
        Ok(local_addr)
    }

    /// Stops the listener. Safe to call when not listening.
    pub fn close(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.shutdown();
        }
    }
}

impl std::fmt::Debug for WsServerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServerBinding")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    debug!(name = %state.name, remote_addr = %addr, "New WebSocket connection request");

    let authorized = match state.token.as_deref() {
        Some(expected) => query.get("access_token").map(String::as_str) == Some(expected),
        None => true,
    };

    ws.on_upgrade(move |socket| async move {
        if authorized {
            handle_socket(socket, addr, state).await;
        } else {
            reject(socket, addr, &state.name).await;
        }
    })
}

async fn reject(mut socket: WebSocket, addr: SocketAddr, name: &str) {
    warn!(name = %name, remote_addr = %addr, "Missing or wrong access token, closing");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "authentication failed".into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<ServerState>) {
    let handler = state.handler.read().clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(name = %state.name, remote_addr = %addr, "WebSocket connection established");

    // Handlers may push frames of their own through this sender.
    let (connection, mut peer) = WsConnection::pair(256);
    let (sender, _inbound) = connection.split();
    handler.on_open(addr, sender).await;

    let (reply_tx, mut reply_rx) = mpsc::channel::<Message>(256);
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = reply_rx.recv() => msg,
                Some(text) = peer.from_client.recv() => Message::Text(text.into()),
                else => break,
            };
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(name = %state.name, remote_addr = %addr, "WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                warn!(name = %state.name, remote_addr = %addr, error = %e, "WebSocket error");
                break;
            }
        };

        trace!(name = %state.name, remote_addr = %addr, len = text.len(), "Received frame");

        match handler.on_frame(addr, &text).await {
            Ok(Some(reply)) => {
                if reply_tx.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(name = %state.name, remote_addr = %addr, error = %e, "Frame handler failed");
                let _ = reply_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_INTERNAL_ERROR,
                        reason: "internal error".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    drop(reply_tx);
    handler.on_close(addr).await;
    // a handler may still hold a sender; give the pending close a moment, then stop
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    info!(name = %state.name, remote_addr = %addr, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite};

    fn binding(token: Option<&str>) -> WsServerBinding {
        let mut config = WsServerConfig::new("reverse");
        config.port = 0;
        config.token = token.map(str::to_string);
        WsServerBinding::new(config)
    }

    #[tokio::test]
    async fn test_missing_token_closes_with_policy_violation() {
        let server = binding(Some("secret"));
        let addr = server.bind().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/aivk/qq")).await.unwrap();
        match ws.next().await {
            Some(Ok(tungstenite::Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1008);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        server.close();
    }

    #[tokio::test]
    async fn test_correct_token_echoes() {
        let server = binding(Some("secret"));
        let addr = server.bind().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/aivk/qq?access_token=secret"))
            .await
            .unwrap();
        ws.send(tungstenite::Message::Text("ping".into())).await.unwrap();
        match ws.next().await {
            Some(Ok(tungstenite::Message::Text(text))) => assert_eq!(text.as_str(), "ping"),
            other => panic!("expected echo, got {other:?}"),
        }
        server.close();
    }

    struct Failing;

    #[async_trait]
    impl FrameHandler for Failing {
        async fn on_frame(&self, _peer: SocketAddr, _text: &str) -> TransportResult<Option<String>> {
            Err(TransportError::Decode {
                what: "frame",
                reason: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_handler_error_closes_with_internal_error() {
        let server = binding(None);
        server.set_frame_handler(Arc::new(Failing));
        let addr = server.bind().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/aivk/qq")).await.unwrap();
        ws.send(tungstenite::Message::Text("x".into())).await.unwrap();
        match ws.next().await {
            Some(Ok(tungstenite::Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1011);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        server.close();
    }
}
