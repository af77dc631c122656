//! Connection lifecycle types.
//!
//! A live WebSocket is exposed to the protocol layer as a [`WsConnection`]:
//! an outbound text channel plus an inbound channel of [`WsInbound`] frames.
//! The transport crate owns the socket and pumps it into these channels, so
//! the protocol layer never touches the socket type itself.

use std::net::SocketAddr;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{TransportError, TransportResult};

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for a policy violation, used for authentication failures.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close code for an unexpected server-side condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

// =============================================================================
// Connection State
// =============================================================================

/// State of a client connection.
///
/// ```text
/// Disconnected → Connecting → Connected ─┬─ clean close ──→ Disconnected
///                    ↑                   └─ abnormal close → Reconnecting
///                    └─────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected.
    Connected,
    /// Waiting out the backoff before attempt number `attempt`.
    Reconnecting {
        /// The retry number, starting at 1.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Returns true if the connection is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

// =============================================================================
// WebSocket connection
// =============================================================================

/// An inbound WebSocket event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsInbound {
    /// A text frame. Binary frames are delivered here as lossy UTF-8.
    Text(String),
    /// The connection ended. No further frames follow.
    Closed {
        /// The close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason or error description.
        reason: String,
        /// Whether the close was a normal closure.
        clean: bool,
    },
}

impl WsInbound {
    /// A normal closure with the given reason.
    pub fn clean_close(reason: impl Into<String>) -> Self {
        Self::Closed {
            code: Some(CLOSE_NORMAL),
            reason: reason.into(),
            clean: true,
        }
    }

    /// An abnormal closure with the given reason.
    pub fn abnormal_close(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
            clean: false,
        }
    }
}

/// Sending half of a WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsSender {
    tx: mpsc::Sender<String>,
}

impl WsSender {
    /// Sends a text frame.
    pub async fn send_text(&self, text: String) -> TransportResult<()> {
        self.tx
            .send(text)
            .await
            .map_err(|_| TransportError::ConnectionClosed {
                reason: "outbound channel closed".into(),
            })
    }

    /// Serializes and sends a JSON value as a text frame.
    pub async fn send_json(&self, value: &Value) -> TransportResult<()> {
        let text = serde_json::to_string(value)
            .map_err(|e| TransportError::SendFailed(format!("JSON serialization failed: {e}")))?;
        self.send_text(text).await
    }

    /// Returns true if the socket pump has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live WebSocket connection seen through channels.
#[derive(Debug)]
pub struct WsConnection {
    sender: WsSender,
    inbound: mpsc::Receiver<WsInbound>,
}

impl WsConnection {
    /// Creates a connection from its two channel halves.
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<WsInbound>) -> Self {
        Self {
            sender: WsSender { tx: outbound },
            inbound,
        }
    }

    /// Creates an in-memory connection and the peer end that drives it.
    ///
    /// Used to bridge sockets owned elsewhere and to script a gateway in tests.
    pub fn pair(buffer: usize) -> (Self, WsPeer) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        (
            Self::new(out_tx, in_rx),
            WsPeer {
                to_client: in_tx,
                from_client: out_rx,
            },
        )
    }

    /// Returns a clone of the sending half.
    pub fn sender(&self) -> WsSender {
        self.sender.clone()
    }

    /// Receives the next inbound event. `None` means the pump is gone.
    pub async fn recv(&mut self) -> Option<WsInbound> {
        self.inbound.recv().await
    }

    /// Splits into the sending half and the inbound receiver.
    pub fn split(self) -> (WsSender, mpsc::Receiver<WsInbound>) {
        (self.sender, self.inbound)
    }
}

/// The far end of an in-memory [`WsConnection`].
#[derive(Debug)]
pub struct WsPeer {
    /// Frames pushed here arrive at the connection.
    pub to_client: mpsc::Sender<WsInbound>,
    /// Frames the connection sent.
    pub from_client: mpsc::Receiver<String>,
}

impl WsPeer {
    /// Pushes a text frame to the connection.
    pub async fn push_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(WsInbound::Text(text.into())).await.is_ok()
    }

    /// Pushes a JSON frame to the connection.
    pub async fn push_json(&self, value: &Value) -> bool {
        self.push_text(value.to_string()).await
    }

    /// Closes the connection with the given inbound close event.
    pub async fn close(&self, event: WsInbound) -> bool {
        self.to_client.send(event).await.is_ok()
    }

    /// Receives the next frame the connection sent, decoded as JSON.
    pub async fn next_json(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }
}

// =============================================================================
// Listener Handle
// =============================================================================

/// Handle to a bound server listener.
///
/// Dropping this handle stops the listener.
#[derive(Debug)]
pub struct ListenerHandle {
    /// Name of the binding that owns the listener.
    pub name: String,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ListenerHandle {
    /// Creates a new listener handle.
    pub fn new(name: impl Into<String>, local_addr: SocketAddr, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            name: name.into(),
            local_addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the listener.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut conn, mut peer) = WsConnection::pair(8);

        conn.sender()
            .send_json(&json!({"action": "get_status"}))
            .await
            .unwrap();
        assert_eq!(peer.next_json().await, Some(json!({"action": "get_status"})));

        assert!(peer.push_text("hello").await);
        assert_eq!(conn.recv().await, Some(WsInbound::Text("hello".into())));
    }

    #[tokio::test]
    async fn test_send_after_peer_dropped() {
        let (conn, peer) = WsConnection::pair(1);
        drop(peer);
        let sender = conn.sender();
        assert!(sender.is_closed());
        assert!(sender.send_text("x".into()).await.is_err());
    }

    #[test]
    fn test_listener_handle_drop_signals() {
        let (tx, mut rx) = oneshot::channel();
        let handle = ListenerHandle::new("srv", "127.0.0.1:0".parse().unwrap(), tx);
        drop(handle);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting { attempt: 2 }.to_string(), "reconnecting (attempt 2)");
        assert!(ConnectionState::Connected.is_connected());
    }
}
