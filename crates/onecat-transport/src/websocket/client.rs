//! WebSocket client binding.
//!
//! [`WsClientBinding::connect`] opens one socket and hands it to a pump task
//! that bridges it to a [`WsConnection`]. Reconnection is the protocol
//! client's job; a binding only knows how to connect once.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use onecat_core::{
    CLOSE_NORMAL, TransportError, TransportResult, WsClientConfig, WsConnection, WsInbound,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Channel capacity between the socket pump and the protocol layer.
const CHANNEL_CAPACITY: usize = 256;

/// A bound WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientBinding {
    config: WsClientConfig,
}

impl WsClientBinding {
    /// Creates the binding. No connection is made until [`connect`](Self::connect).
    pub fn new(config: WsClientConfig) -> Self {
        Self { config }
    }

    /// The binding configuration.
    pub fn config(&self) -> &WsClientConfig {
        &self.config
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The WebSocket URL, including the token query parameter.
    pub fn ws_url(&self) -> String {
        self.config.ws_url()
    }

    /// Opens one WebSocket connection.
    pub async fn connect(&self) -> TransportResult<WsConnection> {
        let url = self.ws_url();
        debug!(name = %self.config.name, "Connecting to WebSocket server");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| map_connect_error(&url, e))?;

        info!(name = %self.config.name, "WebSocket client connected");

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (sink, source) = stream.split();
        tokio::spawn(pump(self.config.name.clone(), sink, source, out_rx, in_tx));

        Ok(WsConnection::new(out_tx, in_rx))
    }
}

fn map_connect_error(url: &str, err: tungstenite::Error) -> TransportError {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return TransportError::Auth {
                reason: format!("WebSocket handshake answered {status}"),
            };
        }
    }
    TransportError::connection(url, err)
}

/// Moves frames between the socket and the connection channels until either
/// side goes away.
async fn pump(
    name: String,
    mut sink: WsSink,
    mut source: WsSource,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<WsInbound>,
) {
    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(name = %name, error = %e, "Failed to send frame");
                        let _ = inbound.send(WsInbound::abnormal_close(None, e.to_string())).await;
                        break;
                    }
                }
                None => {
                    debug!(name = %name, "Connection dropped locally, closing socket");
                    let _ = sink.close().await;
                    break;
                }
            },

            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(name = %name, len = text.len(), "Received text");
                    if inbound.send(WsInbound::Text(text.to_string())).await.is_err() {
                        let _ = sink.close().await;
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(name = %name, len = data.len(), "Received binary");
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if inbound.send(WsInbound::Text(text)).await.is_err() {
                        let _ = sink.close().await;
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!(name = %name, "Received ping, sending pong");
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    let clean = code.is_none_or(|c| c == CLOSE_NORMAL);
                    info!(name = %name, code = ?code, reason = %reason, "Server closed connection");
                    let _ = inbound.send(WsInbound::Closed { code, reason, clean }).await;
                    break;
                }
                Some(Err(e)) => {
                    warn!(name = %name, error = %e, "WebSocket error");
                    let _ = inbound.send(WsInbound::abnormal_close(None, e.to_string())).await;
                    break;
                }
                None => {
                    info!(name = %name, "WebSocket stream ended");
                    let _ = inbound
                        .send(WsInbound::abnormal_close(None, "stream ended without close frame"))
                        .await;
                    break;
                }
            },
        }
    }
}
