//! Receive loops feeding the event queue.
//!
//! The WebSocket listener owns the long-lived socket: it reconnects with
//! bounded exponential backoff, attaches the socket to the [`WsApiCaller`]
//! and routes every inbound frame either to a waiting action call or to the
//! event queue. The SSE reader forwards `message` events and ends with the
//! stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use onecat_core::{ConnectionState, TransportResult, WsConnection, WsInbound};
use onecat_transport::{SseEventStream, WsClientBinding};

use crate::api_caller::{ApiCaller, WsApiCaller};

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Backoff of the WebSocket listener.
///
/// Retry `n` waits `min(max_delay, base_delay * 2^n)`. The counter resets on
/// every successful connect; once it exceeds `max_retries` the listener
/// gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Unit delay.
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Delay ceiling.
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Retries after a failed connect or an abnormal close.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// The delay before retry number `attempt` (starting at 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens WebSocket connections for the listener.
#[async_trait]
pub trait WsConnector: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Opens one connection.
    async fn connect(&self) -> TransportResult<WsConnection>;
}

#[async_trait]
impl WsConnector for WsClientBinding {
    fn name(&self) -> &str {
        WsClientBinding::name(self)
    }

    async fn connect(&self) -> TransportResult<WsConnection> {
        WsClientBinding::connect(self).await
    }
}

// =============================================================================
// WebSocket Listener
// =============================================================================

/// Everything the listener task needs.
pub(crate) struct WsListener {
    pub connector: Arc<dyn WsConnector>,
    pub caller: Arc<WsApiCaller>,
    pub queue: mpsc::UnboundedSender<Value>,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub policy: ReconnectPolicy,
}

/// How one connection ended.
enum Ended {
    Clean,
    Abnormal(String),
}

impl WsListener {
    /// Runs until a clean close, an authentication failure, or the retry
    /// ceiling. Never returns an error; the outcome is visible through the
    /// connection state and the logs.
    pub(crate) async fn run(self) {
        let name = self.connector.name().to_string();
        let mut attempt: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!(name = %name, attempt, "Connecting");

            match self.connector.connect().await {
                Ok(connection) => {
                    attempt = 0;
                    let (sender, mut inbound) = connection.split();
                    self.caller.attach(sender);
                    self.state.send_replace(ConnectionState::Connected);
                    info!(name = %name, "WebSocket listener connected");

                    let ended = self.pump(&mut inbound).await;
                    self.caller.detach();

                    match ended {
                        Ended::Clean => {
                            info!(name = %name, "Connection closed normally, listener stopping");
                            self.state.send_replace(ConnectionState::Disconnected);
                            return;
                        }
                        Ended::Abnormal(reason) => {
                            warn!(name = %name, reason = %reason, "Connection lost");
                        }
                    }
                }
                Err(e) if e.is_auth() => {
                    error!(name = %name, error = %e, "Authentication rejected, not retrying");
                    self.state.send_replace(ConnectionState::Disconnected);
                    return;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Connect failed");
                }
            }

            attempt += 1;
            if attempt > self.policy.max_retries {
                error!(
                    name = %name,
                    max_retries = self.policy.max_retries,
                    "Retry limit exceeded, listener stopping"
                );
                self.state.send_replace(ConnectionState::Disconnected);
                return;
            }

            let delay = self.policy.delay_for(attempt);
            info!(name = %name, attempt, delay = ?delay, "Reconnecting after backoff");
            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });
            tokio::time::sleep(delay).await;
        }
    }

    /// Routes frames until the connection ends.
    async fn pump(&self, inbound: &mut mpsc::Receiver<WsInbound>) -> Ended {
        while let Some(event) = inbound.recv().await {
            match event {
                WsInbound::Text(text) => route_frame(&text, self.caller.as_ref(), &self.queue),
                WsInbound::Closed { code, reason, clean } => {
                    debug!(code = ?code, reason = %reason, clean, "Close received");
                    return if clean {
                        Ended::Clean
                    } else {
                        Ended::Abnormal(format!("close code {code:?}: {reason}"))
                    };
                }
            }
        }
        Ended::Abnormal("socket pump stopped".to_string())
    }
}

/// Decodes one frame and hands it to a waiting call or the event queue.
/// Undecodable frames are dropped.
pub(crate) fn route_frame(text: &str, caller: &dyn ApiCaller, queue: &mpsc::UnboundedSender<Value>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, len = text.len(), "Dropping undecodable frame");
            return;
        }
    };
    if caller.route_response(&frame) {
        return;
    }
    if queue.send(frame).is_err() {
        debug!("Event queue closed, dropping frame");
    }
}

// =============================================================================
// SSE Reader
// =============================================================================

/// Forwards the data of `message` events until the stream ends.
pub(crate) async fn run_sse_reader(
    name: String,
    mut stream: SseEventStream,
    queue: mpsc::UnboundedSender<Value>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(item) = stream.next_event().await {
        match item {
            Ok(event) if event.event == "message" => {
                match serde_json::from_str::<Value>(&event.data) {
                    Ok(frame) => {
                        if queue.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(name = %name, error = %e, "Dropping undecodable SSE data"),
                }
            }
            Ok(event) => debug!(name = %name, event = %event.event, "Ignoring SSE event"),
            Err(e) => {
                error!(name = %name, error = %e, "SSE stream failed");
                break;
            }
        }
    }
    info!(name = %name, "SSE reader finished");
    state.send_replace(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use onecat_core::TransportError;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Scripted connector: each connect pops the next outcome.
    struct FakeConnector {
        script: Mutex<VecDeque<TransportResult<WsConnection>>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl FakeConnector {
        fn new(script: Vec<TransportResult<WsConnection>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl WsConnector for FakeConnector {
        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self) -> TransportResult<WsConnection> {
            self.attempts.lock().push(Instant::now());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::connection("ws://fake", "refused")))
        }
    }

    fn listener(
        connector: Arc<FakeConnector>,
    ) -> (
        WsListener,
        Arc<WsApiCaller>,
        mpsc::UnboundedReceiver<Value>,
        watch::Receiver<ConnectionState>,
    ) {
        let caller = Arc::new(WsApiCaller::new("t", "ws://fake", Duration::from_secs(5)));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let listener = WsListener {
            connector,
            caller: caller.clone(),
            queue: queue_tx,
            state: Arc::new(state_tx),
            policy: ReconnectPolicy::default(),
        };
        (listener, caller, queue_rx, state_rx)
    }

    fn gaps(attempts: &[Instant]) -> Vec<u64> {
        attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }

    #[test]
    fn test_delay_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_after_abnormal_close() {
        let (conn, peer) = WsConnection::pair(8);
        peer.close(WsInbound::abnormal_close(Some(1006), "reset")).await;
        let connector = FakeConnector::new(vec![Ok(conn)]);
        let (listener, _caller, _queue, state) = listener(connector.clone());

        listener.run().await;

        let attempts = connector.attempts();
        // the first connect plus five retries
        assert_eq!(attempts.len(), 6);
        assert_eq!(gaps(&attempts), vec![2, 4, 8, 16, 32]);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_on_connect() {
        let (first, first_peer) = WsConnection::pair(8);
        let (second, second_peer) = WsConnection::pair(8);
        first_peer.close(WsInbound::abnormal_close(None, "reset")).await;
        second_peer.close(WsInbound::abnormal_close(None, "reset")).await;

        let connector = FakeConnector::new(vec![
            Ok(first),
            Err(TransportError::connection("ws://fake", "refused")),
            Ok(second),
        ]);
        let (listener, _caller, _queue, _state) = listener(connector.clone());
        listener.run().await;

        let attempts = connector.attempts();
        // connect, fail, connect (reset), then five failing retries
        assert_eq!(gaps(&attempts), vec![2, 4, 2, 4, 8, 16, 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_ends_without_retry() {
        let (conn, peer) = WsConnection::pair(8);
        peer.close(WsInbound::clean_close("bye")).await;
        let connector = FakeConnector::new(vec![Ok(conn)]);
        let (listener, _caller, _queue, state) = listener(connector.clone());

        listener.run().await;

        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let connector = FakeConnector::new(vec![Err(TransportError::Auth {
            reason: "401".into(),
        })]);
        let (listener, _caller, _queue, _state) = listener(connector.clone());
        listener.run().await;
        assert_eq!(connector.attempts().len(), 1);
    }

    async fn connected(
        connector: Arc<FakeConnector>,
    ) -> (
        tokio::task::JoinHandle<()>,
        Arc<WsApiCaller>,
        mpsc::UnboundedReceiver<Value>,
    ) {
        let (listener, caller, queue, mut state) = listener(connector);
        let task = tokio::spawn(listener.run());
        state
            .wait_for(ConnectionState::is_connected)
            .await
            .unwrap();
        (task, caller, queue)
    }

    #[tokio::test]
    async fn test_unmatched_frame_goes_to_queue_and_reply_resolves_call() {
        let (conn, mut peer) = WsConnection::pair(8);
        let connector = FakeConnector::new(vec![Ok(conn)]);
        let (task, caller, mut queue) = connected(connector).await;

        let call = tokio::spawn({
            let caller = caller.clone();
            async move { caller.call("get_status", json!({})).await }
        });

        let request = peer.next_json().await.unwrap();
        assert_eq!(request["action"], "get_status");
        assert_eq!(request["params"], json!({}));
        let echo = request["echo"].clone();

        // an event lacking the echo arrives first
        let event = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        peer.push_json(&event).await;
        assert_eq!(queue.recv().await.unwrap(), event);
        assert!(!call.is_finished());

        let reply = json!({"status": "ok", "retcode": 0, "data": {"good": true}, "echo": echo});
        peer.push_json(&reply).await;
        assert_eq!(call.await.unwrap().unwrap(), reply);

        peer.close(WsInbound::clean_close("done")).await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let (conn, peer) = WsConnection::pair(8);
        let connector = FakeConnector::new(vec![Ok(conn)]);
        let (task, _caller, mut queue) = connected(connector).await;

        peer.push_text("{not json").await;
        peer.push_json(&json!({"post_type": "notice"})).await;
        assert_eq!(queue.recv().await.unwrap(), json!({"post_type": "notice"}));

        peer.close(WsInbound::clean_close("done")).await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sse_reader_forwards_message_events_only() {
        let body = concat!(
            "event: message\ndata: {\"post_type\":\"notice\"}\n\n",
            "event: ping\ndata: {}\n\n",
            "data: not json\n\n",
            "data: {\"post_type\":\"request\"}\n\n",
        );
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Ok(body.as_bytes().to_vec())];
        let stream = SseEventStream::new("test", futures::stream::iter(chunks).boxed());

        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        run_sse_reader("sse".into(), stream, queue_tx, Arc::new(state_tx)).await;

        assert_eq!(queue_rx.recv().await.unwrap(), json!({"post_type": "notice"}));
        assert_eq!(queue_rx.recv().await.unwrap(), json!({"post_type": "request"}));
        assert!(queue_rx.try_recv().is_err());
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
    }
}
