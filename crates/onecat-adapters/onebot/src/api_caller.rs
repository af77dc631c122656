//! Transport-specific action callers.
//!
//! | Binding kind | Caller | Strategy |
//! |--------------|--------|----------|
//! | WebSocket client | [`WsApiCaller`] | The request carries an `echo`; the reply arrives on the shared socket and the reader task routes it to the waiting call. |
//! | HTTP client | [`HttpApiCaller`] | `POST /`; the HTTP response body is the reply. |
//! | anything else | [`UnsupportedApiCaller`] | Every call fails. |

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use onecat_core::{ApiError, ApiResult, BindingKind, TransportError, WsSender};
use onecat_transport::HttpClientBinding;

use crate::model::ActionRequest;

/// How a client gets actions to the gateway and replies back.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    /// Calls an action and returns the raw reply.
    ///
    /// A reply with a failed `status` is returned as is; only transport
    /// failures are errors.
    async fn call(&self, action: &str, params: Value) -> ApiResult<Value>;

    /// Offers an inbound frame as a reply. Returns true if a pending call
    /// took it; the frame must then not be dispatched as an event.
    fn route_response(&self, _frame: &Value) -> bool {
        false
    }
}

// =============================================================================
// UnsupportedApiCaller
// =============================================================================

/// Caller for binding kinds that cannot carry actions.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedApiCaller(pub BindingKind);

#[async_trait]
impl ApiCaller for UnsupportedApiCaller {
    async fn call(&self, action: &str, _params: Value) -> ApiResult<Value> {
        debug!(action = %action, kind = %self.0, "Action rejected: binding cannot carry actions");
        Err(ApiError::Unsupported(self.0))
    }
}

// =============================================================================
// WsApiCaller
// =============================================================================

type PendingMap = HashMap<String, oneshot::Sender<Value>>;

/// Echo-correlated caller over the shared WebSocket.
///
/// The listener attaches the socket's sender on every successful connect
/// and detaches it on disconnect, which fails every call still waiting.
pub struct WsApiCaller {
    client_id: String,
    url: String,
    seq: AtomicU64,
    sender: RwLock<Option<WsSender>>,
    pending: Arc<Mutex<PendingMap>>,
    action_timeout: Duration,
}

impl WsApiCaller {
    /// Creates a detached caller.
    pub fn new(client_id: impl Into<String>, url: impl Into<String>, action_timeout: Duration) -> Self {
        Self {
            client_id: client_id.into(),
            url: url.into(),
            seq: AtomicU64::new(0),
            sender: RwLock::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            action_timeout,
        }
    }

    /// Uses this socket for subsequent calls.
    pub fn attach(&self, sender: WsSender) {
        *self.sender.write() = Some(sender);
    }

    /// Stops sending and fails every pending call.
    pub fn detach(&self) {
        self.sender.write().take();
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending actions on disconnect");
            // dropping the senders wakes every waiter with a receive error
            pending.clear();
        }
    }

    /// Returns true while a socket is attached.
    pub fn is_attached(&self) -> bool {
        self.sender.read().as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Generates the next correlation id: `<client_id>:<unix_micros>:<seq>`.
    fn next_echo(&self) -> String {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}:{}", self.client_id, micros, seq)
    }

    fn not_connected(&self) -> ApiError {
        TransportError::connection(&self.url, "WebSocket is not connected").into()
    }
}

fn echo_key(frame: &Value) -> Option<String> {
    match frame.get("echo")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ApiCaller for WsApiCaller {
    async fn call(&self, action: &str, params: Value) -> ApiResult<Value> {
        let Some(sender) = self.sender.read().clone() else {
            return Err(self.not_connected());
        };

        let echo = self.next_echo();
        let request = ActionRequest::new(action, params).with_echo(echo.clone());

        // register before sending so a fast reply is never missed
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(echo.clone(), tx);

        debug!(action = %action, echo = %echo, "Calling action over WebSocket");

        if let Err(e) = sender.send_json(&request.to_value()).await {
            self.pending.lock().remove(&echo);
            warn!(action = %action, error = %e, "Failed to send action");
            return Err(self.not_connected());
        }

        match timeout(self.action_timeout, rx).await {
            Ok(Ok(response)) => {
                trace!(echo = %echo, response = %response, "Action response");
                Ok(response)
            }
            Ok(Err(_)) => Err(TransportError::connection(
                &self.url,
                "connection lost before the response arrived",
            )
            .into()),
            Err(_) => {
                self.pending.lock().remove(&echo);
                warn!(action = %action, echo = %echo, "Action timed out");
                Err(ApiError::Timeout {
                    action: action.to_string(),
                })
            }
        }
    }

    fn route_response(&self, frame: &Value) -> bool {
        let Some(echo) = echo_key(frame) else {
            return false;
        };
        let Some(tx) = self.pending.lock().remove(&echo) else {
            return false;
        };
        trace!(echo = %echo, "Routing response to pending action");
        // the waiter may have timed out in the meantime
        let _ = tx.send(frame.clone());
        true
    }
}

impl std::fmt::Debug for WsApiCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsApiCaller")
            .field("client_id", &self.client_id)
            .field("attached", &self.is_attached())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// =============================================================================
// HttpApiCaller
// =============================================================================

/// Caller posting each action to the gateway's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpApiCaller {
    binding: HttpClientBinding,
}

impl HttpApiCaller {
    /// Creates the caller.
    pub fn new(binding: HttpClientBinding) -> Self {
        Self { binding }
    }
}

#[async_trait]
impl ApiCaller for HttpApiCaller {
    async fn call(&self, action: &str, params: Value) -> ApiResult<Value> {
        let request = ActionRequest::new(action, params);
        debug!(action = %action, name = %self.binding.name(), "Calling action over HTTP");
        Ok(self.binding.post_json("/", &request.to_value()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onecat_core::WsConnection;
    use serde_json::json;

    fn caller() -> Arc<WsApiCaller> {
        Arc::new(WsApiCaller::new("test", "ws://gateway", Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_call_without_socket_is_connection_error() {
        let caller = caller();
        let err = caller.call("get_status", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Transport(TransportError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_reply_is_routed_by_echo() {
        let caller = caller();
        let (conn, mut peer) = WsConnection::pair(8);
        caller.attach(conn.sender());

        let task = tokio::spawn({
            let caller = caller.clone();
            async move { caller.call("get_status", json!({})).await }
        });

        let request = peer.next_json().await.unwrap();
        assert_eq!(request["action"], "get_status");
        assert_eq!(request["params"], json!({}));
        let echo = request["echo"].as_str().unwrap().to_string();
        assert!(echo.starts_with("test:"));
        assert_eq!(echo.split(':').count(), 3);

        // a frame for someone else does not resolve the call
        assert!(!caller.route_response(&json!({"post_type": "meta_event"})));
        assert!(!caller.route_response(&json!({"echo": "other", "status": "ok"})));

        let reply = json!({"status": "ok", "retcode": 0, "data": {"online": true}, "echo": echo});
        assert!(caller.route_response(&reply));

        assert_eq!(task.await.unwrap().unwrap(), reply);
        assert_eq!(caller.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_detach_fails_pending_calls() {
        let caller = caller();
        let (conn, mut peer) = WsConnection::pair(8);
        caller.attach(conn.sender());

        let task = tokio::spawn({
            let caller = caller.clone();
            async move { caller.call("get_status", json!({})).await }
        });
        peer.next_json().await.unwrap();

        caller.detach();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ApiError::Transport(TransportError::Connection { .. })
        ));
        assert!(!caller.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let caller = Arc::new(WsApiCaller::new("t", "ws://gateway", Duration::from_secs(30)));
        let (conn, _peer) = WsConnection::pair(8);
        caller.attach(conn.sender());

        let err = caller.call("get_status", json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout { ref action } if action == "get_status"));
        assert_eq!(caller.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_echoes_are_unique() {
        let caller = caller();
        let a = caller.next_echo();
        let b = caller.next_echo();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unsupported_kind() {
        let caller = UnsupportedApiCaller(BindingKind::WsServer);
        let err = tokio_test::assert_err!(tokio_test::block_on(
            caller.call("get_status", json!({}))
        ));
        assert!(matches!(err, ApiError::Unsupported(BindingKind::WsServer)));
    }
}
