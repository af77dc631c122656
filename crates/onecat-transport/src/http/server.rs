//! HTTP server binding.
//!
//! The gateway runs as an HTTP client and posts to us. Two kinds of body are
//! accepted on any path:
//!
//! - an event (`post_type` present): forwarded to the event channel; message
//!   events may be answered synchronously by the `message` hook with a
//!   [`QuickReply`].
//! - an action (`action` present): dispatched to a callable from the
//!   named-action registry, answered with an OneBot-shaped response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use onecat_core::{HttpServerConfig, ListenerHandle, TransportError, TransportResult};

/// Error type returned by named actions.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// A server-defined action: receives the `params` mapping, returns the `data`.
pub type ActionFn = Arc<dyn Fn(Map<String, Value>) -> Result<Value, ActionError> + Send + Sync>;

/// The `message` hook: may answer a message event synchronously.
pub type MessageHook = Arc<dyn Fn(&Value) -> Option<QuickReply> + Send + Sync>;

/// Synchronous reply carried back in the HTTP response of a message event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    /// Reply text.
    pub reply: String,
    /// Send the text as-is instead of parsing CQ codes.
    #[serde(default)]
    pub auto_escape: bool,
}

impl QuickReply {
    /// Creates a reply that is parsed for CQ codes.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            auto_escape: false,
        }
    }

    /// Creates a reply sent verbatim.
    pub fn escaped(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            auto_escape: true,
        }
    }
}

/// State shared between the binding and its request handlers.
#[derive(Default)]
struct Shared {
    token: Option<String>,
    message_hook: RwLock<Option<MessageHook>>,
    actions: RwLock<HashMap<String, ActionFn>>,
    events: RwLock<Option<mpsc::UnboundedSender<Value>>>,
}

/// A bound HTTP server.
pub struct HttpServerBinding {
    config: HttpServerConfig,
    shared: Arc<Shared>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl HttpServerBinding {
    /// Creates the binding. Nothing is bound until [`bind`](Self::bind).
    pub fn new(config: HttpServerConfig) -> Self {
        let shared = Shared {
            token: config.token.clone(),
            ..Default::default()
        };
        Self {
            config,
            shared: Arc::new(shared),
            listener: Mutex::new(None),
        }
    }

    /// The binding configuration.
    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Installs the `message` hook, replacing any previous one.
    pub fn on_message<F>(&self, hook: F)
    where
        F: Fn(&Value) -> Option<QuickReply> + Send + Sync + 'static,
    {
        *self.shared.message_hook.write() = Some(Arc::new(hook));
    }

    /// Registers a named action, replacing any previous one with that name.
    pub fn register_action<F>(&self, name: impl Into<String>, action: F)
    where
        F: Fn(Map<String, Value>) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(binding = %self.config.name, action = %name, "Registering server action");
        self.shared.actions.write().insert(name, Arc::new(action));
    }

    /// Removes a named action. Returns true if it existed.
    pub fn unregister_action(&self, name: &str) -> bool {
        self.shared.actions.write().remove(name).is_some()
    }

    /// Names of all registered actions, sorted.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.actions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Sets the channel inbound events are forwarded to.
    pub fn set_event_sink(&self, sink: mpsc::UnboundedSender<Value>) {
        *self.shared.events.write() = Some(sink);
    }

    /// Returns the bound address, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(ListenerHandle::local_addr)
    }

    /// Binds the listener and starts serving.
    pub async fn bind(&self) -> TransportResult<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let addr = self.config.bind_addr();
        let router = Router::new()
            .route("/", post(handle_post))
            .route("/{*path}", post(handle_post))
            .with_state(self.shared.clone());

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!(name = %self.config.name, addr = %local_addr, "HTTP server listening");

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
                error!(name = %name, error = %e, "HTTP server error");
            }
            info!(name = %name, "HTTP server stopped");
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

impl std::fmt::Debug for HttpServerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServerBinding")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Returns true if the request carries the expected token.
fn authorized(expected: Option<&str>, headers: &HeaderMap, query: &HashMap<String, String>) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return true;
    };

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    bearer == Some(expected) || query.get("access_token").map(String::as_str) == Some(expected)
}

fn failed(status: StatusCode, retcode: i64, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "status": "failed",
            "retcode": retcode,
            "data": null,
            "message": message.into(),
        })),
    )
        .into_response()
}

async fn handle_post(
    State(state): State<Arc<Shared>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(state.token.as_deref(), &headers, &query) {
        warn!(remote_addr = %addr, "Rejected HTTP request with bad token");
        return failed(StatusCode::UNAUTHORIZED, 1401, "authentication failed");
    }

    trace!(remote_addr = %addr, len = body.len(), "Received HTTP POST");

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(remote_addr = %addr, error = %e, "Dropping undecodable body");
            return failed(StatusCode::BAD_REQUEST, 1400, format!("invalid JSON: {e}"));
        }
    };

    if let Some(action) = payload.get("action").and_then(Value::as_str) {
        return run_action(&state, action, &payload);
    }

    if payload.get("post_type").is_some() {
        return accept_event(&state, payload);
    }

    failed(StatusCode::BAD_REQUEST, 1400, "body is neither an event nor an action")
}

fn run_action(state: &Shared, name: &str, payload: &Value) -> Response {
    let action = state.actions.read().get(name).cloned();
    let Some(action) = action else {
        debug!(action = %name, "Unknown server action");
        return failed(StatusCode::NOT_FOUND, 1404, format!("unknown action '{name}'"));
    };

    let params = payload
        .get("params")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    match action(params) {
        Ok(data) => {
            let mut response = json!({"status": "ok", "retcode": 0, "data": data});
            if let Some(echo) = payload.get("echo") {
                response["echo"] = echo.clone();
            }
            Json(response).into_response()
        }
        Err(e) => {
            warn!(action = %name, error = %e, "Server action failed");
            failed(StatusCode::OK, 100, e.to_string())
        }
    }
}

fn accept_event(state: &Shared, event: Value) -> Response {
    let is_message = event.get("post_type").and_then(Value::as_str) == Some("message");

    let reply = if is_message {
        let hook = state.message_hook.read().clone();
        hook.and_then(|hook| hook(&event))
    } else {
        None
    };

    if let Some(sink) = state.events.read().as_ref()
        && sink.send(event).is_err()
    {
        debug!("Event sink closed, dropping event");
    }

    match reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized() {
        let mut headers = HeaderMap::new();
        let mut query = HashMap::new();

        assert!(authorized(None, &headers, &query));
        assert!(!authorized(Some("t"), &headers, &query));

        headers.insert(AUTHORIZATION, "Bearer t".parse().unwrap());
        assert!(authorized(Some("t"), &headers, &query));

        let headers = HeaderMap::new();
        query.insert("access_token".to_string(), "t".to_string());
        assert!(authorized(Some("t"), &headers, &query));
        assert!(!authorized(Some("u"), &headers, &query));
    }

    #[cfg(feature = "http-client")]
    mod live {
        use super::*;

        fn binding(token: Option<&str>) -> HttpServerBinding {
            let mut config = HttpServerConfig::new("srv");
            config.port = 0;
            config.token = token.map(str::to_string);
            HttpServerBinding::new(config)
        }

        #[tokio::test]
        async fn test_message_hook_quick_reply() {
            let server = binding(None);
            let (tx, mut rx) = mpsc::unbounded_channel();
            server.set_event_sink(tx);
            server.on_message(|event| {
                let text = event.get("raw_message")?.as_str()?;
                Some(QuickReply::escaped(format!("echo: {text}")))
            });
            let addr = server.bind().await.unwrap();

            let event = json!({
                "post_type": "message",
                "message_type": "private",
                "raw_message": "hi",
            });
            let resp = reqwest::Client::new()
                .post(format!("http://{addr}/"))
                .json(&event)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            let reply: QuickReply = resp.json().await.unwrap();
            assert_eq!(reply, QuickReply::escaped("echo: hi"));

            assert_eq!(rx.recv().await.unwrap(), event);
            server.close();
        }

        #[tokio::test]
        async fn test_named_actions() {
            let server = binding(Some("secret"));
            server.register_action("add", |params| {
                let a = params.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = params.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            });
            let addr = server.bind().await.unwrap();
            let client = reqwest::Client::new();

            let unauthorized = client
                .post(format!("http://{addr}/"))
                .json(&json!({"action": "add", "params": {}}))
                .send()
                .await
                .unwrap();
            assert_eq!(unauthorized.status(), 401);

            let resp: Value = client
                .post(format!("http://{addr}/api"))
                .bearer_auth("secret")
                .json(&json!({"action": "add", "params": {"a": 2, "b": 3}}))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(resp["status"], "ok");
            assert_eq!(resp["data"], 5);

            let missing = client
                .post(format!("http://{addr}/?access_token=secret"))
                .json(&json!({"action": "nope"}))
                .send()
                .await
                .unwrap();
            assert_eq!(missing.status(), 404);

            server.close();
        }
    }
}
