//! The OneBot v11 protocol client.
//!
//! A [`OneBotClient`] wraps one [`Binding`] and owns everything that runs on
//! top of it: the receive task, the dispatcher, the handler registry and the
//! action caller. What `start` spawns depends on the binding kind:
//!
//! | Kind | Receive side | Actions |
//! |------|--------------|---------|
//! | WebSocket client | reconnecting listener on one shared socket | echo-correlated on that socket |
//! | HTTP SSE client | SSE reader, no reconnect | unsupported |
//! | HTTP client | none | `POST /` |
//! | HTTP server | pushed events from the bound server | unsupported |
//! | WebSocket server | the bound server's frame handler | unsupported |

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use onecat_core::binding::ws_url;
use onecat_core::{ApiResult, ConnectionState, MessageFormat, TransportResult};
use onecat_transport::{Binding, BindingRegistry};

use crate::api_caller::{ApiCaller, HttpApiCaller, UnsupportedApiCaller, WsApiCaller};
use crate::dispatcher::{EventHandler, HandlerId, HandlerRegistry, run_dispatcher};
use crate::error::{ClientError, ClientResult};
use crate::listener::{ReconnectPolicy, WsConnector, WsListener, millis, run_sse_reader};
use crate::model::{ALL_EVENTS, join_event_type};

/// Per-client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// How long a WebSocket action waits for its reply.
    #[serde(with = "millis", rename = "action_timeout_ms")]
    pub action_timeout: Duration,
    /// Listener backoff.
    pub reconnect: ReconnectPolicy,
    /// Used for mention detection when the login info is unavailable.
    pub default_self_id: Option<i64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            default_self_id: None,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    queue: mpsc::UnboundedSender<Value>,
    tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct ClientInner {
    client_id: String,
    binding: Arc<Binding>,
    options: ClientOptions,
    handlers: Arc<HandlerRegistry>,
    caller: Arc<dyn ApiCaller>,
    ws_caller: Option<Arc<WsApiCaller>>,
    state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) default_self_id: RwLock<Option<i64>>,
    running: Mutex<Option<Running>>,
    starting: Mutex<bool>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Weak handle held by the dispatcher so the client can be dropped while
/// its tasks run.
#[derive(Clone)]
pub(crate) struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub(crate) fn upgrade(&self) -> Option<OneBotClient> {
        self.0.upgrade().map(|inner| OneBotClient { inner })
    }
}

/// A OneBot v11 client bound to one transport.
///
/// Cheap to clone; clones share the same connection and handlers.
#[derive(Clone)]
pub struct OneBotClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl OneBotClient {
    /// Creates a stopped client over `binding`.
    pub fn new(binding: impl Into<Arc<Binding>>, options: ClientOptions) -> Self {
        let binding = binding.into();
        let client_id = uuid::Uuid::new_v4().simple().to_string();

        let mut ws_caller = None;
        let caller: Arc<dyn ApiCaller> = match binding.as_ref() {
            Binding::WsClient(b) => {
                let config = b.config();
                // the token is never part of the logged url
                let url = ws_url(&config.host, config.port, &config.path, None);
                let caller = Arc::new(WsApiCaller::new(
                    client_id.clone(),
                    url,
                    options.action_timeout,
                ));
                ws_caller = Some(caller.clone());
                caller
            }
            Binding::HttpClient(b) => Arc::new(HttpApiCaller::new(b.clone())),
            other => Arc::new(UnsupportedApiCaller(other.kind())),
        };

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let default_self_id = RwLock::new(options.default_self_id);

        Self {
            inner: Arc::new(ClientInner {
                client_id,
                binding,
                options,
                handlers: Arc::new(HandlerRegistry::new()),
                caller,
                ws_caller,
                state: Arc::new(state),
                default_self_id,
                running: Mutex::new(None),
                starting: Mutex::new(false),
            }),
        }
    }

    /// Creates a client over the binding registered as `name`.
    pub fn from_registry(
        registry: &BindingRegistry,
        name: &str,
        options: ClientOptions,
    ) -> TransportResult<Self> {
        Ok(Self::new(registry.get(name)?, options))
    }

    pub(crate) fn downgrade(&self) -> WeakClient {
        WeakClient(Arc::downgrade(&self.inner))
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        self.inner.binding.name()
    }

    /// The underlying binding.
    pub fn binding(&self) -> &Arc<Binding> {
        &self.inner.binding
    }

    /// The random id prefixing every echo this client generates.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// The options the client was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// The wire format outgoing messages are encoded in.
    pub fn message_format(&self) -> MessageFormat {
        self.inner.binding.message_format()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts receiving events and enables actions.
    ///
    /// Fails with [`ClientError::AlreadyStarted`] on a running client and with
    /// [`ClientError::Transport`] when the SSE connect or a server bind fails.
    pub async fn start(&self) -> ClientResult<()> {
        self.start_inner(None).await
    }

    /// Like [`start`](Self::start), but a WebSocket client opens its
    /// connections through `connector` instead of its binding.
    pub async fn start_with_connector(&self, connector: Arc<dyn WsConnector>) -> ClientResult<()> {
        self.start_inner(Some(connector)).await
    }

    async fn start_inner(&self, connector: Option<Arc<dyn WsConnector>>) -> ClientResult<()> {
        {
            let mut starting = self.inner.starting.lock();
            if *starting || self.inner.running.lock().is_some() {
                return Err(ClientError::AlreadyStarted(self.name().to_string()));
            }
            *starting = true;
        }

        let result = self.spawn_tasks(connector).await;
        *self.inner.starting.lock() = false;

        match result {
            Ok(running) => {
                *self.inner.running.lock() = Some(running);
                info!(name = %self.name(), kind = %self.inner.binding.kind(), "Client started");
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn spawn_tasks(&self, connector: Option<Arc<dyn WsConnector>>) -> ClientResult<Running> {
        let inner = &self.inner;
        let cancel = CancellationToken::new();
        let (queue, events) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();

        match inner.binding.as_ref() {
            Binding::WsClient(binding) => {
                if let Some(caller) = inner.ws_caller.clone() {
                    let listener = WsListener {
                        connector: connector.unwrap_or_else(|| Arc::new(binding.clone())),
                        caller,
                        queue: queue.clone(),
                        state: inner.state.clone(),
                        policy: inner.options.reconnect,
                    };
                    tasks.push(spawn_cancellable(cancel.clone(), listener.run()));
                }
            }
            Binding::HttpSseClient(binding) => {
                inner.state.send_replace(ConnectionState::Connecting);
                let stream = binding.connect().await?;
                inner.state.send_replace(ConnectionState::Connected);
                tasks.push(spawn_cancellable(
                    cancel.clone(),
                    run_sse_reader(
                        self.name().to_string(),
                        stream,
                        queue.clone(),
                        inner.state.clone(),
                    ),
                ));
            }
            Binding::HttpClient(_) => {
                inner.state.send_replace(ConnectionState::Connected);
            }
            Binding::HttpServer(binding) => {
                binding.set_event_sink(queue.clone());
                let addr = binding.bind().await?;
                debug!(name = %self.name(), addr = %addr, "HTTP server bound");
                inner.state.send_replace(ConnectionState::Connected);
            }
            Binding::WsServer(binding) => {
                let addr = binding.bind().await?;
                debug!(name = %self.name(), addr = %addr, "WebSocket server bound");
                inner.state.send_replace(ConnectionState::Connected);
            }
        }

        tasks.push(tokio::spawn(run_dispatcher(
            events,
            inner.handlers.clone(),
            self.downgrade(),
            cancel.clone(),
        )));

        Ok(Running {
            cancel,
            queue,
            tasks,
        })
    }

    /// Stops every task, closes server listeners and fails pending actions.
    /// Does nothing on a stopped client.
    pub async fn stop(&self) {
        let Some(running) = self.inner.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        drop(running.queue);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(name = %self.name(), error = %e, "Task ended abnormally during stop");
            }
        }

        self.inner.binding.close();
        if let Some(caller) = &self.inner.ws_caller {
            caller.detach();
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!(name = %self.name(), "Client stopped");
    }

    /// Returns true between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// The current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watches connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Waits until the state is `Connected`.
    pub async fn wait_for_connected(&self, timeout: Duration) -> ClientResult<()> {
        let mut state = self.inner.state.subscribe();
        match tokio::time::timeout(timeout, state.wait_for(ConnectionState::is_connected)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(ClientError::Timeout(timeout)),
        }
    }

    /// Feeds a raw event to the dispatcher as if the transport had received
    /// it. Returns false when the client is not running.
    pub fn push_event(&self, event: Value) -> bool {
        match self.inner.running.lock().as_ref() {
            Some(running) => running.queue.send(event).is_ok(),
            None => false,
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Registers a handler for an exact event type such as
    /// `"message.group.normal"`, or [`ALL_EVENTS`].
    pub fn on<H: EventHandler>(&self, event_type: impl Into<String>, handler: H) -> HandlerId {
        self.inner.handlers.add(event_type, Arc::new(handler))
    }

    /// Registers a handler for every event.
    pub fn on_all<H: EventHandler>(&self, handler: H) -> HandlerId {
        self.on(ALL_EVENTS, handler)
    }

    /// Registers a message handler. `None` levels are left out of the event
    /// type: `on_message(Some("group"), None, ..)` listens on
    /// `"message.group"`.
    pub fn on_message<H: EventHandler>(
        &self,
        message_type: Option<&str>,
        sub_type: Option<&str>,
        handler: H,
    ) -> HandlerId {
        self.on(join_event_type("message", message_type, sub_type), handler)
    }

    /// Registers a notice handler.
    pub fn on_notice<H: EventHandler>(
        &self,
        notice_type: Option<&str>,
        sub_type: Option<&str>,
        handler: H,
    ) -> HandlerId {
        self.on(join_event_type("notice", notice_type, sub_type), handler)
    }

    /// Registers a request handler.
    pub fn on_request<H: EventHandler>(
        &self,
        request_type: Option<&str>,
        sub_type: Option<&str>,
        handler: H,
    ) -> HandlerId {
        self.on(join_event_type("request", request_type, sub_type), handler)
    }

    /// Registers a meta event handler.
    pub fn on_meta_event<H: EventHandler>(
        &self,
        meta_type: Option<&str>,
        sub_type: Option<&str>,
        handler: H,
    ) -> HandlerId {
        self.on(join_event_type("meta_event", meta_type, sub_type), handler)
    }

    /// Removes one handler, or all handlers of `event_type` when `id` is
    /// `None`. Returns how many were removed.
    pub fn off(&self, event_type: &str, id: Option<HandlerId>) -> usize {
        self.inner.handlers.remove(event_type, id)
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.inner.handlers.count(event_type)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Calls an action and returns the raw reply.
    ///
    /// The reply's `status` and `retcode` are not checked.
    pub async fn call_action(&self, action: impl AsRef<str>, params: Value) -> ApiResult<Value> {
        self.inner.caller.call(action.as_ref(), params).await
    }
}

impl std::fmt::Debug for OneBotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneBotClient")
            .field("name", &self.name())
            .field("kind", &self.inner.binding.kind())
            .field("state", &self.connection_state())
            .field("running", &self.is_running())
            .finish()
    }
}

fn spawn_cancellable<F>(cancel: CancellationToken, task: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = task => {}
        }
    })
}
