//! Event handler registry and the dispatch loop.
//!
//! The dispatcher pulls events from the queue one at a time, in arrival
//! order. For each event it awaits the handlers registered for the exact
//! event type, then those registered for [`ALL_EVENTS`], each in
//! registration order. A failing or panicking handler is logged and the
//! next one runs.
//!
//! # Example
//!
//! ```rust,ignore
//! client.on("message.group", |client: OneBotClient, event: InboundEvent| async move {
//!     if let Some(group_id) = event.group_id() {
//!         client.send_group_msg(group_id, "pong").await?;
//!     }
//!     Ok::<_, anyhow::Error>(())
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, trace};

use crate::client::{OneBotClient, WeakClient};
use crate::error::{HandlerError, HandlerResult};
use crate::model::{ALL_EVENTS, InboundEvent};

// ============================================================================
// Handler Trait
// ============================================================================

/// Handles inbound events.
///
/// Implemented for every async closure or function taking
/// `(OneBotClient, InboundEvent)` and returning `()` or
/// `Result<(), impl Into<anyhow::Error>>`.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event.
    async fn handle(&self, client: &OneBotClient, event: &InboundEvent) -> anyhow::Result<()>;
}

/// Return types accepted from handler closures.
pub trait IntoHandlerResult {
    /// Converts into the handler outcome.
    fn into_handler_result(self) -> anyhow::Result<()>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_handler_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

#[async_trait]
impl<F, Fut, R> EventHandler for F
where
    F: Fn(OneBotClient, InboundEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    async fn handle(&self, client: &OneBotClient, event: &InboundEvent) -> anyhow::Result<()> {
        (self)(client.clone(), event.clone()).await.into_handler_result()
    }
}

/// A type-erased handler.
pub type BoxedHandler = Arc<dyn EventHandler>;

// ============================================================================
// Registry
// ============================================================================

/// Identifies one registration, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event type to ordered handler list.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, BoxedHandler)>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `event_type`.
    pub fn add(&self, event_type: impl Into<String>, handler: BoxedHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event_type = event_type.into();
        debug!(event_type = %event_type, id = %id, "Handler registered");
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes one handler, or every handler of the type when `id` is `None`.
    /// Returns how many were removed.
    pub fn remove(&self, event_type: &str, id: Option<HandlerId>) -> usize {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event_type) else {
            return 0;
        };
        let before = list.len();
        match id {
            Some(id) => list.retain(|(existing, _)| *existing != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    /// Copies the handlers of one type, so none of them runs under the lock.
    pub fn snapshot(&self, event_type: &str) -> Vec<BoxedHandler> {
        self.handlers
            .read()
            .get(event_type)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of handlers for one type.
    pub fn count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one handler, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

async fn run_handler(handler: &BoxedHandler, client: &OneBotClient, event: &InboundEvent) -> HandlerResult {
    match AssertUnwindSafe(handler.handle(client, event))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HandlerError::Failed(e)),
        Err(payload) => Err(HandlerError::from_panic(payload)),
    }
}

/// Runs every matching handler for one event and returns how many failed.
pub(crate) async fn dispatch_event(
    handlers: &HandlerRegistry,
    client: &OneBotClient,
    event: &InboundEvent,
) -> usize {
    let span = info_span!("dispatch", event_type = %event.event_type());
    async {
        let mut selected = handlers.snapshot(event.event_type());
        if event.event_type() != ALL_EVENTS {
            selected.extend(handlers.snapshot(ALL_EVENTS));
        }
        trace!(handlers = selected.len(), "Dispatching event");

        let mut failed = 0;
        for handler in &selected {
            if let Err(e) = run_handler(handler, client, event).await {
                failed += 1;
                error!(error = %e, "Event handler failed");
            }
        }
        failed
    }
    .instrument(span)
    .await
}

/// Pulls events until the queue closes, the client is dropped, or `cancel`
/// fires.
pub(crate) async fn run_dispatcher(
    mut queue: mpsc::UnboundedReceiver<Value>,
    handlers: Arc<HandlerRegistry>,
    client: WeakClient,
    cancel: CancellationToken,
) {
    let step = async {
        while let Some(frame) = queue.recv().await {
            let Some(client) = client.upgrade() else {
                debug!("Client dropped, dispatcher stopping");
                return;
            };
            let event = InboundEvent::new(frame);
            dispatch_event(&handlers, &client, &event).await;
        }
        debug!("Event queue closed, dispatcher stopping");
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => debug!("Dispatcher cancelled"),
        _ = step => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use onecat_core::HttpClientConfig;
    use onecat_transport::{Binding, HttpClientBinding};
    use parking_lot::Mutex;
    use serde_json::json;

    fn client() -> OneBotClient {
        let binding = HttpClientBinding::new(HttpClientConfig::new("test")).unwrap();
        OneBotClient::new(Binding::HttpClient(binding), ClientOptions::default())
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, label: &'static str) -> BoxedHandler {
        let log = log.clone();
        Arc::new(move |_client: OneBotClient, event: InboundEvent| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{label}:{}", event.event_type()));
            }
        })
    }

    fn private_friend() -> InboundEvent {
        InboundEvent::new(json!({
            "post_type": "message", "message_type": "private", "sub_type": "friend"
        }))
    }

    #[tokio::test]
    async fn test_exact_then_all_in_registration_order() {
        let registry = HandlerRegistry::new();
        let log: Log = Arc::default();
        registry.add(ALL_EVENTS, recorder(&log, "all1"));
        registry.add("message.private.friend", recorder(&log, "exact1"));
        registry.add("message.private", recorder(&log, "prefix"));
        registry.add("message.private.friend", recorder(&log, "exact2"));
        registry.add(ALL_EVENTS, recorder(&log, "all2"));

        let failed = dispatch_event(&registry, &client(), &private_friend()).await;
        assert_eq!(failed, 0);
        assert_eq!(
            *log.lock(),
            vec![
                "exact1:message.private.friend",
                "exact2:message.private.friend",
                "all1:message.private.friend",
                "all2:message.private.friend",
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let registry = HandlerRegistry::new();
        let log: Log = Arc::default();

        registry.add(
            "message.private.friend",
            Arc::new(|_c: OneBotClient, _e: InboundEvent| async move {
                Err::<(), _>(anyhow::anyhow!("boom"))
            }),
        );
        registry.add(
            "message.private.friend",
            Arc::new(|_c: OneBotClient, _e: InboundEvent| async move {
                panic!("handler exploded");
                #[allow(unreachable_code)]
                ()
            }),
        );
        registry.add(ALL_EVENTS, recorder(&log, "all"));

        let failed = dispatch_event(&registry, &client(), &private_friend()).await;
        assert_eq!(failed, 2);
        assert_eq!(*log.lock(), vec!["all:message.private.friend"]);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let handler: BoxedHandler = Arc::new(|_c: OneBotClient, _e: InboundEvent| async move {
            panic!("bad state");
            #[allow(unreachable_code)]
            ()
        });
        let err = run_handler(&handler, &client(), &private_friend())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Panicked(ref m) if m == "bad state"));
    }

    #[test]
    fn test_remove() {
        let registry = HandlerRegistry::new();
        let log: Log = Arc::default();
        let a = registry.add("notice", recorder(&log, "a"));
        registry.add("notice", recorder(&log, "b"));
        registry.add("request", recorder(&log, "c"));
        assert_ne!(a, registry.add("notice", recorder(&log, "d")));

        assert_eq!(registry.remove("notice", Some(a)), 1);
        assert_eq!(registry.remove("notice", Some(a)), 0);
        assert_eq!(registry.count("notice"), 2);

        assert_eq!(registry.remove("notice", None), 2);
        assert_eq!(registry.event_types(), vec!["request"]);
        assert_eq!(registry.remove("missing", None), 0);
    }

    #[tokio::test]
    async fn test_dispatcher_is_fifo_and_stops_on_cancel() {
        let client = client();
        let log: Log = Arc::default();
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.add(ALL_EVENTS, recorder(&log, "h"));

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(
            rx,
            handlers,
            client.downgrade(),
            cancel.clone(),
        ));

        tx.send(json!({"post_type": "notice", "notice_type": "group_recall"}))
            .unwrap();
        tx.send(json!({"post_type": "meta_event", "meta_event_type": "heartbeat"}))
            .unwrap();
        tx.send(json!({"post_type": "request", "request_type": "friend"}))
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "h:notice.group_recall",
                "h:meta_event.heartbeat",
                "h:request.friend",
            ]
        );

        let (_tx, rx) = mpsc::unbounded_channel::<Value>();
        let task = tokio::spawn(run_dispatcher(
            rx,
            Arc::new(HandlerRegistry::new()),
            client.downgrade(),
            cancel.clone(),
        ));
        cancel.cancel();
        task.await.unwrap();
    }
}
