//! The [`Binding`] sum type and the [`BindingRegistry`].
//!
//! Code that knows which kind it holds uses the variant struct directly and
//! gets the right operations from the compiler. Code that looks bindings up
//! by name goes through the `as_*` accessors, which fail with
//! [`TransportError::TypeMismatch`] on the wrong kind.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use onecat_core::{BindingConfig, BindingKind, MessageFormat, TransportError, TransportResult};

#[cfg(feature = "http-client")]
use crate::http::HttpClientBinding;
#[cfg(feature = "http-server")]
use crate::http::HttpServerBinding;
#[cfg(feature = "sse-client")]
use crate::http::SseClientBinding;
#[cfg(feature = "ws-client")]
use crate::websocket::WsClientBinding;
#[cfg(feature = "ws-server")]
use crate::websocket::WsServerBinding;

/// A live binding of one of the five kinds.
#[derive(Debug)]
pub enum Binding {
    /// HTTP client.
    #[cfg(feature = "http-client")]
    HttpClient(HttpClientBinding),
    /// HTTP SSE client.
    #[cfg(feature = "sse-client")]
    HttpSseClient(SseClientBinding),
    /// WebSocket client.
    #[cfg(feature = "ws-client")]
    WsClient(WsClientBinding),
    /// HTTP server.
    #[cfg(feature = "http-server")]
    HttpServer(HttpServerBinding),
    /// WebSocket server.
    #[cfg(feature = "ws-server")]
    WsServer(WsServerBinding),
}

macro_rules! accessor {
    ($(#[$meta:meta])* $feature:literal, $fn:ident, $variant:ident, $ty:ty) => {
        $(#[$meta])*
        #[cfg(feature = $feature)]
        pub fn $fn(&self) -> TransportResult<&$ty> {
            match self {
                Self::$variant(b) => Ok(b),
                #[allow(unreachable_patterns)]
                other => Err(TransportError::type_mismatch(
                    other.name(),
                    BindingKind::$variant,
                    other.kind(),
                )),
            }
        }
    };
}

impl Binding {
    /// Builds a live binding from its configuration.
    ///
    /// Server kinds are created unbound.
    pub fn from_config(config: BindingConfig) -> TransportResult<Self> {
        match config {
            #[cfg(feature = "http-client")]
            BindingConfig::HttpClient(c) => HttpClientBinding::new(c).map(Self::HttpClient),
            #[cfg(feature = "sse-client")]
            BindingConfig::HttpSseClient(c) => SseClientBinding::new(c).map(Self::HttpSseClient),
            #[cfg(feature = "ws-client")]
            BindingConfig::WsClient(c) => Ok(Self::WsClient(WsClientBinding::new(c))),
            #[cfg(feature = "http-server")]
            BindingConfig::HttpServer(c) => Ok(Self::HttpServer(HttpServerBinding::new(c))),
            #[cfg(feature = "ws-server")]
            BindingConfig::WsServer(c) => Ok(Self::WsServer(WsServerBinding::new(c))),
            #[allow(unreachable_patterns)]
            other => Err(TransportError::InvalidConfig(format!(
                "binding kind {} is not compiled in",
                other.kind()
            ))),
        }
    }

    /// The kind of this binding.
    pub fn kind(&self) -> BindingKind {
        match self {
            #[cfg(feature = "http-client")]
            Self::HttpClient(_) => BindingKind::HttpClient,
            #[cfg(feature = "sse-client")]
            Self::HttpSseClient(_) => BindingKind::HttpSseClient,
            #[cfg(feature = "ws-client")]
            Self::WsClient(_) => BindingKind::WsClient,
            #[cfg(feature = "http-server")]
            Self::HttpServer(_) => BindingKind::HttpServer,
            #[cfg(feature = "ws-server")]
            Self::WsServer(_) => BindingKind::WsServer,
        }
    }

    /// The binding name.
    pub fn name(&self) -> &str {
        match self {
            #[cfg(feature = "http-client")]
            Self::HttpClient(b) => b.name(),
            #[cfg(feature = "sse-client")]
            Self::HttpSseClient(b) => b.name(),
            #[cfg(feature = "ws-client")]
            Self::WsClient(b) => b.name(),
            #[cfg(feature = "http-server")]
            Self::HttpServer(b) => b.name(),
            #[cfg(feature = "ws-server")]
            Self::WsServer(b) => b.name(),
        }
    }

    /// The outgoing message encoding.
    pub fn message_format(&self) -> MessageFormat {
        match self {
            #[cfg(feature = "http-client")]
            Self::HttpClient(b) => b.config().message_format,
            #[cfg(feature = "sse-client")]
            Self::HttpSseClient(b) => b.config().message_format,
            #[cfg(feature = "ws-client")]
            Self::WsClient(b) => b.config().message_format,
            #[cfg(feature = "http-server")]
            Self::HttpServer(b) => b.config().message_format,
            #[cfg(feature = "ws-server")]
            Self::WsServer(b) => b.config().message_format,
        }
    }

    /// The HTTP URL, for kinds that have one.
    pub fn http_url(&self) -> Option<String> {
        match self {
            #[cfg(feature = "http-client")]
            Self::HttpClient(b) => Some(b.http_url()),
            #[cfg(feature = "sse-client")]
            Self::HttpSseClient(b) => Some(b.http_url()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// The WebSocket URL, for kinds that have one.
    pub fn ws_url(&self) -> Option<String> {
        match self {
            #[cfg(feature = "http-client")]
            Self::HttpClient(b) => b.ws_url(),
            #[cfg(feature = "sse-client")]
            Self::HttpSseClient(b) => b.ws_url(),
            #[cfg(feature = "ws-client")]
            Self::WsClient(b) => Some(b.ws_url()),
            #[cfg(feature = "ws-server")]
            Self::WsServer(b) => Some(b.config().ws_url()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    accessor!(
        /// The HTTP client binding, or `TypeMismatch`.
        "http-client", as_http_client, HttpClient, HttpClientBinding
    );
    accessor!(
        /// The SSE client binding, or `TypeMismatch`.
        "sse-client", as_sse_client, HttpSseClient, SseClientBinding
    );
    accessor!(
        /// The WebSocket client binding, or `TypeMismatch`.
        "ws-client", as_ws_client, WsClient, WsClientBinding
    );
    accessor!(
        /// The HTTP server binding, or `TypeMismatch`.
        "http-server", as_http_server, HttpServer, HttpServerBinding
    );
    accessor!(
        /// The WebSocket server binding, or `TypeMismatch`.
        "ws-server", as_ws_server, WsServer, WsServerBinding
    );

    /// Releases the binding's live resources. Server listeners stop; clients
    /// keep nothing open between calls.
    pub fn close(&self) {
        match self {
            #[cfg(feature = "http-server")]
            Self::HttpServer(b) => b.close(),
            #[cfg(feature = "ws-server")]
            Self::WsServer(b) => b.close(),
            #[allow(unreachable_patterns)]
            _ => {}
        }
        debug!(name = %self.name(), kind = %self.kind(), "Binding closed");
    }
}

// =============================================================================
// BindingRegistry
// =============================================================================

/// Bindings of one application, keyed by name.
///
/// Owned by whatever composes the bindings and passed to the clients that
/// need lookups.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: RwLock<HashMap<String, Arc<Binding>>>,
}

impl BindingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configurations, skipping disabled ones.
    pub fn from_configs(configs: impl IntoIterator<Item = BindingConfig>) -> TransportResult<Self> {
        let registry = Self::new();
        for config in configs {
            if !config.enabled() {
                debug!(name = %config.name(), "Skipping disabled binding");
                continue;
            }
            registry.insert(Binding::from_config(config)?)?;
        }
        Ok(registry)
    }

    /// Registers a binding. Names must be unique.
    pub fn insert(&self, binding: Binding) -> TransportResult<Arc<Binding>> {
        let mut bindings = self.bindings.write();
        let name = binding.name().to_string();
        if bindings.contains_key(&name) {
            return Err(TransportError::DuplicateBinding(name));
        }
        info!(name = %name, kind = %binding.kind(), "Binding registered");
        let binding = Arc::new(binding);
        bindings.insert(name, binding.clone());
        Ok(binding)
    }

    /// Looks a binding up by name.
    pub fn get(&self, name: &str) -> TransportResult<Arc<Binding>> {
        self.bindings
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::BindingNotFound(name.to_string()))
    }

    /// Removes and closes a binding.
    pub fn remove(&self, name: &str) -> Option<Arc<Binding>> {
        let removed = self.bindings.write().remove(name);
        if let Some(binding) = &removed {
            binding.close();
        }
        removed
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All bindings, sorted by name.
    pub fn bindings(&self) -> Vec<Arc<Binding>> {
        let mut all: Vec<Arc<Binding>> = self.bindings.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Closes every binding and empties the registry.
    pub fn close_all(&self) {
        let drained: Vec<Arc<Binding>> = self.bindings.write().drain().map(|(_, b)| b).collect();
        for binding in drained {
            binding.close();
        }
    }
}

#[cfg(all(test, feature = "full"))]
mod tests {
    use super::*;
    use onecat_core::{HttpServerConfig, WsClientConfig, WsServerConfig};

    #[test]
    fn test_accessor_type_mismatch() {
        let binding = Binding::from_config(WsServerConfig::new("reverse").into()).unwrap();
        assert_eq!(binding.kind(), BindingKind::WsServer);
        assert!(binding.as_ws_server().is_ok());

        match binding.as_ws_client() {
            Err(TransportError::TypeMismatch {
                name,
                expected,
                actual,
            }) => {
                assert_eq!(name, "reverse");
                assert_eq!(expected, BindingKind::WsClient);
                assert_eq!(actual, BindingKind::WsServer);
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = BindingRegistry::new();
        registry
            .insert(Binding::from_config(WsClientConfig::new("qq").into()).unwrap())
            .unwrap();
        let dup = registry.insert(Binding::from_config(HttpServerConfig::new("qq").into()).unwrap());
        assert!(matches!(dup, Err(TransportError::DuplicateBinding(ref n)) if n == "qq"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_lookup_and_remove() {
        let mut disabled = HttpServerConfig::new("off");
        disabled.enabled = false;
        let registry = BindingRegistry::from_configs(vec![
            WsClientConfig::new("b").into(),
            WsServerConfig::new("a").into(),
            disabled.into(),
        ])
        .unwrap();

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.get("b").unwrap().kind(), BindingKind::WsClient);
        assert!(matches!(registry.get("off"), Err(TransportError::BindingNotFound(_))));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_urls() {
        let binding = Binding::from_config(WsClientConfig::new("qq").into()).unwrap();
        assert_eq!(binding.http_url(), None);
        assert_eq!(binding.ws_url().as_deref(), Some("ws://127.0.0.1:10145/aivk/qq"));
    }
}
