//! Binding kinds and their configurations.
//!
//! A binding is one configured endpoint: a role (client or server) plus a wire
//! type (HTTP, SSE or WebSocket). Each kind has its own configuration struct
//! carrying only the fields it uses; [`BindingConfig`] is the tagged union
//! over all of them. The live bindings built from these configs are in
//! `onecat-transport`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default host for every binding kind.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default WebSocket path.
pub const DEFAULT_WS_PATH: &str = "/aivk/qq";

/// Default timeout for HTTP action calls, in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// The five supported binding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
    /// Plain HTTP client; the gateway runs an HTTP server.
    HttpClient,
    /// HTTP client subscribed to the gateway's Server-Sent-Events stream.
    HttpSseClient,
    /// WebSocket client; the gateway runs a WebSocket server.
    WsClient,
    /// HTTP server; the gateway posts events to us.
    HttpServer,
    /// WebSocket server; the gateway connects to us.
    WsServer,
}

impl BindingKind {
    /// Every kind, in port order.
    pub const ALL: [Self; 5] = [
        Self::HttpClient,
        Self::HttpSseClient,
        Self::WsClient,
        Self::HttpServer,
        Self::WsServer,
    ];

    /// The default port for this kind.
    pub fn default_port(self) -> u16 {
        match self {
            Self::HttpClient => 10143,
            Self::HttpSseClient => 10144,
            Self::WsClient => 10145,
            Self::HttpServer => 10146,
            Self::WsServer => 10147,
        }
    }

    /// The kebab-case name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpClient => "http-client",
            Self::HttpSseClient => "http-sse-client",
            Self::WsClient => "ws-client",
            Self::HttpServer => "http-server",
            Self::WsServer => "ws-server",
        }
    }

    /// Returns true if we initiate the connection.
    pub fn is_client(self) -> bool {
        matches!(self, Self::HttpClient | Self::HttpSseClient | Self::WsClient)
    }

    /// Returns true if the gateway initiates the connection.
    pub fn is_server(self) -> bool {
        !self.is_client()
    }
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the `message` parameter of outgoing actions is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// A segment array.
    #[default]
    Array,
    /// A CQ-code string.
    String,
}

// =============================================================================
// URL derivation
// =============================================================================

/// Builds the HTTP base URL of an endpoint.
pub fn http_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}/")
}

/// Builds the WebSocket URL of an endpoint, carrying the token as the
/// `access_token` query parameter.
pub fn ws_url(host: &str, port: u16, path: &str, token: Option<&str>) -> String {
    let path = normalize_path(path);
    match token {
        Some(token) if !token.is_empty() => format!(
            "ws://{host}:{port}{path}?access_token={}",
            urlencoding::encode(token)
        ),
        _ => format!("ws://{host}:{port}{path}"),
    }
}

/// Prefixes a path with `/` when missing.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_http_timeout_ms() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

macro_rules! default_port_fn {
    ($name:ident, $kind:expr) => {
        fn $name() -> u16 {
            $kind.default_port()
        }
    };
}

default_port_fn!(default_http_client_port, BindingKind::HttpClient);
default_port_fn!(default_sse_client_port, BindingKind::HttpSseClient);
default_port_fn!(default_ws_client_port, BindingKind::WsClient);
default_port_fn!(default_http_server_port, BindingKind::HttpServer);
default_port_fn!(default_ws_server_port, BindingKind::WsServer);

// =============================================================================
// Per-kind configurations
// =============================================================================

/// HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Registry name of the binding.
    pub name: String,
    /// Whether the binding is started by the runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gateway host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Gateway port.
    #[serde(default = "default_http_client_port")]
    pub port: u16,
    /// Path of the companion WebSocket.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Access token, sent as a bearer header.
    #[serde(default)]
    pub token: Option<String>,
    /// Encoding of outgoing messages.
    #[serde(default)]
    pub message_format: MessageFormat,
    /// Whether the gateway is expected to allow cross-origin requests.
    #[serde(default = "default_true")]
    pub cors: bool,
    /// Whether to derive a companion WebSocket URL.
    #[serde(default)]
    pub ws: bool,
    /// Request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl HttpClientConfig {
    /// Creates a configuration with kind defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            host: default_host(),
            port: default_http_client_port(),
            path: default_ws_path(),
            token: None,
            message_format: MessageFormat::Array,
            cors: true,
            ws: false,
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
        }
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the HTTP base URL.
    pub fn http_url(&self) -> String {
        http_url(&self.host, self.port)
    }

    /// Returns the companion WebSocket URL when `ws` is enabled.
    pub fn ws_url(&self) -> Option<String> {
        self.ws
            .then(|| ws_url(&self.host, self.port, &self.path, self.token.as_deref()))
    }
}

/// HTTP Server-Sent-Events client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseClientConfig {
    /// Registry name of the binding.
    pub name: String,
    /// Whether the binding is started by the runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gateway host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Gateway port.
    #[serde(default = "default_sse_client_port")]
    pub port: u16,
    /// Path of the companion WebSocket.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Access token, sent as a bearer header.
    #[serde(default)]
    pub token: Option<String>,
    /// Encoding of outgoing messages.
    #[serde(default)]
    pub message_format: MessageFormat,
    /// Whether the gateway is expected to allow cross-origin requests.
    #[serde(default = "default_true")]
    pub cors: bool,
    /// Whether to derive a companion WebSocket URL.
    #[serde(default)]
    pub ws: bool,
}

impl SseClientConfig {
    /// Creates a configuration with kind defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            host: default_host(),
            port: default_sse_client_port(),
            path: default_ws_path(),
            token: None,
            message_format: MessageFormat::Array,
            cors: true,
            ws: false,
        }
    }

    /// Returns the HTTP base URL, which is also the event stream URL.
    pub fn http_url(&self) -> String {
        http_url(&self.host, self.port)
    }

    /// Returns the companion WebSocket URL when `ws` is enabled.
    pub fn ws_url(&self) -> Option<String> {
        self.ws
            .then(|| ws_url(&self.host, self.port, &self.path, self.token.as_deref()))
    }
}

/// WebSocket client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsClientConfig {
    /// Registry name of the binding.
    pub name: String,
    /// Whether the binding is started by the runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gateway host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Gateway port.
    #[serde(default = "default_ws_client_port")]
    pub port: u16,
    /// WebSocket path.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Access token, sent as a query parameter.
    #[serde(default)]
    pub token: Option<String>,
    /// Encoding of outgoing messages.
    #[serde(default)]
    pub message_format: MessageFormat,
}

impl WsClientConfig {
    /// Creates a configuration with kind defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            host: default_host(),
            port: default_ws_client_port(),
            path: default_ws_path(),
            token: None,
            message_format: MessageFormat::Array,
        }
    }

    /// Returns the WebSocket URL.
    pub fn ws_url(&self) -> String {
        ws_url(&self.host, self.port, &self.path, self.token.as_deref())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Registry name of the binding.
    pub name: String,
    /// Whether the binding is started by the runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Host to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind.
    #[serde(default = "default_http_server_port")]
    pub port: u16,
    /// Access token the gateway must present.
    #[serde(default)]
    pub token: Option<String>,
    /// Encoding of quick-operation replies.
    #[serde(default)]
    pub message_format: MessageFormat,
}

impl HttpServerConfig {
    /// Creates a configuration with kind defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            host: default_host(),
            port: default_http_server_port(),
            token: None,
            message_format: MessageFormat::Array,
        }
    }

    /// Returns the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsServerConfig {
    /// Registry name of the binding.
    pub name: String,
    /// Whether the binding is started by the runtime.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Host to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind.
    #[serde(default = "default_ws_server_port")]
    pub port: u16,
    /// WebSocket path.
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Access token the gateway must present.
    #[serde(default)]
    pub token: Option<String>,
    /// Encoding of outgoing messages.
    #[serde(default)]
    pub message_format: MessageFormat,
}

impl WsServerConfig {
    /// Creates a configuration with kind defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            host: default_host(),
            port: default_ws_server_port(),
            path: default_ws_path(),
            token: None,
            message_format: MessageFormat::Array,
        }
    }

    /// Returns the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the URL a gateway would connect to.
    pub fn ws_url(&self) -> String {
        ws_url(&self.host, self.port, &self.path, self.token.as_deref())
    }
}

// =============================================================================
// BindingConfig
// =============================================================================

/// Configuration of any binding kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BindingConfig {
    /// HTTP client.
    HttpClient(HttpClientConfig),
    /// HTTP SSE client.
    HttpSseClient(SseClientConfig),
    /// WebSocket client.
    WsClient(WsClientConfig),
    /// HTTP server.
    HttpServer(HttpServerConfig),
    /// WebSocket server.
    WsServer(WsServerConfig),
}

impl BindingConfig {
    /// Returns the kind of this configuration.
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::HttpClient(_) => BindingKind::HttpClient,
            Self::HttpSseClient(_) => BindingKind::HttpSseClient,
            Self::WsClient(_) => BindingKind::WsClient,
            Self::HttpServer(_) => BindingKind::HttpServer,
            Self::WsServer(_) => BindingKind::WsServer,
        }
    }

    /// Returns the binding name.
    pub fn name(&self) -> &str {
        match self {
            Self::HttpClient(c) => &c.name,
            Self::HttpSseClient(c) => &c.name,
            Self::WsClient(c) => &c.name,
            Self::HttpServer(c) => &c.name,
            Self::WsServer(c) => &c.name,
        }
    }

    /// Returns whether the binding is enabled.
    pub fn enabled(&self) -> bool {
        match self {
            Self::HttpClient(c) => c.enabled,
            Self::HttpSseClient(c) => c.enabled,
            Self::WsClient(c) => c.enabled,
            Self::HttpServer(c) => c.enabled,
            Self::WsServer(c) => c.enabled,
        }
    }

    /// Returns the configured port.
    pub fn port(&self) -> u16 {
        match self {
            Self::HttpClient(c) => c.port,
            Self::HttpSseClient(c) => c.port,
            Self::WsClient(c) => c.port,
            Self::HttpServer(c) => c.port,
            Self::WsServer(c) => c.port,
        }
    }

    /// Returns the outgoing message encoding.
    pub fn message_format(&self) -> MessageFormat {
        match self {
            Self::HttpClient(c) => c.message_format,
            Self::HttpSseClient(c) => c.message_format,
            Self::WsClient(c) => c.message_format,
            Self::HttpServer(c) => c.message_format,
            Self::WsServer(c) => c.message_format,
        }
    }
}

impl From<HttpClientConfig> for BindingConfig {
    fn from(config: HttpClientConfig) -> Self {
        Self::HttpClient(config)
    }
}

impl From<SseClientConfig> for BindingConfig {
    fn from(config: SseClientConfig) -> Self {
        Self::HttpSseClient(config)
    }
}

impl From<WsClientConfig> for BindingConfig {
    fn from(config: WsClientConfig) -> Self {
        Self::WsClient(config)
    }
}

impl From<HttpServerConfig> for BindingConfig {
    fn from(config: HttpServerConfig) -> Self {
        Self::HttpServer(config)
    }
}

impl From<WsServerConfig> for BindingConfig {
    fn from(config: WsServerConfig) -> Self {
        Self::WsServer(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let ports: Vec<u16> = BindingKind::ALL.iter().map(|k| k.default_port()).collect();
        assert_eq!(ports, vec![10143, 10144, 10145, 10146, 10147]);
    }

    #[test]
    fn test_ws_url_with_token() {
        let mut config = WsClientConfig::new("qq");
        assert_eq!(config.ws_url(), "ws://127.0.0.1:10145/aivk/qq");

        config.token = Some("a b".into());
        assert_eq!(
            config.ws_url(),
            "ws://127.0.0.1:10145/aivk/qq?access_token=a%20b"
        );
    }

    #[test]
    fn test_http_client_companion_ws() {
        let mut config = HttpClientConfig::new("qq");
        assert_eq!(config.http_url(), "http://127.0.0.1:10143/");
        assert!(config.ws_url().is_none());

        config.ws = true;
        config.token = Some("secret".into());
        assert_eq!(
            config.ws_url().as_deref(),
            Some("ws://127.0.0.1:10143/aivk/qq?access_token=secret")
        );
    }

    #[test]
    fn test_binding_config_yaml() {
        let yaml = r#"
- type: ws-client
  name: primary
  token: abc
- type: ws-server
  name: reverse
  port: 9000
  path: onebot
- type: http-sse-client
  name: events
  message_format: string
"#;
        let configs: Vec<BindingConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(configs.len(), 3);

        assert_eq!(configs[0].kind(), BindingKind::WsClient);
        assert_eq!(configs[0].port(), 10145);

        match &configs[1] {
            BindingConfig::WsServer(c) => {
                assert_eq!(c.port, 9000);
                assert_eq!(c.bind_addr(), "127.0.0.1:9000");
                assert_eq!(c.ws_url(), "ws://127.0.0.1:9000/onebot");
            }
            other => panic!("unexpected config: {other:?}"),
        }

        assert_eq!(configs[2].message_format(), MessageFormat::String);
        assert!(configs[2].enabled());
    }

    #[test]
    fn test_kind_roles() {
        assert!(BindingKind::HttpSseClient.is_client());
        assert!(BindingKind::WsServer.is_server());
        assert!(!BindingKind::HttpServer.is_client());
    }
}
