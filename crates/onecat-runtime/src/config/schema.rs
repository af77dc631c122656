//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use onecat_adapter_onebot::{ClientOptions, ReconnectPolicy};
use onecat_core::BindingConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OnecatConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Transport bindings; one client is created per enabled binding.
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,

    /// Settings shared by every client.
    #[serde(default)]
    pub client: ClientSection,

    /// Where persistent data lives.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Free-form sections for application code, keyed by section name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    /// The directive spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One short line per event.
    #[default]
    Compact,
    /// The default `tracing-subscriber` layout.
    Full,
    /// Multi-line, human oriented.
    Pretty,
    /// One JSON object per event.
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
    /// The file at `logging.file_path`.
    File,
}

/// Rotation period of file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// A single file.
    #[default]
    Never,
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    /// Span creation.
    pub new: bool,
    /// Span entry.
    pub enter: bool,
    /// Span exit.
    pub exit: bool,
    /// Span close.
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level.
    #[serde(default)]
    pub level: LogLevel,

    /// Line layout.
    #[serde(default)]
    pub format: LogFormat,

    /// Destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Span lifecycle events.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, for `output = "file"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// How often the log file rotates.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files kept; 0 keeps all of them.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-module levels, e.g. `onecat_transport: debug`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}

// =============================================================================
// Client
// =============================================================================

/// Settings applied to every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    /// How long a WebSocket action waits for its reply, in milliseconds.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Listener backoff.
    #[serde(default)]
    pub reconnect: ReconnectSection,

    /// Bot account used for mention detection when the gateway cannot tell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_self_id: Option<i64>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            reconnect: ReconnectSection::default(),
            default_self_id: None,
        }
    }
}

impl ClientSection {
    /// Converts to client options.
    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            action_timeout: Duration::from_millis(self.action_timeout_ms),
            reconnect: self.reconnect.policy(),
            default_self_id: self.default_self_id,
        }
    }
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

/// Reconnect backoff of WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSection {
    /// Unit delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retries before the listener gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl ReconnectSection {
    /// Converts to the listener policy.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    5
}

// =============================================================================
// Storage
// =============================================================================

/// Persistent storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; the platform data directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The effective root directory: `root_dir`, else `<data dir>/onecat`,
    /// else `.onecat` under the working directory.
    pub fn resolve_root(&self) -> PathBuf {
        if let Some(root) = &self.root_dir {
            return root.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("onecat"))
            .unwrap_or_else(|| PathBuf::from(".onecat"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onecat_core::BindingKind;

    #[test]
    fn test_yaml_schema() {
        let yaml = r#"
logging:
  level: debug
  filters:
    onecat_transport: trace
bindings:
  - type: ws-client
    name: main
    token: secret
  - type: http-server
    name: hooks
    port: 0
    enabled: false
client:
  action_timeout_ms: 5000
  reconnect:
    max_retries: 3
storage:
  root_dir: /var/lib/onecat
extensions:
  echo:
    prefix: "> "
"#;
        let config: OnecatConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.filters["onecat_transport"], LogLevel::Trace);
        assert_eq!(config.logging.max_files, 5);
        assert_eq!(config.logging.rotation, LogRotation::Never);

        assert_eq!(config.bindings.len(), 2);
        assert_eq!(config.bindings[0].kind(), BindingKind::WsClient);
        assert_eq!(config.bindings[0].port(), 10145);
        assert!(!config.bindings[1].enabled());

        let options = config.client.options();
        assert_eq!(options.action_timeout, Duration::from_secs(5));
        assert_eq!(options.reconnect.max_retries, 3);
        assert_eq!(options.reconnect.base_delay, Duration::from_secs(1));

        assert_eq!(
            config.storage.resolve_root(),
            PathBuf::from("/var/lib/onecat")
        );
        assert_eq!(config.extensions["echo"]["prefix"], "> ");
    }

    #[test]
    fn test_defaults() {
        let config = OnecatConfig::default();
        assert!(config.bindings.is_empty());
        assert_eq!(config.logging.output, LogOutput::Stdout);
        assert_eq!(config.client.options(), ClientOptions::default());
        assert!(config.storage.resolve_root().ends_with("onecat"));
    }
}
