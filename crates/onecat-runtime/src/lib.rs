//! onecat runtime: configuration, logging and lifecycle orchestration.
//!
//! This crate provides:
//! - Layered configuration with figment ([`ConfigLoader`], [`OnecatConfig`])
//! - Logging setup on `tracing-subscriber` ([`LoggingBuilder`])
//! - The process-wide configuration store ([`ConfigStore`])
//! - [`OnecatRuntime`], which turns a configuration into running clients
//!
//! ```ignore
//! use onecat_runtime::OnecatRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = OnecatRuntime::load()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! A minimal `onecat.toml`:
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [[bindings]]
//! type = "ws-client"
//! name = "main"
//! host = "127.0.0.1"
//! port = 10145
//! token = "secret"
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod store;

pub use config::{ConfigError, ConfigLoader, ConfigResult, LoggingConfig, OnecatConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, LoggingError, SpanEvents};
pub use runtime::{OnecatRuntime, RuntimeBuilder};
pub use store::{ConfigStore, MemoryConfigStore, section_as};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros for application code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
