//! Configuration for the onecat runtime.
//!
//! Configuration is layered with figment (defaults, files, `ONECAT_*`
//! environment variables) and checked by [`validate_config`] before any
//! binding is built.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile};
pub use schema::{
    ClientSection, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, OnecatConfig,
    ReconnectSection, SpanEventConfig, StorageConfig,
};
pub use validation::validate_config;
