//! Runtime error types.

use thiserror::Error;

use onecat_adapter_onebot::ClientError;
use onecat_core::TransportError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A binding could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A client failed a lifecycle operation.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// No client is bound to the name.
    #[error("Client not found: {0}")]
    ClientNotFound(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
