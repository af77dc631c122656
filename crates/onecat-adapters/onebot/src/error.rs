//! Client lifecycle and handler errors.

use std::time::Duration;

use thiserror::Error;

use onecat_core::TransportError;

/// Errors raised by [`OneBotClient`](crate::OneBotClient) lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// `start` was called on a running client.
    #[error("client '{0}' is already started")]
    AlreadyStarted(String),

    /// Connecting or binding the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for client lifecycle operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// A failure inside an event handler.
///
/// Never propagates out of the dispatcher; it is logged and the next handler
/// runs.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Builds a [`HandlerError::Panicked`] from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// Result type for event handlers.
pub type HandlerResult = Result<(), HandlerError>;
