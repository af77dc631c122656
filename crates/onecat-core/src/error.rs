//! Error types shared by every onecat crate.
//!
//! Lifecycle errors of the protocol client and handler failures live in the
//! adapter crate, next to the code that produces them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::binding::BindingKind;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by transport bindings.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// An operation was invoked on a binding of the wrong kind.
    #[error("binding '{name}' is {actual}, but the operation requires {expected}")]
    TypeMismatch {
        /// Name of the binding.
        name: String,
        /// Kind the operation needs.
        expected: BindingKind,
        /// Kind the binding actually has.
        actual: BindingKind,
    },

    /// The peer rejected or omitted the access token.
    #[error("authentication failed: {reason}")]
    Auth {
        /// Reason for failure.
        reason: String,
    },

    /// Connecting to the peer failed or the peer answered with an error status.
    #[error("connection failed: {url} - {reason}")]
    Connection {
        /// The URL that failed.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The connection was closed while in use.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A frame could not be decoded.
    #[error("failed to decode {what}: {reason}")]
    Decode {
        /// What was being decoded.
        what: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// A server binding could not bind its listener.
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// The address.
        addr: String,
        /// Reason for failure.
        reason: String,
    },

    /// A binding with this name is already registered.
    #[error("binding '{0}' is already registered")]
    DuplicateBinding(String),

    /// No binding with this name is registered.
    #[error("binding '{0}' not found")]
    BindingNotFound(String),

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a connection error.
    pub fn connection(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(name: impl Into<String>, expected: BindingKind, actual: BindingKind) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected,
            actual,
        }
    }

    /// Returns true if this error means the peer refused our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Message Errors
// =============================================================================

/// Errors raised while building a message.
#[derive(Debug, Clone, Error)]
pub enum MessageError {
    /// A local media file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A local media path could not be resolved.
    #[error("I/O error on {}: {reason}", path.display())]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },
}

// =============================================================================
// API Errors
// =============================================================================

/// Errors returned by action calls.
///
/// A backend answering with a failed `status` is not an error: the raw
/// response is returned and callers inspect `status`/`retcode` themselves.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No response arrived for the action in time.
    #[error("action '{action}' timed out")]
    Timeout {
        /// The action name.
        action: String,
    },

    /// The binding cannot carry action calls.
    #[error("binding kind {0} cannot invoke actions")]
    Unsupported(BindingKind),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Message building error.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for message building.
pub type MessageResult<T> = Result<T, MessageError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = TransportError::type_mismatch("qq", BindingKind::WsClient, BindingKind::HttpServer);
        assert_eq!(
            err.to_string(),
            "binding 'qq' is http-server, but the operation requires ws-client"
        );
    }

    #[test]
    fn test_api_error_from_transport() {
        let err: ApiError = TransportError::Auth {
            reason: "401".into(),
        }
        .into();
        assert!(matches!(err, ApiError::Transport(ref t) if t.is_auth()));
    }
}
