//! # onecat core
//!
//! Transport-agnostic building blocks of the onecat OneBot engine:
//!
//! - **Errors**: the shared taxonomy ([`TransportError`], [`ApiError`], [`MessageError`])
//! - **Bindings**: the five binding kinds and their configurations ([`BindingKind`], [`BindingConfig`])
//! - **Connections**: connection state and the channel view of a WebSocket ([`WsConnection`])
//!
//! Network implementations live in `onecat-transport`; the OneBot protocol
//! client lives in `onecat-adapter-onebot`.

pub mod binding;
pub mod connection;
pub mod error;

pub use binding::{
    BindingConfig, BindingKind, DEFAULT_HOST, DEFAULT_WS_PATH, HttpClientConfig, HttpServerConfig,
    MessageFormat, SseClientConfig, WsClientConfig, WsServerConfig,
};
pub use connection::{
    CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, ConnectionState, ListenerHandle,
    WsConnection, WsInbound, WsPeer, WsSender,
};
pub use error::{
    ApiError, ApiResult, MessageError, MessageResult, TransportError, TransportResult,
};
