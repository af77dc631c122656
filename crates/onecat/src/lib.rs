//! # onecat
//!
//! A OneBot v11 protocol engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────┐  events   ┌────────────┐
//! │   Binding    │──────────▶│ OneBotClient │──────────▶│  Handlers  │
//! │ (5 kinds)    │◀──────────│ (listener,   │◀──────────│ (by event  │
//! └──────────────┘  actions  │  dispatcher) │  actions  │   type)    │
//!                            └──────────────┘           └────────────┘
//! ```
//!
//! - **core**: errors, binding configurations, connection state
//! - **transport**: HTTP, SSE and WebSocket bindings, client and server side
//! - **adapter**: the OneBot v11 client, message model and actions
//! - **runtime**: configuration, logging and the process lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onecat::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = OnecatRuntime::load()?;
//!     for client in runtime.clients() {
//!         client.on_message(None, None, |client: OneBotClient, event: InboundEvent| async move {
//!             if let (Some(user), Some(message)) = (event.user_id(), event.message()) {
//!                 client.send_private_msg(user, message).await?;
//!             }
//!             Ok::<_, anyhow::Error>(())
//!         });
//!     }
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use onecat_adapter_onebot as adapter;
pub use onecat_core as core;
pub use onecat_runtime as runtime;
pub use onecat_transport as transport;

/// Commonly used types.
///
/// ```rust,ignore
/// use onecat::prelude::*;
/// ```
pub mod prelude {
    // Runtime
    pub use onecat_runtime::{OnecatConfig, OnecatRuntime};

    // Client and handlers
    pub use onecat_adapter_onebot::{
        ClientOptions, EventHandler, HandlerId, InboundEvent, OneBotClient,
    };

    // Messages
    pub use onecat_adapter_onebot::{
        AtTarget, MediaOptions, MediaSource, Message, MessageTarget, Segment, get_message_text,
    };

    // Bindings and errors
    pub use onecat_core::{
        ApiError, BindingConfig, BindingKind, ConnectionState, HttpClientConfig, HttpServerConfig,
        MessageFormat, SseClientConfig, TransportError, WsClientConfig, WsServerConfig,
    };
    pub use onecat_transport::{Binding, BindingRegistry};
}
