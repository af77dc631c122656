//! # onecat transport
//!
//! Network implementations of the five OneBot binding kinds.
//!
//! ## Features
//!
//! - `http-client`: plain HTTP client (actions by `POST`)
//! - `sse-client`: HTTP client that also reads a Server-Sent-Events stream
//! - `ws-client`: forward WebSocket client
//! - `http-server`: HTTP server receiving event posts and action requests
//! - `ws-server`: reverse WebSocket server
//! - `full` (default): all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  onecat-adapter-*   │  (protocol clients)
//! ├─────────────────────┤
//! │  onecat-transport   │  <- This crate (bindings)
//! ├─────────────────────┤
//! │  onecat-core        │  (configs, errors, connection types)
//! ├─────────────────────┤
//! │  Network (TCP/HTTP) │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onecat_core::WsClientConfig;
//! use onecat_transport::{Binding, BindingRegistry};
//!
//! let registry = BindingRegistry::new();
//! registry.insert(Binding::from_config(WsClientConfig::new("qq").into())?)?;
//!
//! let binding = registry.get("qq")?;
//! let mut conn = binding.as_ws_client()?.connect().await?;
//! while let Some(frame) = conn.recv().await {
//!     println!("{frame:?}");
//! }
//! ```

#[cfg(not(any(
    feature = "http-client",
    feature = "sse-client",
    feature = "ws-client",
    feature = "http-server",
    feature = "ws-server"
)))]
compile_error!("onecat-transport needs at least one binding feature enabled");

pub mod binding;

#[cfg(any(feature = "http-client", feature = "sse-client", feature = "http-server"))]
pub mod http;

#[cfg(any(feature = "ws-client", feature = "ws-server"))]
pub mod websocket;

pub use binding::{Binding, BindingRegistry};

#[cfg(feature = "http-client")]
pub use http::HttpClientBinding;

#[cfg(feature = "sse-client")]
pub use http::{SseClientBinding, SseEvent, SseEventStream, SseParser};

#[cfg(feature = "http-server")]
pub use http::{HttpServerBinding, QuickReply};

#[cfg(feature = "ws-client")]
pub use websocket::WsClientBinding;

#[cfg(feature = "ws-server")]
pub use websocket::{FrameHandler, WsServerBinding};
