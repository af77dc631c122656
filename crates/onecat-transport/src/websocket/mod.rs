//! WebSocket bindings.

#[cfg(feature = "ws-client")]
pub mod client;
#[cfg(feature = "ws-server")]
pub mod server;

#[cfg(feature = "ws-client")]
pub use client::WsClientBinding;
#[cfg(feature = "ws-server")]
pub use server::{EchoFrames, FrameHandler, WsServerBinding};
