//! HTTP bindings: plain client, SSE client and server.

#[cfg(feature = "http-client")]
pub mod client;
#[cfg(feature = "http-server")]
pub mod server;
#[cfg(feature = "sse-client")]
pub mod sse;

#[cfg(feature = "http-client")]
pub use client::HttpClientBinding;
#[cfg(feature = "http-server")]
pub use server::{ActionError, ActionFn, HttpServerBinding, MessageHook, QuickReply};
#[cfg(feature = "sse-client")]
pub use sse::{SseClientBinding, SseEvent, SseEventStream, SseParser};
