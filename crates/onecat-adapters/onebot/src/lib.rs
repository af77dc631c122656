//! # OneBot v11 Client for onecat
//!
//! This crate speaks the OneBot v11 protocol over any binding from
//! `onecat-transport`: it receives events, dispatches them to handlers by
//! hierarchical event type, and calls actions on the gateway.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onecat_adapter_onebot::{ClientOptions, InboundEvent, OneBotClient};
//! use onecat_core::WsClientConfig;
//! use onecat_transport::{Binding, WsClientBinding};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let binding = Binding::WsClient(WsClientBinding::new(WsClientConfig::new("main")));
//!     let client = OneBotClient::new(binding, ClientOptions::default());
//!
//!     client.on_message(Some("private"), None, |client: OneBotClient, event: InboundEvent| async move {
//!         if let (Some(user_id), Some(message)) = (event.user_id(), event.message()) {
//!             client.send_private_msg(user_id, message).await?;
//!         }
//!         Ok::<_, anyhow::Error>(())
//!     });
//!
//!     client.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Event Types
//!
//! ```text
//! message.private.friend      post_type . message_type . sub_type
//! notice.group_recall         sub_type omitted when empty
//! meta_event.heartbeat
//! all                         wildcard, runs after the exact-type handlers
//! ```
//!
//! ## Actions
//!
//! [`OneBotClient::call_action`] is the primitive; the convenience senders
//! and queries in [`actions`] build on it. Over a WebSocket client binding,
//! actions share the listener's socket and are matched to replies by `echo`.

pub mod actions;
pub mod api_caller;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod model;

pub use actions::{
    DEFAULT_BAN_SECONDS, get_at_targets, get_message_images, get_message_text, has_at_all,
    parse_message,
};
pub use api_caller::{ApiCaller, HttpApiCaller, UnsupportedApiCaller, WsApiCaller};
pub use client::{ClientOptions, OneBotClient};
pub use dispatcher::{BoxedHandler, EventHandler, HandlerId, HandlerRegistry, IntoHandlerResult};
pub use error::{ClientError, ClientResult, HandlerError, HandlerResult};
pub use listener::{ReconnectPolicy, WsConnector};
pub use model::{
    ALL_EVENTS, Action, ActionRequest, ActionResponse, AtTarget, InboundEvent, LoginInfo,
    MediaOptions, MediaSource, Message, MessageTarget, PostType, Segment, classify_event,
    join_event_type,
};
