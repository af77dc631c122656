//! OneBot v11 data model: segments, messages, events and action wire types.

pub mod api;
pub mod event;
pub mod media;
pub mod message;
pub mod segment;

pub use api::{Action, ActionRequest, ActionResponse, LoginInfo, MessageTarget};
pub use event::{ALL_EVENTS, InboundEvent, PostType, classify_event, join_event_type};
pub use media::{MediaOptions, MediaSource};
pub use message::{Message, parse_cq_string};
pub use segment::{AtTarget, Segment, escape_cq_text, escape_cq_value, unescape_cq};
