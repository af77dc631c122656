//! Inbound OneBot v11 events.
//!
//! Events are kept as raw JSON and classified into a dotted event type:
//!
//! ```text
//! post_type     type field        example
//! ─────────────────────────────────────────────────────────────
//! message       message_type      message.private.friend
//! notice        notice_type       notice.group_increase.approve
//! request       request_type      request.friend
//! meta_event    meta_event_type   meta_event.heartbeat
//! ```
//!
//! The third component is `sub_type` and is omitted when absent or empty.

use serde_json::Value;

use super::message::Message;

/// Wildcard event type; handlers registered under it see every event.
pub const ALL_EVENTS: &str = "all";

/// The four `post_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostType {
    /// A chat message.
    Message,
    /// A notice (member joined, recall, poke, ...).
    Notice,
    /// A friend or group request.
    Request,
    /// Heartbeat or lifecycle.
    MetaEvent,
}

impl PostType {
    /// All post types.
    pub const ALL: [PostType; 4] = [
        PostType::Message,
        PostType::Notice,
        PostType::Request,
        PostType::MetaEvent,
    ];

    /// Parses the `post_type` field.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Message => "message",
            PostType::Notice => "notice",
            PostType::Request => "request",
            PostType::MetaEvent => "meta_event",
        }
    }

    /// The field naming the event's second level.
    pub fn type_field(&self) -> &'static str {
        match self {
            PostType::Message => "message_type",
            PostType::Notice => "notice_type",
            PostType::Request => "request_type",
            PostType::MetaEvent => "meta_event_type",
        }
    }
}

impl std::fmt::Display for PostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Computes the dotted event type of a raw event.
///
/// An unknown `post_type` is returned as is, or `"unknown"` when empty.
pub fn classify_event(event: &Value) -> String {
    let post_type = str_field(event, "post_type");
    let Some(kind) = PostType::parse(post_type) else {
        return if post_type.is_empty() {
            "unknown".to_string()
        } else {
            post_type.to_string()
        };
    };

    let second = str_field(event, kind.type_field());
    let sub_type = str_field(event, "sub_type");
    join_event_type(kind.as_str(), Some(second), Some(sub_type))
}

/// Builds `post[.second[.sub]]`, skipping empty or absent levels. A sub type
/// without a second level is ignored.
pub fn join_event_type(post_type: &str, second: Option<&str>, sub_type: Option<&str>) -> String {
    let mut event_type = post_type.to_string();
    if let Some(second) = second.filter(|s| !s.is_empty()) {
        event_type.push('.');
        event_type.push_str(second);
        if let Some(sub) = sub_type.filter(|s| !s.is_empty()) {
            event_type.push('.');
            event_type.push_str(sub);
        }
    }
    event_type
}

/// Reads an id that gateways send either as a number or as a numeric string.
pub(crate) fn id_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    event_type: String,
    raw: Value,
}

impl InboundEvent {
    /// Wraps a raw event and classifies it.
    pub fn new(raw: Value) -> Self {
        Self {
            event_type: classify_event(&raw),
            raw,
        }
    }

    /// The dotted event type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The `post_type`, if it is one of the four known values.
    pub fn post_type(&self) -> Option<PostType> {
        PostType::parse(str_field(&self.raw, "post_type"))
    }

    /// The `sub_type` field.
    pub fn sub_type(&self) -> Option<&str> {
        self.raw.get("sub_type").and_then(Value::as_str)
    }

    /// The receiving bot's id.
    pub fn self_id(&self) -> Option<i64> {
        id_field(&self.raw, "self_id")
    }

    /// The acting user.
    pub fn user_id(&self) -> Option<i64> {
        id_field(&self.raw, "user_id")
    }

    /// The group, for group events.
    pub fn group_id(&self) -> Option<i64> {
        id_field(&self.raw, "group_id")
    }

    /// The message id, for message and recall events.
    pub fn message_id(&self) -> Option<i64> {
        id_field(&self.raw, "message_id")
    }

    /// The event time as a unix timestamp.
    pub fn time(&self) -> Option<i64> {
        id_field(&self.raw, "time")
    }

    /// The decoded `message` field.
    pub fn message(&self) -> Option<Message> {
        self.raw.get("message").and_then(Message::from_value)
    }

    /// The `raw_message` field.
    pub fn raw_message(&self) -> Option<&str> {
        self.raw.get("raw_message").and_then(Value::as_str)
    }

    /// Returns true for group messages.
    pub fn is_group_message(&self) -> bool {
        self.post_type() == Some(PostType::Message) && str_field(&self.raw, "message_type") == "group"
    }

    /// Returns true for private messages.
    pub fn is_private_message(&self) -> bool {
        self.post_type() == Some(PostType::Message)
            && str_field(&self.raw, "message_type") == "private"
    }

    /// The raw JSON.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Consumes the event into its raw JSON.
    pub fn into_raw(self) -> Value {
        self.raw
    }
}

impl From<Value> for InboundEvent {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_with_sub_type() {
        let event = json!({"post_type": "message", "message_type": "private", "sub_type": "friend"});
        assert_eq!(classify_event(&event), "message.private.friend");
    }

    #[test]
    fn test_classify_without_sub_type() {
        let event = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        assert_eq!(classify_event(&event), "meta_event.heartbeat");

        let event = json!({"post_type": "notice", "notice_type": "group_recall", "sub_type": ""});
        assert_eq!(classify_event(&event), "notice.group_recall");
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_event(&json!({"post_type": "message_sent"})), "message_sent");
        assert_eq!(classify_event(&json!({})), "unknown");
        assert_eq!(classify_event(&json!({"post_type": 5})), "unknown");
    }

    #[test]
    fn test_join_event_type() {
        assert_eq!(join_event_type("message", None, Some("friend")), "message");
        assert_eq!(join_event_type("request", Some("group"), None), "request.group");
        assert_eq!(
            join_event_type("notice", Some("notify"), Some("poke")),
            "notice.notify.poke"
        );
    }

    #[test]
    fn test_accessors() {
        let event = InboundEvent::new(json!({
            "time": 1744662076,
            "self_id": 123456,
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "group_id": "778899",
            "user_id": 234567,
            "message_id": 364805473,
            "message": "hi [CQ:at,qq=123456]",
            "raw_message": "hi [CQ:at,qq=123456]"
        }));

        assert_eq!(event.event_type(), "message.group.normal");
        assert_eq!(event.post_type(), Some(PostType::Message));
        assert_eq!(event.self_id(), Some(123456));
        assert_eq!(event.group_id(), Some(778899));
        assert_eq!(event.user_id(), Some(234567));
        assert_eq!(event.message_id(), Some(364805473));
        assert!(event.is_group_message());
        assert!(!event.is_private_message());

        let message = event.message().unwrap();
        assert_eq!(message.at_targets(), vec![123456]);
        assert_eq!(message.extract_plain_text(), "hi ");
    }
}
