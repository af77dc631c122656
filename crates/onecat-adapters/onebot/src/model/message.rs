//! OneBot v11 messages.
//!
//! A [`Message`] is an ordered list of [`Segment`]s. It is sent either as a
//! JSON array of segments or, for bindings configured with the string
//! format, as one CQ-coded string; both forms are accepted on receipt.
//!
//! # Example
//!
//! ```rust,ignore
//! use onecat_adapter_onebot::{MediaOptions, Message};
//!
//! let msg = Message::new()
//!     .reply(42)
//!     .at(10001)
//!     .text(" look at this")
//!     .image("https://example.com/cat.png", MediaOptions::default())?;
//!
//! assert_eq!(msg.extract_plain_text(), " look at this");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use onecat_core::{MessageFormat, MessageResult};

use super::media::{MediaOptions, MediaSource};
use super::segment::{AtTarget, Segment, unescape_cq};

/// A message made of segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.segments.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Array(Vec<Value>),
            String(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Array(items) => Message::from_wire_items(items),
            Wire::String(cq) => Message::from_cq_string(&cq),
        })
    }
}

impl Message {
    // Each element is decoded on its own so one malformed element does not
    // take the rest of the message with it.
    fn from_wire_items(items: Vec<Value>) -> Self {
        let segments = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match Segment::deserialize(item) {
                Ok(segment) => Some(segment),
                Err(e) => {
                    debug!(index, error = %e, "Dropping undecodable message segment");
                    None
                }
            })
            .collect();
        Self { segments }
    }
}

// ============================================================================
// Builder
// ============================================================================

impl Message {
    /// An empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// A message holding exactly these segments.
    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Parses the CQ-coded string form.
    pub fn from_cq_string(input: &str) -> Self {
        Self {
            segments: parse_cq_string(input),
        }
    }

    /// Decodes a `message` field, which may be a segment array or a CQ string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::from_cq_string(s)),
            Value::Array(items) => Some(Self::from_wire_items(items.clone())),
            _ => None,
        }
    }

    /// Appends text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::text(text));
        self
    }

    /// Appends a QQ face.
    pub fn face(mut self, id: i32) -> Self {
        self.segments.push(Segment::face(id));
        self
    }

    /// Appends an image. A local path that does not exist fails with
    /// `FileNotFound`.
    pub fn image(
        mut self,
        source: impl Into<MediaSource>,
        options: MediaOptions,
    ) -> MessageResult<Self> {
        self.segments.push(Segment::image(source, &options)?);
        Ok(self)
    }

    /// Appends a voice record.
    pub fn record(
        mut self,
        source: impl Into<MediaSource>,
        magic: bool,
        options: MediaOptions,
    ) -> MessageResult<Self> {
        self.segments.push(Segment::record(source, magic, &options)?);
        Ok(self)
    }

    /// Appends a video.
    pub fn video(
        mut self,
        source: impl Into<MediaSource>,
        options: MediaOptions,
    ) -> MessageResult<Self> {
        self.segments.push(Segment::video(source, &options)?);
        Ok(self)
    }

    /// Appends a mention.
    pub fn at(mut self, target: impl Into<AtTarget>) -> Self {
        self.segments.push(Segment::at(target));
        self
    }

    /// Appends a mention with a display name.
    pub fn at_named(mut self, user_id: i64, name: impl Into<String>) -> Self {
        self.segments.push(Segment::at_named(user_id, name));
        self
    }

    /// Appends a mention of everyone.
    pub fn at_all(mut self) -> Self {
        self.segments.push(Segment::at_all());
        self
    }

    /// Appends a reply reference.
    pub fn reply(mut self, message_id: impl ToString) -> Self {
        self.segments.push(Segment::reply(message_id));
        self
    }

    /// Appends a link share.
    pub fn share(
        mut self,
        url: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image: Option<String>,
    ) -> Self {
        self.segments.push(Segment::share(url, title, content, image));
        self
    }

    /// Appends a location.
    pub fn location(
        mut self,
        lat: f64,
        lon: f64,
        title: Option<String>,
        content: Option<String>,
    ) -> Self {
        self.segments.push(Segment::location(lat, lon, title, content));
        self
    }

    /// Appends a platform music share.
    pub fn music(mut self, platform: impl Into<String>, id: impl ToString) -> Self {
        self.segments.push(Segment::music(platform, id));
        self
    }

    /// Appends a custom music share.
    pub fn music_custom(
        mut self,
        url: impl Into<String>,
        audio: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image: Option<String>,
    ) -> Self {
        self.segments
            .push(Segment::music_custom(url, audio, title, content, image));
        self
    }

    /// Appends a poke.
    pub fn poke(mut self, poke_type: impl Into<String>, id: impl Into<String>) -> Self {
        self.segments.push(Segment::poke(poke_type, id));
        self
    }

    /// Appends a forward node referencing an existing message.
    pub fn node(mut self, message_id: impl ToString) -> Self {
        self.segments.push(Segment::node(message_id));
        self
    }

    /// Appends a custom forward node.
    pub fn node_custom(
        mut self,
        user_id: i64,
        nickname: impl Into<String>,
        content: impl Into<Message>,
    ) -> Self {
        self.segments
            .push(Segment::node_custom(user_id, nickname, content));
        self
    }

    /// Appends any segment.
    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Appends a segment in place.
    pub fn push(&mut self, segment: Segment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    /// Appends segments in place.
    pub fn extend(&mut self, segments: impl IntoIterator<Item = Segment>) -> &mut Self {
        self.segments.extend(segments);
        self
    }
}

// ============================================================================
// Conversion & Queries
// ============================================================================

impl Message {
    /// The segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// A copy of the segments.
    pub fn to_segments(&self) -> Vec<Segment> {
        self.segments.clone()
    }

    /// Consumes the message into its segments.
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Iterates over the segments.
    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the message has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The CQ-coded string form.
    pub fn to_cq_string(&self) -> String {
        self.segments.iter().map(Segment::to_cq_code).collect()
    }

    /// The `message` parameter in the given wire format.
    pub fn to_value(&self, format: MessageFormat) -> serde_json::Result<Value> {
        match format {
            MessageFormat::Array => serde_json::to_value(&self.segments),
            MessageFormat::String => Ok(Value::String(self.to_cq_string())),
        }
    }

    /// Concatenates the text segments, in order, ignoring everything else.
    pub fn extract_plain_text(&self) -> String {
        self.segments.iter().filter_map(Segment::as_text).collect()
    }

    /// Ids of mentioned users. A mention of everyone is not included.
    pub fn at_targets(&self) -> Vec<i64> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::At(data) => match data.target() {
                    Some(AtTarget::User(id)) => Some(id),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// Returns true if the message mentions everyone.
    pub fn has_at_all(&self) -> bool {
        self.segments
            .iter()
            .any(|seg| matches!(seg, Segment::At(data) if data.target() == Some(AtTarget::All)))
    }

    /// Returns true if the message mentions this user.
    pub fn mentions(&self, user_id: i64) -> bool {
        self.at_targets().contains(&user_id)
    }

    /// Image locations: the `url` when present, else the `file`.
    pub fn image_sources(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::Image(data) => Some(data.url.clone().unwrap_or_else(|| data.file.clone())),
                _ => None,
            })
            .collect()
    }

    /// The id of the replied message, if this is a reply.
    pub fn reply_to(&self) -> Option<&str> {
        self.segments.iter().find_map(|seg| match seg {
            Segment::Reply(data) => Some(data.id.as_str()),
            _ => None,
        })
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Segment::text(text).into()
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Segment::text(text).into()
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self::from_segments(iter)
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

// ============================================================================
// CQ String Parsing
// ============================================================================

const CQ_OPEN: &str = "[CQ:";

/// Parses a CQ-coded string into segments.
///
/// Text between codes becomes text segments (unescaped). A code of an
/// unknown kind, or one missing a required key, is kept as literal text. An
/// unterminated code is treated as text.
pub fn parse_cq_string(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(start) = rest.find(CQ_OPEN) else {
            push_text(&mut segments, rest);
            break;
        };
        push_text(&mut segments, &rest[..start]);

        let code = &rest[start..];
        let Some(end) = code.find(']') else {
            push_text(&mut segments, code);
            break;
        };

        let body = &code[CQ_OPEN.len()..end];
        match parse_cq_body(body) {
            Some(segment) => segments.push(segment),
            None => push_literal(&mut segments, &code[..=end]),
        }
        rest = &code[end + 1..];
    }

    segments
}

fn parse_cq_body(body: &str) -> Option<Segment> {
    let mut parts = body.split(',');
    let kind = parts.next()?.trim();
    let params: Vec<(String, String)> = parts
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), unescape_cq(value)))
        })
        .collect();
    Segment::from_cq_parts(kind, &params)
}

fn push_text(segments: &mut Vec<Segment>, raw: &str) {
    if !raw.is_empty() {
        push_literal(segments, &unescape_cq(raw));
    }
}

// adjacent text runs are merged
fn push_literal(segments: &mut Vec<Segment>, text: &str) {
    if let Some(Segment::Text(last)) = segments.last_mut() {
        last.text.push_str(text);
    } else {
        segments.push(Segment::text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::segment::TextData;

    #[test]
    fn test_builder_appends_in_order() {
        let msg = Message::new().text("hi ").at(10001).face(14).reply(7);
        let kinds: Vec<_> = msg.iter().map(Segment::segment_type).collect();
        assert_eq!(kinds, vec!["text", "at", "face", "reply"]);
    }

    #[test]
    fn test_empty_message_is_valid() {
        let msg = Message::new();
        assert!(msg.is_empty());
        assert_eq!(serde_json::to_string(&msg).unwrap(), "[]");
        assert_eq!(msg.extract_plain_text(), "");
    }

    #[test]
    fn test_extract_plain_text() {
        let msg = Message::from_segments(vec![Segment::text("a"), Segment::face(1), Segment::text("b")]);
        assert_eq!(msg.extract_plain_text(), "ab");
    }

    #[test]
    fn test_at_queries() {
        let msg = Message::new().at(10001).text(" hi").at_all();
        assert_eq!(msg.at_targets(), vec![10001]);
        assert!(msg.has_at_all());
        assert!(msg.mentions(10001));
        assert!(!msg.mentions(10002));
    }

    #[test]
    fn test_segments_round_trip() {
        let original = Message::new()
            .text("x")
            .at_named(5, "eve")
            .share("https://a.io", "A", Some("desc".into()), None)
            .location(31.2, 121.5, Some("here".into()), None)
            .music("163", 28949129)
            .music_custom("https://a.io", "https://a.io/a.mp3", "song", None, None)
            .node_custom(1, "n", "inner")
            .image("https://example.com/a.png", MediaOptions::default())
            .unwrap();

        let rebuilt = Message::from_segments(original.to_segments());
        assert_eq!(rebuilt, original);

        let json = serde_json::to_value(&original).unwrap();
        let decoded: Message = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_missing_local_image_fails() {
        let result = Message::new().image("/no/such/file.png", MediaOptions::default());
        assert!(matches!(
            result,
            Err(onecat_core::MessageError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_parse_cq_string() {
        let segments = parse_cq_string("Hello [CQ:face,id=178] World [CQ:at,qq=10001]");
        assert_eq!(segments.len(), 4);
        assert!(matches!(&segments[0], Segment::Text(TextData { text }) if text == "Hello "));
        assert!(matches!(&segments[1], Segment::Face(d) if d.id == "178"));
        assert!(matches!(&segments[2], Segment::Text(TextData { text }) if text == " World "));
        assert!(matches!(&segments[3], Segment::At(d) if d.qq == "10001"));
    }

    #[test]
    fn test_parse_unknown_and_unterminated() {
        let segments = parse_cq_string("a[CQ:mystery,x=1]b[CQ:face,id=1");
        assert_eq!(
            segments,
            vec![Segment::text("a[CQ:mystery,x=1]b[CQ:face,id=1")]
        );
    }

    #[test]
    fn test_cq_string_round_trip() {
        let msg = Message::new()
            .text("[1] & [2], ok")
            .image("https://example.com/a.png?x=1,2", MediaOptions::default())
            .unwrap()
            .at_all();
        let cq = msg.to_cq_string();
        assert_eq!(Message::from_cq_string(&cq), msg);
    }

    #[test]
    fn test_deserialize_both_formats() {
        let from_string: Message = serde_json::from_str(r#""hi [CQ:face,id=1]""#).unwrap();
        let from_array: Message = serde_json::from_str(
            r#"[{"type":"text","data":{"text":"hi "}},{"type":"face","data":{"id":"1"}}]"#,
        )
        .unwrap();
        assert_eq!(from_string, from_array);
    }

    #[test]
    fn test_gateway_extensions_keep_message() {
        let value = serde_json::json!([
            {"type": "reply", "data": {"id": 812}},
            {"type": "at", "data": {"qq": 10001, "name": "bot"}},
            {"type": "text", "data": {"text": " see "}},
            {"type": "mface", "data": {"emoji_id": "abc", "summary": "[cat]"}},
            {"type": "file", "data": {"file": "x.zip", "file_size": "12"}},
            "stray",
            {"type": "text", "data": {"text": "attached"}}
        ]);

        let msg = Message::from_value(&value).unwrap();
        assert_eq!(msg.len(), 6);
        assert_eq!(msg.extract_plain_text(), " see attached");
        assert_eq!(msg.at_targets(), vec![10001]);
        assert_eq!(msg.reply_to(), Some("812"));

        let kinds: Vec<_> = msg.iter().map(Segment::segment_type).collect();
        assert_eq!(kinds, vec!["reply", "at", "text", "mface", "file", "text"]);

        let decoded: Message = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_to_value_formats() {
        let msg = Message::new().text("a").face(2);
        assert_eq!(
            msg.to_value(MessageFormat::String).unwrap(),
            Value::String("a[CQ:face,id=2]".into())
        );
        assert!(msg.to_value(MessageFormat::Array).unwrap().is_array());
    }

    #[test]
    fn test_image_sources_prefer_url() {
        let msg: Message = serde_json::from_str(
            r#"[{"type":"image","data":{"file":"a.jpg","url":"https://x/a.jpg"}},
                {"type":"image","data":{"file":"b.jpg"}}]"#,
        )
        .unwrap();
        assert_eq!(msg.image_sources(), vec!["https://x/a.jpg", "b.jpg"]);
    }
}
