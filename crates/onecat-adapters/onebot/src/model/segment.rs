//! OneBot v11 message segments.
//!
//! A segment is one typed unit of a message: a run of text, an image, a
//! mention and so on. On the wire it is `{"type": ..., "data": {...}}` with
//! every data value a string; the only exception is the `content` of a
//! custom forward node, which is itself a message.
//!
//! # CQ Codes
//!
//! In the string message format every non-text segment is written inline as
//! `[CQ:type,key=value,...]`:
//!
//! ```text
//! hello [CQ:at,qq=10001] look: [CQ:image,file=https://example.com/a.png]
//! ```
//!
//! Implementations differ in the details: some send ids as JSON numbers, and
//! most add kinds of their own (`file`, `mface`, `markdown`, ...). Numbers are
//! accepted wherever a string id is expected, and a segment that matches no
//! known kind is kept as [`Segment::Unknown`].

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use onecat_core::MessageResult;

use super::media::{MediaOptions, MediaSource};
use super::message::Message;

// ============================================================================
// Segment
// ============================================================================

/// A OneBot v11 message segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text.
    Text(TextData),
    /// QQ face.
    Face(FaceData),
    /// Image.
    Image(ImageData),
    /// Voice record.
    Record(RecordData),
    /// Video.
    Video(VideoData),
    /// Mention of a user or of everyone.
    At(AtData),
    /// Rock-paper-scissors.
    Rps(EmptyData),
    /// Dice.
    Dice(EmptyData),
    /// Window shake.
    Shake(EmptyData),
    /// Poke.
    Poke(PokeData),
    /// Link share.
    Share(ShareData),
    /// Friend or group recommendation.
    Contact(ContactData),
    /// Location.
    Location(LocationData),
    /// Music share.
    Music(MusicData),
    /// Reply to a message.
    Reply(ReplyData),
    /// Reference to a merged forward message (receive only).
    Forward(ForwardData),
    /// Node of a merged forward message.
    Node(NodeData),
    /// XML card.
    Xml(RawData),
    /// JSON card.
    Json(RawData),
    /// Any segment the variants above do not decode, kept as received.
    #[serde(untagged)]
    Unknown(UnknownSegment),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Text(data) => f.write_str(&data.text),
            Segment::At(data) => match data.target() {
                Some(AtTarget::All) => f.write_str("@all"),
                _ => match &data.name {
                    Some(name) => write!(f, "@{name}"),
                    None => write!(f, "@{}", data.qq),
                },
            },
            Segment::Face(data) => write!(f, "[face:{}]", data.id),
            Segment::Image(data) => write!(f, "[image:{}]", data.file),
            Segment::Record(data) => write!(f, "[record:{}]", data.file),
            Segment::Video(data) => write!(f, "[video:{}]", data.file),
            Segment::Share(data) => write!(f, "[share:{}]", data.title),
            Segment::Location(data) => write!(f, "[location:{},{}]", data.lat, data.lon),
            Segment::Reply(data) => write!(f, "[reply:{}]", data.id),
            other => write!(f, "[{}]", other.segment_type()),
        }
    }
}

// ============================================================================
// Segment Builders
// ============================================================================

impl Segment {
    /// A text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// A QQ face. The id is not range checked.
    pub fn face(id: i32) -> Self {
        Segment::Face(FaceData { id: id.to_string() })
    }

    /// An image from any source.
    pub fn image(source: impl Into<MediaSource>, options: &MediaOptions) -> MessageResult<Self> {
        Ok(Segment::Image(ImageData {
            file: source.into().resolve()?,
            image_type: options.kind.clone(),
            url: options.url.clone(),
            cache: options.cache_flag(),
            proxy: options.proxy_flag(),
            timeout: options.timeout_value(),
        }))
    }

    /// A voice record from any source.
    pub fn record(
        source: impl Into<MediaSource>,
        magic: bool,
        options: &MediaOptions,
    ) -> MessageResult<Self> {
        Ok(Segment::Record(RecordData {
            file: source.into().resolve()?,
            magic: Some(if magic { "1" } else { "0" }.to_string()),
            url: None,
            cache: options.cache_flag(),
            proxy: options.proxy_flag(),
            timeout: options.timeout_value(),
        }))
    }

    /// A video from any source.
    pub fn video(source: impl Into<MediaSource>, options: &MediaOptions) -> MessageResult<Self> {
        Ok(Segment::Video(VideoData {
            file: source.into().resolve()?,
            url: None,
            cache: options.cache_flag(),
            proxy: options.proxy_flag(),
            timeout: options.timeout_value(),
        }))
    }

    /// A mention.
    pub fn at(target: impl Into<AtTarget>) -> Self {
        Segment::At(AtData {
            qq: target.into().to_string(),
            name: None,
        })
    }

    /// A mention carrying a display name, used when the user is not in the group.
    pub fn at_named(user_id: i64, name: impl Into<String>) -> Self {
        Segment::At(AtData {
            qq: user_id.to_string(),
            name: Some(name.into()),
        })
    }

    /// A mention of everyone.
    pub fn at_all() -> Self {
        Self::at(AtTarget::All)
    }

    /// Rock-paper-scissors.
    pub fn rps() -> Self {
        Segment::Rps(EmptyData {})
    }

    /// Dice.
    pub fn dice() -> Self {
        Segment::Dice(EmptyData {})
    }

    /// Window shake.
    pub fn shake() -> Self {
        Segment::Shake(EmptyData {})
    }

    /// A poke of the given type and id.
    pub fn poke(poke_type: impl Into<String>, id: impl Into<String>) -> Self {
        Segment::Poke(PokeData {
            poke_type: poke_type.into(),
            id: id.into(),
            name: None,
        })
    }

    /// A link share.
    pub fn share(
        url: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image: Option<String>,
    ) -> Self {
        Segment::Share(ShareData {
            url: url.into(),
            title: title.into(),
            content,
            image,
        })
    }

    /// A friend recommendation.
    pub fn contact_user(user_id: i64) -> Self {
        Segment::Contact(ContactData {
            contact_type: "qq".to_string(),
            id: user_id.to_string(),
        })
    }

    /// A group recommendation.
    pub fn contact_group(group_id: i64) -> Self {
        Segment::Contact(ContactData {
            contact_type: "group".to_string(),
            id: group_id.to_string(),
        })
    }

    /// A location.
    pub fn location(lat: f64, lon: f64, title: Option<String>, content: Option<String>) -> Self {
        Segment::Location(LocationData {
            lat: lat.to_string(),
            lon: lon.to_string(),
            title,
            content,
        })
    }

    /// A music share from a platform (`qq`, `163`, `xm`).
    pub fn music(platform: impl Into<String>, id: impl ToString) -> Self {
        Segment::Music(MusicData {
            music_type: platform.into(),
            id: Some(id.to_string()),
            ..MusicData::default()
        })
    }

    /// A custom music share.
    pub fn music_custom(
        url: impl Into<String>,
        audio: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image: Option<String>,
    ) -> Self {
        Segment::Music(MusicData {
            music_type: "custom".to_string(),
            id: None,
            url: Some(url.into()),
            audio: Some(audio.into()),
            title: Some(title.into()),
            content,
            image,
        })
    }

    /// A reply to a message.
    pub fn reply(message_id: impl ToString) -> Self {
        Segment::Reply(ReplyData {
            id: message_id.to_string(),
        })
    }

    /// A forward node referencing an existing message.
    pub fn node(message_id: impl ToString) -> Self {
        Segment::Node(NodeData {
            id: Some(message_id.to_string()),
            ..NodeData::default()
        })
    }

    /// A custom forward node.
    pub fn node_custom(user_id: i64, nickname: impl Into<String>, content: impl Into<Message>) -> Self {
        Segment::Node(NodeData {
            id: None,
            user_id: Some(user_id.to_string()),
            nickname: Some(nickname.into()),
            content: Some(content.into()),
        })
    }

    /// An XML card.
    pub fn xml(data: impl Into<String>) -> Self {
        Segment::Xml(RawData { data: data.into() })
    }

    /// A JSON card.
    pub fn json(data: impl Into<String>) -> Self {
        Segment::Json(RawData { data: data.into() })
    }
}

// ============================================================================
// Segment Queries
// ============================================================================

impl Segment {
    /// The wire name of this segment's type.
    pub fn segment_type(&self) -> &str {
        match self {
            Segment::Text(_) => "text",
            Segment::Face(_) => "face",
            Segment::Image(_) => "image",
            Segment::Record(_) => "record",
            Segment::Video(_) => "video",
            Segment::At(_) => "at",
            Segment::Rps(_) => "rps",
            Segment::Dice(_) => "dice",
            Segment::Shake(_) => "shake",
            Segment::Poke(_) => "poke",
            Segment::Share(_) => "share",
            Segment::Contact(_) => "contact",
            Segment::Location(_) => "location",
            Segment::Music(_) => "music",
            Segment::Reply(_) => "reply",
            Segment::Forward(_) => "forward",
            Segment::Node(_) => "node",
            Segment::Xml(_) => "xml",
            Segment::Json(_) => "json",
            Segment::Unknown(raw) => &raw.kind,
        }
    }

    /// The text of a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(data) => Some(&data.text),
            _ => None,
        }
    }

    /// Returns true for text segments.
    pub fn is_text(&self) -> bool {
        matches!(self, Segment::Text(_))
    }
}

// ============================================================================
// Segment Data Types
// ============================================================================

/// Text segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    /// The text.
    pub text: String,
}

/// Face segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    /// Face id.
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
}

/// Image segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// File name, `file://` URI, URL or `base64://` payload.
    pub file: String,
    /// `"flash"` for a flash image.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    /// Network URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `"1"` to allow the download cache.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache: Option<String>,
    /// `"1"` to download through the proxy.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy: Option<String>,
    /// Download timeout in seconds.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<String>,
}

/// Record segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    /// File name, `file://` URI, URL or `base64://` payload.
    pub file: String,
    /// `"1"` for a voice-changed record.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub magic: Option<String>,
    /// Network URL (receive only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Cache flag.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache: Option<String>,
    /// Proxy flag.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy: Option<String>,
    /// Download timeout in seconds.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<String>,
}

/// Video segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoData {
    /// File name, `file://` URI, URL or `base64://` payload.
    pub file: String,
    /// Network URL (receive only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Cache flag.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cache: Option<String>,
    /// Proxy flag.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy: Option<String>,
    /// Download timeout in seconds.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<String>,
}

/// Mention segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtData {
    /// User id, or `"all"`.
    #[serde(deserialize_with = "lenient_string")]
    pub qq: String,
    /// Display name for users outside the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AtData {
    /// The parsed target. `None` if `qq` is neither a number nor `"all"`.
    pub fn target(&self) -> Option<AtTarget> {
        AtTarget::parse(&self.qq)
    }
}

/// Who a mention points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtTarget {
    /// One user.
    User(i64),
    /// Everyone in the group.
    All,
}

impl AtTarget {
    /// Parses `"all"` or a numeric user id.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "all" {
            Some(Self::All)
        } else {
            s.trim().parse().ok().map(Self::User)
        }
    }
}

impl std::fmt::Display for AtTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::All => f.write_str("all"),
        }
    }
}

impl From<i64> for AtTarget {
    fn from(id: i64) -> Self {
        Self::User(id)
    }
}

/// Data of segments without fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyData {}

/// Poke segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokeData {
    /// Poke type.
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub poke_type: String,
    /// Poke id.
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    /// Poke name (receive only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Share segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareData {
    /// Target URL.
    pub url: String,
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Preview image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Contact segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactData {
    /// `"qq"` or `"group"`.
    #[serde(rename = "type")]
    pub contact_type: String,
    /// User or group id.
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
}

/// Location segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    /// Latitude.
    #[serde(deserialize_with = "lenient_string")]
    pub lat: String,
    /// Longitude.
    #[serde(deserialize_with = "lenient_string")]
    pub lon: String,
    /// Title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Music segment data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicData {
    /// `"qq"`, `"163"`, `"xm"` or `"custom"`.
    #[serde(rename = "type")]
    pub music_type: String,
    /// Song id on the platform.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Jump URL (custom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Audio URL (custom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Title (custom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description (custom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Cover image URL (custom).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Reply segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// Id of the replied message.
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
}

/// Forward reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardData {
    /// Forward id, resolved with `get_forward_msg`.
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
}

/// Forward node data.
///
/// Either `id` (an existing message) or `user_id`, `nickname` and `content`
/// (a custom node) are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Existing message id.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Sender shown on a custom node.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    /// Nickname shown on a custom node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Body of a custom node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Message>,
}

/// XML and JSON card data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    /// The card source.
    pub data: String,
}

/// A segment of a kind this crate does not model, such as NapCat's `file`
/// or `mface`. A known kind whose data does not decode lands here as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownSegment {
    /// The wire `type`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The `data` object as received.
    #[serde(default, deserialize_with = "lenient_data")]
    pub data: Map<String, Value>,
}

// Gateways disagree on whether ids are strings or numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or a number, found {other}"
        ))),
    }
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => lenient_string(value).map(Some).map_err(D::Error::custom),
    }
}

fn lenient_data<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn data_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// CQ Codes
// ============================================================================

/// Accumulates `key=value` pairs of one CQ code.
struct CqCode {
    out: String,
}

impl CqCode {
    fn new(kind: &str) -> Self {
        Self {
            out: format!("[CQ:{kind}"),
        }
    }

    fn param(mut self, key: &str, value: &str) -> Self {
        self.out.push(',');
        self.out.push_str(key);
        self.out.push('=');
        self.out.push_str(&escape_cq_value(value));
        self
    }

    fn opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    fn finish(mut self) -> String {
        self.out.push(']');
        self.out
    }
}

impl Segment {
    /// Writes this segment in CQ code form. Text is escaped, not wrapped.
    pub fn to_cq_code(&self) -> String {
        match self {
            Segment::Text(data) => escape_cq_text(&data.text),
            Segment::Face(data) => CqCode::new("face").param("id", &data.id).finish(),
            Segment::Image(data) => CqCode::new("image")
                .param("file", &data.file)
                .opt("type", data.image_type.as_deref())
                .opt("url", data.url.as_deref())
                .opt("cache", data.cache.as_deref())
                .opt("proxy", data.proxy.as_deref())
                .opt("timeout", data.timeout.as_deref())
                .finish(),
            Segment::Record(data) => CqCode::new("record")
                .param("file", &data.file)
                .opt("magic", data.magic.as_deref())
                .opt("url", data.url.as_deref())
                .opt("cache", data.cache.as_deref())
                .opt("proxy", data.proxy.as_deref())
                .opt("timeout", data.timeout.as_deref())
                .finish(),
            Segment::Video(data) => CqCode::new("video")
                .param("file", &data.file)
                .opt("url", data.url.as_deref())
                .opt("cache", data.cache.as_deref())
                .opt("proxy", data.proxy.as_deref())
                .opt("timeout", data.timeout.as_deref())
                .finish(),
            Segment::At(data) => CqCode::new("at")
                .param("qq", &data.qq)
                .opt("name", data.name.as_deref())
                .finish(),
            Segment::Rps(_) | Segment::Dice(_) | Segment::Shake(_) => {
                CqCode::new(self.segment_type()).finish()
            }
            Segment::Poke(data) => CqCode::new("poke")
                .param("type", &data.poke_type)
                .param("id", &data.id)
                .opt("name", data.name.as_deref())
                .finish(),
            Segment::Share(data) => CqCode::new("share")
                .param("url", &data.url)
                .param("title", &data.title)
                .opt("content", data.content.as_deref())
                .opt("image", data.image.as_deref())
                .finish(),
            Segment::Contact(data) => CqCode::new("contact")
                .param("type", &data.contact_type)
                .param("id", &data.id)
                .finish(),
            Segment::Location(data) => CqCode::new("location")
                .param("lat", &data.lat)
                .param("lon", &data.lon)
                .opt("title", data.title.as_deref())
                .opt("content", data.content.as_deref())
                .finish(),
            Segment::Music(data) => CqCode::new("music")
                .param("type", &data.music_type)
                .opt("id", data.id.as_deref())
                .opt("url", data.url.as_deref())
                .opt("audio", data.audio.as_deref())
                .opt("title", data.title.as_deref())
                .opt("content", data.content.as_deref())
                .opt("image", data.image.as_deref())
                .finish(),
            Segment::Reply(data) => CqCode::new("reply").param("id", &data.id).finish(),
            Segment::Forward(data) => CqCode::new("forward").param("id", &data.id).finish(),
            Segment::Node(data) => {
                let content = data.content.as_ref().map(Message::to_cq_string);
                CqCode::new("node")
                    .opt("id", data.id.as_deref())
                    .opt("user_id", data.user_id.as_deref())
                    .opt("nickname", data.nickname.as_deref())
                    .opt("content", content.as_deref())
                    .finish()
            }
            Segment::Xml(data) => CqCode::new("xml").param("data", &data.data).finish(),
            Segment::Json(data) => CqCode::new("json").param("data", &data.data).finish(),
            Segment::Unknown(raw) => raw
                .data
                .iter()
                .fold(CqCode::new(&raw.kind), |code, (key, value)| {
                    code.param(key, &data_value_text(value))
                })
                .finish(),
        }
    }

    /// Builds a segment from a parsed CQ code. Values are already unescaped.
    ///
    /// Returns `None` for unknown kinds or when a required key is missing.
    pub fn from_cq_parts(kind: &str, params: &[(String, String)]) -> Option<Self> {
        let get = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        let segment = match kind {
            "face" => Segment::Face(FaceData { id: get("id")? }),
            "image" => Segment::Image(ImageData {
                file: get("file")?,
                image_type: get("type"),
                url: get("url"),
                cache: get("cache"),
                proxy: get("proxy"),
                timeout: get("timeout"),
            }),
            "record" => Segment::Record(RecordData {
                file: get("file")?,
                magic: get("magic"),
                url: get("url"),
                cache: get("cache"),
                proxy: get("proxy"),
                timeout: get("timeout"),
            }),
            "video" => Segment::Video(VideoData {
                file: get("file")?,
                url: get("url"),
                cache: get("cache"),
                proxy: get("proxy"),
                timeout: get("timeout"),
            }),
            "at" => Segment::At(AtData {
                qq: get("qq")?,
                name: get("name"),
            }),
            "rps" => Segment::rps(),
            "dice" => Segment::dice(),
            "shake" => Segment::shake(),
            "poke" => Segment::Poke(PokeData {
                poke_type: get("type")?,
                id: get("id")?,
                name: get("name"),
            }),
            "share" => Segment::Share(ShareData {
                url: get("url")?,
                title: get("title")?,
                content: get("content"),
                image: get("image"),
            }),
            "contact" => Segment::Contact(ContactData {
                contact_type: get("type")?,
                id: get("id")?,
            }),
            "location" => Segment::Location(LocationData {
                lat: get("lat")?,
                lon: get("lon")?,
                title: get("title"),
                content: get("content"),
            }),
            "music" => Segment::Music(MusicData {
                music_type: get("type")?,
                id: get("id"),
                url: get("url"),
                audio: get("audio"),
                title: get("title"),
                content: get("content"),
                image: get("image"),
            }),
            "reply" => Segment::Reply(ReplyData { id: get("id")? }),
            "forward" => Segment::Forward(ForwardData { id: get("id")? }),
            "node" => Segment::Node(NodeData {
                id: get("id"),
                user_id: get("user_id"),
                nickname: get("nickname"),
                content: get("content").map(|c| Message::from_cq_string(&c)),
            }),
            "xml" => Segment::Xml(RawData { data: get("data")? }),
            "json" => Segment::Json(RawData { data: get("data")? }),
            _ => return None,
        };
        Some(segment)
    }
}

/// Escapes text for the string message format: `&`, `[` and `]`.
pub fn escape_cq_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '[' => out.push_str("&#91;"),
            ']' => out.push_str("&#93;"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes a CQ parameter value: the text escapes plus `,`.
pub fn escape_cq_value(value: &str) -> String {
    escape_cq_text(value).replace(',', "&#44;")
}

/// Reverses both escapes. `&amp;` is handled last so `&amp;#91;` stays `&#91;`.
pub fn unescape_cq(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_string(&Segment::at(10001)).unwrap();
        assert_eq!(json, r#"{"type":"at","data":{"qq":"10001"}}"#);

        let json = serde_json::to_string(&Segment::face(178)).unwrap();
        assert_eq!(json, r#"{"type":"face","data":{"id":"178"}}"#);

        let json = serde_json::to_string(&Segment::dice()).unwrap();
        assert_eq!(json, r#"{"type":"dice","data":{}}"#);
    }

    #[test]
    fn test_receive_shapes() {
        let segment: Segment = serde_json::from_str(
            r#"{"type":"image","data":{"file":"a.jpg","url":"https://example.com/a.jpg","sub_type":0}}"#,
        )
        .unwrap();
        assert!(matches!(segment, Segment::Image(ImageData { ref url, .. }) if url.is_some()));

        let segment: Segment = serde_json::from_str(r#"{"type":"at","data":{"qq":"all"}}"#).unwrap();
        assert!(matches!(segment, Segment::At(ref d) if d.target() == Some(AtTarget::All)));
    }

    #[test]
    fn test_numeric_ids_accepted() {
        let segment: Segment = serde_json::from_str(r#"{"type":"at","data":{"qq":10001}}"#).unwrap();
        assert_eq!(segment, Segment::at(10001));

        let segment: Segment = serde_json::from_str(r#"{"type":"reply","data":{"id":-2147}}"#).unwrap();
        assert_eq!(segment, Segment::reply(-2147));

        let segment: Segment = serde_json::from_str(r#"{"type":"face","data":{"id":178}}"#).unwrap();
        assert_eq!(segment, Segment::face(178));

        let segment: Segment = serde_json::from_str(
            r#"{"type":"image","data":{"file":"a.jpg","cache":1,"timeout":null}}"#,
        )
        .unwrap();
        let Segment::Image(data) = segment else {
            panic!("expected image");
        };
        assert_eq!(data.cache.as_deref(), Some("1"));
        assert_eq!(data.timeout, None);
    }

    #[test]
    fn test_unknown_kind_kept_raw() {
        let value = serde_json::json!({
            "type": "file",
            "data": {"file": "report.pdf", "file_size": 2048}
        });
        let segment: Segment = serde_json::from_value(value.clone()).unwrap();

        let Segment::Unknown(raw) = &segment else {
            panic!("expected unknown segment");
        };
        assert_eq!(raw.kind, "file");
        assert_eq!(raw.data["file_size"], 2048);
        assert_eq!(segment.segment_type(), "file");
        assert_eq!(segment.to_string(), "[file]");
        assert_eq!(
            segment.to_cq_code(),
            "[CQ:file,file=report.pdf,file_size=2048]"
        );
        assert_eq!(serde_json::to_value(&segment).unwrap(), value);

        let segment: Segment = serde_json::from_str(r#"{"type":"longmsg","data":null}"#).unwrap();
        assert!(matches!(segment, Segment::Unknown(ref raw) if raw.data.is_empty()));
    }

    #[test]
    fn test_node_content_is_nested_message() {
        let node = Segment::node_custom(10001, "alice", Message::new().text("hi").face(1));
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["data"]["content"][0]["type"], "text");
        assert_eq!(value["data"]["content"][1]["data"]["id"], "1");

        let back: Segment = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_at_target_parse() {
        assert_eq!(AtTarget::parse("all"), Some(AtTarget::All));
        assert_eq!(AtTarget::parse("10001"), Some(AtTarget::User(10001)));
        assert_eq!(AtTarget::parse("someone"), None);
        assert_eq!(AtTarget::All.to_string(), "all");
    }

    #[test]
    fn test_media_options_forwarded() {
        let options = MediaOptions::flash().with_timeout(5).with_proxy(false);
        let segment = Segment::image("https://example.com/a.png", &options).unwrap();
        let Segment::Image(data) = segment else {
            panic!("expected image");
        };
        assert_eq!(data.image_type.as_deref(), Some("flash"));
        assert_eq!(data.cache.as_deref(), Some("1"));
        assert_eq!(data.proxy.as_deref(), Some("0"));
        assert_eq!(data.timeout.as_deref(), Some("5"));
    }

    #[test]
    fn test_cq_code_output() {
        assert_eq!(Segment::text("a[b]").to_cq_code(), "a&#91;b&#93;");
        assert_eq!(Segment::at_all().to_cq_code(), "[CQ:at,qq=all]");
        assert_eq!(Segment::at_named(1, "a,b").to_cq_code(), "[CQ:at,qq=1,name=a&#44;b]");
        assert_eq!(
            Segment::share("https://x.io/?a=1,2", "t", None, None).to_cq_code(),
            "[CQ:share,url=https://x.io/?a=1&#44;2,title=t]"
        );
        assert_eq!(Segment::shake().to_cq_code(), "[CQ:shake]");
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_cq_text("A & [B]"), "A &amp; &#91;B&#93;");
        assert_eq!(escape_cq_value("x,y"), "x&#44;y");
        assert_eq!(unescape_cq("&amp;#91;"), "&#91;");
        assert_eq!(unescape_cq(&escape_cq_value("[a],&b")), "[a],&b");
    }

    #[test]
    fn test_display() {
        assert_eq!(Segment::at(5).to_string(), "@5");
        assert_eq!(Segment::at_named(5, "bob").to_string(), "@bob");
        assert_eq!(Segment::dice().to_string(), "[dice]");
    }
}
