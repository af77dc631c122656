//! Convenience actions and message inspection.
//!
//! Every sender builds a [`Message`], encodes it in the binding's message
//! format and calls the matching action. Replies are returned raw; their
//! `status` and `retcode` are for the caller to check.

use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use onecat_core::ApiResult;

use crate::client::OneBotClient;
use crate::model::event::id_field;
use crate::model::{
    Action, InboundEvent, MediaOptions, MediaSource, Message, MessageTarget, Segment,
};

/// Default `set_group_ban` duration, in seconds.
pub const DEFAULT_BAN_SECONDS: u64 = 30 * 60;

fn params(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<Map<String, Value>>(),
    )
}

impl OneBotClient {
    fn encode(&self, message: &Message) -> ApiResult<Value> {
        Ok(message.to_value(self.message_format())?)
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Sends a private message.
    pub async fn send_private_msg(&self, user_id: i64, message: impl Into<Message>) -> ApiResult<Value> {
        let message = self.encode(&message.into())?;
        self.call_action(
            Action::SendPrivateMsg,
            params([
                ("user_id", json!(user_id)),
                ("message", message),
                ("auto_escape", json!(false)),
            ]),
        )
        .await
    }

    /// Sends a group message.
    pub async fn send_group_msg(&self, group_id: i64, message: impl Into<Message>) -> ApiResult<Value> {
        let message = self.encode(&message.into())?;
        self.call_action(
            Action::SendGroupMsg,
            params([
                ("group_id", json!(group_id)),
                ("message", message),
                ("auto_escape", json!(false)),
            ]),
        )
        .await
    }

    /// Sends a message through the generic `send_msg` action.
    pub async fn send_msg(&self, target: MessageTarget, message: impl Into<Message>) -> ApiResult<Value> {
        let message = self.encode(&message.into())?;
        let (id_key, id) = target.id_param();
        self.call_action(
            Action::SendMsg,
            params([
                ("message_type", json!(target.message_type())),
                (id_key, json!(id)),
                ("message", message),
                ("auto_escape", json!(false)),
            ]),
        )
        .await
    }

    /// Sends plain text.
    pub async fn send_text(&self, target: MessageTarget, text: impl Into<String>) -> ApiResult<Value> {
        self.send_msg(target, Message::new().text(text)).await
    }

    /// Sends one image.
    pub async fn send_image(
        &self,
        target: MessageTarget,
        source: impl Into<MediaSource>,
        options: MediaOptions,
    ) -> ApiResult<Value> {
        let message = Message::new().image(source, options)?;
        self.send_msg(target, message).await
    }

    /// Sends one voice record.
    pub async fn send_voice(
        &self,
        target: MessageTarget,
        source: impl Into<MediaSource>,
        magic: bool,
        options: MediaOptions,
    ) -> ApiResult<Value> {
        let message = Message::new().record(source, magic, options)?;
        self.send_msg(target, message).await
    }

    /// Sends one video.
    pub async fn send_video(
        &self,
        target: MessageTarget,
        source: impl Into<MediaSource>,
        options: MediaOptions,
    ) -> ApiResult<Value> {
        let message = Message::new().video(source, options)?;
        self.send_msg(target, message).await
    }

    /// Mentions a user in a group, followed by `text` after a space.
    /// An empty `text` sends the mention alone.
    pub async fn send_at_message(
        &self,
        group_id: i64,
        user_id: i64,
        text: &str,
        name: Option<&str>,
    ) -> ApiResult<Value> {
        let mut message = match name {
            Some(name) => Message::new().at_named(user_id, name),
            None => Message::new().at(user_id),
        };
        if !text.is_empty() {
            message = message.text(format!(" {text}"));
        }
        self.send_group_msg(group_id, message).await
    }

    /// Replies to a message with text.
    pub async fn send_reply(
        &self,
        target: MessageTarget,
        message_id: impl ToString,
        text: impl Into<String>,
    ) -> ApiResult<Value> {
        self.send_msg(target, Message::new().reply(message_id).text(text))
            .await
    }

    /// Sends a link share.
    pub async fn send_share(
        &self,
        target: MessageTarget,
        url: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image: Option<String>,
    ) -> ApiResult<Value> {
        self.send_msg(target, Message::new().share(url, title, content, image))
            .await
    }

    /// Sends a location.
    pub async fn send_location(
        &self,
        target: MessageTarget,
        lat: f64,
        lon: f64,
        title: Option<String>,
        content: Option<String>,
    ) -> ApiResult<Value> {
        self.send_msg(target, Message::new().location(lat, lon, title, content))
            .await
    }

    /// Sends a platform music share (`qq`, `163`, `xm`).
    pub async fn send_music(
        &self,
        target: MessageTarget,
        platform: impl Into<String>,
        music_id: impl ToString,
    ) -> ApiResult<Value> {
        self.send_msg(target, Message::new().music(platform, music_id))
            .await
    }

    /// Sends a custom music share.
    pub async fn send_custom_music(
        &self,
        target: MessageTarget,
        url: impl Into<String>,
        audio: impl Into<String>,
        title: impl Into<String>,
        content: Option<String>,
        image: Option<String>,
    ) -> ApiResult<Value> {
        let message = Message::new().music_custom(url, audio, title, content, image);
        self.send_msg(target, message).await
    }

    /// Sends one QQ face.
    pub async fn send_face(&self, target: MessageTarget, face_id: i32) -> ApiResult<Value> {
        self.send_msg(target, Message::new().face(face_id)).await
    }

    /// Pokes `user_id`: `friend_poke` in private, `group_poke` in a group.
    pub async fn send_poke(&self, target: MessageTarget, user_id: i64) -> ApiResult<Value> {
        match target {
            MessageTarget::Private(_) => {
                self.call_action(Action::FriendPoke, params([("user_id", json!(user_id))]))
                    .await
            }
            MessageTarget::Group(group_id) => {
                self.call_action(
                    Action::GroupPoke,
                    params([("group_id", json!(group_id)), ("user_id", json!(user_id))]),
                )
                .await
            }
        }
    }

    // =========================================================================
    // Forward Messages
    // =========================================================================

    /// Builds custom forward nodes from `(user_id, nickname, content)`.
    pub fn create_forward_nodes<I, M>(&self, messages: I) -> Vec<Segment>
    where
        I: IntoIterator<Item = (i64, String, M)>,
        M: Into<Message>,
    {
        messages
            .into_iter()
            .map(|(user_id, nickname, content)| Segment::node_custom(user_id, nickname, content))
            .collect()
    }

    /// Sends a merged forward message built from nodes.
    pub async fn send_forward_msg(&self, target: MessageTarget, nodes: &[Segment]) -> ApiResult<Value> {
        let messages = serde_json::to_value(nodes)?;
        let (action, id_key, id) = match target {
            MessageTarget::Private(id) => (Action::SendPrivateForwardMsg, "user_id", id),
            MessageTarget::Group(id) => (Action::SendGroupForwardMsg, "group_id", id),
        };
        self.call_action(action, params([(id_key, json!(id)), ("messages", messages)]))
            .await
    }

    // =========================================================================
    // Messages and Groups
    // =========================================================================

    /// Recalls a message.
    pub async fn recall_message(&self, message_id: i64) -> ApiResult<Value> {
        self.call_action(Action::DeleteMsg, params([("message_id", json!(message_id))]))
            .await
    }

    /// Fetches a message.
    pub async fn get_message(&self, message_id: i64) -> ApiResult<Value> {
        self.call_action(Action::GetMsg, params([("message_id", json!(message_id))]))
            .await
    }

    /// Removes a member from a group.
    pub async fn set_group_kick(
        &self,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> ApiResult<Value> {
        self.call_action(
            Action::SetGroupKick,
            params([
                ("group_id", json!(group_id)),
                ("user_id", json!(user_id)),
                ("reject_add_request", json!(reject_add_request)),
            ]),
        )
        .await
    }

    /// Mutes a member for `duration` seconds; `None` uses
    /// [`DEFAULT_BAN_SECONDS`] and `Some(0)` lifts the mute.
    pub async fn set_group_ban(
        &self,
        group_id: i64,
        user_id: i64,
        duration: Option<u64>,
    ) -> ApiResult<Value> {
        self.call_action(
            Action::SetGroupBan,
            params([
                ("group_id", json!(group_id)),
                ("user_id", json!(user_id)),
                ("duration", json!(duration.unwrap_or(DEFAULT_BAN_SECONDS))),
            ]),
        )
        .await
    }

    /// Mutes or unmutes the whole group.
    pub async fn set_group_whole_ban(&self, group_id: i64, enable: bool) -> ApiResult<Value> {
        self.call_action(
            Action::SetGroupWholeBan,
            params([("group_id", json!(group_id)), ("enable", json!(enable))]),
        )
        .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The bot's own account.
    pub async fn get_login_info(&self) -> ApiResult<Value> {
        self.call_action(Action::GetLoginInfo, json!({})).await
    }

    /// The friend list.
    pub async fn get_friend_list(&self) -> ApiResult<Value> {
        self.call_action(Action::GetFriendList, json!({})).await
    }

    /// The group list.
    pub async fn get_group_list(&self) -> ApiResult<Value> {
        self.call_action(Action::GetGroupList, json!({})).await
    }

    /// Details of one group.
    pub async fn get_group_info(&self, group_id: i64, no_cache: bool) -> ApiResult<Value> {
        self.call_action(
            Action::GetGroupInfo,
            params([("group_id", json!(group_id)), ("no_cache", json!(no_cache))]),
        )
        .await
    }

    /// Members of one group.
    pub async fn get_group_member_list(&self, group_id: i64) -> ApiResult<Value> {
        self.call_action(Action::GetGroupMemberList, params([("group_id", json!(group_id))]))
            .await
    }

    /// Details of one group member.
    pub async fn get_group_member_info(
        &self,
        group_id: i64,
        user_id: i64,
        no_cache: bool,
    ) -> ApiResult<Value> {
        self.call_action(
            Action::GetGroupMemberInfo,
            params([
                ("group_id", json!(group_id)),
                ("user_id", json!(user_id)),
                ("no_cache", json!(no_cache)),
            ]),
        )
        .await
    }

    /// Details of any account.
    pub async fn get_stranger_info(&self, user_id: i64, no_cache: bool) -> ApiResult<Value> {
        self.call_action(
            Action::GetStrangerInfo,
            params([("user_id", json!(user_id)), ("no_cache", json!(no_cache))]),
        )
        .await
    }

    /// Gateway status.
    pub async fn get_status(&self) -> ApiResult<Value> {
        self.call_action(Action::GetStatus, json!({})).await
    }

    // =========================================================================
    // Self Identification
    // =========================================================================

    /// Asks the gateway for the bot's account id. Not cached; `None` when
    /// the call fails or the reply carries no `user_id`.
    pub async fn get_self_id(&self) -> Option<i64> {
        match self.get_login_info().await {
            Ok(reply) => {
                let id = reply.get("data").and_then(|data| id_field(data, "user_id"));
                if id.is_none() {
                    warn!(name = %self.name(), "Login info carries no user_id");
                }
                id
            }
            Err(e) => {
                error!(name = %self.name(), error = %e, "Failed to fetch login info");
                None
            }
        }
    }

    /// Sets the id used when the gateway cannot tell us who we are.
    pub fn set_default_self_id(&self, user_id: i64) {
        *self.inner.default_self_id.write() = Some(user_id);
    }

    /// The fallback id, if any.
    pub fn default_self_id(&self) -> Option<i64> {
        *self.inner.default_self_id.read()
    }

    /// Returns true if the event's message mentions the bot.
    ///
    /// The bot's id comes from the event's `self_id`, then the gateway, then
    /// the configured default. Without any of them this is false.
    pub async fn is_at_me(&self, event: &InboundEvent) -> bool {
        let self_id = match event.self_id() {
            Some(id) => Some(id),
            None => match self.get_self_id().await {
                Some(id) => Some(id),
                None => self.default_self_id(),
            },
        };
        let Some(self_id) = self_id else {
            warn!(name = %self.name(), "Bot account unknown, cannot detect mentions");
            return false;
        };
        event
            .message()
            .is_some_and(|message| message.mentions(self_id))
    }
}

// =============================================================================
// Inspection
// =============================================================================

/// Decodes a `message` field given as a CQ string or a segment array.
/// Array elements that are not segments are skipped; any other value yields
/// an empty message.
pub fn parse_message(value: &Value) -> Message {
    Message::from_value(value).unwrap_or_else(|| {
        debug!(message = %value, "Message field is neither a string nor an array");
        Message::default()
    })
}

/// The plain text of a `message` field.
pub fn get_message_text(value: &Value) -> String {
    parse_message(value).extract_plain_text()
}

/// The image references of a `message` field.
pub fn get_message_images(value: &Value) -> Vec<String> {
    parse_message(value).image_sources()
}

/// The mentioned user ids of a `message` field, excluding `@all`.
pub fn get_at_targets(value: &Value) -> Vec<i64> {
    parse_message(value).at_targets()
}

/// Returns true if a `message` field mentions everyone.
pub fn has_at_all(value: &Value) -> bool {
    parse_message(value).has_at_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::listener::WsConnector;
    use async_trait::async_trait;
    use onecat_core::{
        ApiError, MessageError, MessageFormat, TransportResult, WsClientConfig, WsConnection,
    };
    use onecat_transport::{Binding, WsClientBinding};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    struct Scripted(Mutex<Option<WsConnection>>);

    #[async_trait]
    impl WsConnector for Scripted {
        fn name(&self) -> &str {
            "gateway"
        }

        async fn connect(&self) -> TransportResult<WsConnection> {
            self.0
                .lock()
                .take()
                .ok_or_else(|| onecat_core::TransportError::connection("ws://gateway", "refused"))
        }
    }

    /// Starts a client against an in-memory gateway that answers every
    /// action with `respond(request)` and records the requests.
    async fn gateway(
        format: MessageFormat,
        respond: fn(&Value) -> Value,
    ) -> (OneBotClient, Arc<Mutex<Vec<Value>>>) {
        let mut config = WsClientConfig::new("ws");
        config.message_format = format;
        let client = OneBotClient::new(
            Binding::WsClient(WsClientBinding::new(config)),
            ClientOptions::default(),
        );

        let (conn, mut peer) = WsConnection::pair(16);
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        tokio::spawn({
            let seen = seen.clone();
            async move {
                while let Some(request) = peer.next_json().await {
                    seen.lock().push(request.clone());
                    let reply = json!({
                        "status": "ok",
                        "retcode": 0,
                        "data": respond(&request),
                        "echo": request["echo"],
                    });
                    peer.push_json(&reply).await;
                }
            }
        });

        client
            .start_with_connector(Arc::new(Scripted(Mutex::new(Some(conn)))))
            .await
            .unwrap();
        client
            .wait_for_connected(Duration::from_secs(5))
            .await
            .unwrap();
        (client, seen)
    }

    fn null(_: &Value) -> Value {
        Value::Null
    }

    fn login(_: &Value) -> Value {
        json!({"user_id": 10001, "nickname": "bot"})
    }

    fn last(seen: &Arc<Mutex<Vec<Value>>>) -> Value {
        seen.lock().last().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_send_private_msg_params() {
        let (client, seen) = gateway(MessageFormat::Array, null).await;
        let reply = client.send_private_msg(5, "hello").await.unwrap();
        assert_eq!(reply["status"], "ok");

        let request = last(&seen);
        assert_eq!(request["action"], "send_private_msg");
        assert_eq!(
            request["params"],
            json!({
                "user_id": 5,
                "message": [{"type": "text", "data": {"text": "hello"}}],
                "auto_escape": false
            })
        );
        client.stop().await;
    }

    #[tokio::test]
    async fn test_string_format_sends_cq_text() {
        let (client, seen) = gateway(MessageFormat::String, null).await;
        client
            .send_at_message(7, 10001, "hi", None)
            .await
            .unwrap();

        let request = last(&seen);
        assert_eq!(request["action"], "send_group_msg");
        assert_eq!(request["params"]["message"], "[CQ:at,qq=10001] hi");
        client.stop().await;
    }

    #[tokio::test]
    async fn test_send_msg_targets() {
        let (client, seen) = gateway(MessageFormat::Array, null).await;

        client.send_text(MessageTarget::Group(9), "x").await.unwrap();
        let params = last(&seen)["params"].clone();
        assert_eq!(params["message_type"], "group");
        assert_eq!(params["group_id"], 9);
        assert!(params.get("user_id").is_none());

        client
            .send_reply(MessageTarget::Private(3), 55, "ok")
            .await
            .unwrap();
        let params = last(&seen)["params"].clone();
        assert_eq!(params["message_type"], "private");
        assert_eq!(params["user_id"], 3);
        assert_eq!(params["message"][0], json!({"type": "reply", "data": {"id": "55"}}));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_poke_by_target() {
        let (client, seen) = gateway(MessageFormat::Array, null).await;

        client.send_poke(MessageTarget::Private(1), 2).await.unwrap();
        let request = last(&seen);
        assert_eq!(request["action"], "friend_poke");
        assert_eq!(request["params"], json!({"user_id": 2}));

        client.send_poke(MessageTarget::Group(8), 2).await.unwrap();
        let request = last(&seen);
        assert_eq!(request["action"], "group_poke");
        assert_eq!(request["params"], json!({"group_id": 8, "user_id": 2}));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_group_admin_defaults() {
        let (client, seen) = gateway(MessageFormat::Array, null).await;

        client.set_group_ban(1, 2, None).await.unwrap();
        assert_eq!(last(&seen)["params"]["duration"], 1800);

        client.set_group_kick(1, 2, false).await.unwrap();
        assert_eq!(last(&seen)["params"]["reject_add_request"], false);

        client.recall_message(99).await.unwrap();
        let request = last(&seen);
        assert_eq!(request["action"], "delete_msg");
        assert_eq!(request["params"], json!({"message_id": 99}));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_forward_message() {
        let (client, seen) = gateway(MessageFormat::Array, null).await;
        let nodes = client.create_forward_nodes(vec![
            (1_i64, "alice".to_string(), Message::new().text("one")),
            (2_i64, "bob".to_string(), Message::new().face(14)),
        ]);
        assert_eq!(nodes.len(), 2);

        client
            .send_forward_msg(MessageTarget::Group(4), &nodes)
            .await
            .unwrap();
        let request = last(&seen);
        assert_eq!(request["action"], "send_group_forward_msg");
        assert_eq!(request["params"]["group_id"], 4);
        let first = &request["params"]["messages"][0];
        assert_eq!(first["type"], "node");
        assert_eq!(first["data"]["nickname"], "alice");
        assert_eq!(first["data"]["content"][0]["data"]["text"], "one");
        client.stop().await;
    }

    #[tokio::test]
    async fn test_missing_media_fails_before_sending() {
        let (client, seen) = gateway(MessageFormat::Array, null).await;
        let err = client
            .send_image(
                MessageTarget::Private(1),
                std::path::Path::new("/definitely/not/here.png"),
                MediaOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Message(MessageError::FileNotFound(_))));
        assert!(seen.lock().is_empty());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_self_id_and_is_at_me() {
        let (client, _seen) = gateway(MessageFormat::Array, login).await;
        assert_eq!(client.get_self_id().await, Some(10001));

        // no self_id on the event: falls back to the login info
        let event = InboundEvent::new(json!({
            "post_type": "message", "message_type": "group",
            "message": [{"type": "at", "data": {"qq": "10001"}}]
        }));
        assert!(client.is_at_me(&event).await);

        let event = InboundEvent::new(json!({
            "post_type": "message", "message_type": "group", "self_id": 3,
            "message": "[CQ:at,qq=10001]"
        }));
        assert!(!client.is_at_me(&event).await);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_is_at_me_uses_default_when_gateway_unreachable() {
        let client = OneBotClient::new(
            Binding::WsClient(WsClientBinding::new(WsClientConfig::new("ws"))),
            ClientOptions::default(),
        );
        let event = InboundEvent::new(json!({
            "post_type": "message", "message": "[CQ:at,qq=42] hi"
        }));

        assert_eq!(client.get_self_id().await, None);
        assert!(!client.is_at_me(&event).await);

        client.set_default_self_id(42);
        assert!(client.is_at_me(&event).await);
    }

    #[test]
    fn test_inspection_helpers() {
        let value = json!([
            {"type": "at", "data": {"qq": "10001"}},
            {"type": "text", "data": {"text": " hi"}},
            {"type": "at", "data": {"qq": "all"}},
            {"type": "image", "data": {"file": "a.png", "url": "http://x/a.png"}}
        ]);
        assert_eq!(get_at_targets(&value), vec![10001]);
        assert!(has_at_all(&value));
        assert_eq!(get_message_text(&value), " hi");
        assert_eq!(get_message_images(&value), vec!["http://x/a.png"]);

        let value = json!("a[CQ:face,id=1]b");
        assert_eq!(get_message_text(&value), "ab");
        assert!(parse_message(&json!(5)).is_empty());
    }

    #[test]
    fn test_inspection_tolerates_gateway_segments() {
        let value = json!([
            {"type": "text", "data": {"text": "a"}},
            {"type": "file", "data": {"file": "x"}},
            {"type": "at", "data": {"qq": 10001}},
            {"type": "markdown", "data": {"content": "**b**"}}
        ]);
        assert_eq!(get_message_text(&value), "a");
        assert_eq!(get_at_targets(&value), vec![10001]);
        assert!(!has_at_all(&value));
        assert_eq!(parse_message(&value).len(), 4);
    }
}
