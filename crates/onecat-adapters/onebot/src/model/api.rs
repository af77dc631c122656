//! Action request and response wire types.
//!
//! Every call is `{"action", "params"}` plus `"echo"` on WebSocket; every
//! reply is `{"status", "retcode", "data"}` plus the echo back. Convenience
//! operations return the reply as raw JSON. [`ActionResponse`] is a typed
//! view callers may decode it into.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Actions issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Send a private message.
    SendPrivateMsg,
    /// Send a group message.
    SendGroupMsg,
    /// Send to a private or group target.
    SendMsg,
    /// Recall a message.
    DeleteMsg,
    /// Fetch a message.
    GetMsg,
    /// Send a merged forward message privately.
    SendPrivateForwardMsg,
    /// Send a merged forward message to a group.
    SendGroupForwardMsg,
    /// Poke a friend.
    FriendPoke,
    /// Poke a group member.
    GroupPoke,
    /// Remove a group member.
    SetGroupKick,
    /// Mute a group member.
    SetGroupBan,
    /// Mute the whole group.
    SetGroupWholeBan,
    /// The bot's own account.
    GetLoginInfo,
    /// Friend list.
    GetFriendList,
    /// Group list.
    GetGroupList,
    /// Group details.
    GetGroupInfo,
    /// Group member list.
    GetGroupMemberList,
    /// Group member details.
    GetGroupMemberInfo,
    /// Stranger details.
    GetStrangerInfo,
    /// Gateway status.
    GetStatus,
}

impl Action {
    /// The action name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SendPrivateMsg => "send_private_msg",
            Action::SendGroupMsg => "send_group_msg",
            Action::SendMsg => "send_msg",
            Action::DeleteMsg => "delete_msg",
            Action::GetMsg => "get_msg",
            Action::SendPrivateForwardMsg => "send_private_forward_msg",
            Action::SendGroupForwardMsg => "send_group_forward_msg",
            Action::FriendPoke => "friend_poke",
            Action::GroupPoke => "group_poke",
            Action::SetGroupKick => "set_group_kick",
            Action::SetGroupBan => "set_group_ban",
            Action::SetGroupWholeBan => "set_group_whole_ban",
            Action::GetLoginInfo => "get_login_info",
            Action::GetFriendList => "get_friend_list",
            Action::GetGroupList => "get_group_list",
            Action::GetGroupInfo => "get_group_info",
            Action::GetGroupMemberList => "get_group_member_list",
            Action::GetGroupMemberInfo => "get_group_member_info",
            Action::GetStrangerInfo => "get_stranger_info",
            Action::GetStatus => "get_status",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Action {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// An outbound action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Action name.
    pub action: String,
    /// Parameters; an empty object when there are none.
    pub params: Value,
    /// Correlation id, WebSocket only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl ActionRequest {
    /// Creates a request. Non-object params are replaced by `{}`.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(_) => params,
            _ => Value::Object(Map::new()),
        };
        Self {
            action: action.into(),
            params,
            echo: None,
        }
    }

    /// Attaches a correlation id.
    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = Some(echo.into());
        self
    }

    /// The request as JSON.
    pub fn to_value(&self) -> Value {
        let mut body = Map::new();
        body.insert("action".into(), Value::String(self.action.clone()));
        body.insert("params".into(), self.params.clone());
        if let Some(echo) = &self.echo {
            body.insert("echo".into(), Value::String(echo.clone()));
        }
        Value::Object(body)
    }
}

/// Typed view of an action reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// `"ok"`, `"async"` or `"failed"`.
    pub status: String,
    /// `0` on success.
    pub retcode: i64,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Error message.
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Human readable error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
    /// Correlation id echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

impl ActionResponse {
    /// Decodes a raw reply. `None` if it lacks `status` or `retcode`.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Returns true for `status == "ok"` with `retcode == 0`.
    pub fn is_ok(&self) -> bool {
        self.status == "ok" && self.retcode == 0
    }
}

/// The bot's own account, from `get_login_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    /// Account id.
    pub user_id: i64,
    /// Nickname.
    #[serde(default)]
    pub nickname: String,
}

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    /// A private chat with this user.
    Private(i64),
    /// A group.
    Group(i64),
}

impl MessageTarget {
    /// The `message_type` value.
    pub fn message_type(&self) -> &'static str {
        match self {
            MessageTarget::Private(_) => "private",
            MessageTarget::Group(_) => "group",
        }
    }

    /// The id key and value for action params.
    pub fn id_param(&self) -> (&'static str, i64) {
        match self {
            MessageTarget::Private(id) => ("user_id", *id),
            MessageTarget::Group(id) => ("group_id", *id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let req = ActionRequest::new(Action::GetStatus.as_str(), Value::Null).with_echo("c:1:0");
        assert_eq!(
            req.to_value(),
            json!({"action": "get_status", "params": {}, "echo": "c:1:0"})
        );
        assert_eq!(req.to_value(), serde_json::to_value(&req).unwrap());

        let req = ActionRequest::new("get_msg", json!({"message_id": 1}));
        assert!(req.to_value().get("echo").is_none());
    }

    #[test]
    fn test_response_view() {
        let resp = ActionResponse::from_value(&json!({
            "status": "failed", "retcode": 1404, "msg": "no such action", "data": null
        }))
        .unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.message.as_deref(), Some("no such action"));

        let resp = ActionResponse::from_value(&json!({
            "status": "ok", "retcode": 0, "data": {"user_id": 1, "nickname": "bot"}, "echo": "x"
        }))
        .unwrap();
        assert!(resp.is_ok());
        let info: LoginInfo = serde_json::from_value(resp.data).unwrap();
        assert_eq!(info.user_id, 1);

        assert!(ActionResponse::from_value(&json!({"post_type": "message"})).is_none());
    }

    #[test]
    fn test_message_target() {
        assert_eq!(MessageTarget::Group(5).id_param(), ("group_id", 5));
        assert_eq!(MessageTarget::Private(7).message_type(), "private");
    }
}
