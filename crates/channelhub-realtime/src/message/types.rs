//! Inbound and outbound message type definitions.
//!
//! Every frame carries one JSON object:
//! `{"m": method, "cid": channelId, "c": channel, "rid": requestId, "d": data, "u": clientId}`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved channel id used for user-targeted messages. Never routable.
pub const RESERVED_CHANNEL_ID: &str = "me";

/// Serialized message shared between every subscriber of a fan-out.
pub type Payload = Arc<str>;

/// Message method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Publish data on a channel.
    #[serde(rename = "pub")]
    Publish,
    /// Subscribe to a channel.
    #[serde(rename = "sub")]
    Subscribe,
    /// Unsubscribe from a channel.
    #[serde(rename = "unsub")]
    Unsubscribe,
    /// Update channel ownership or permissions.
    #[serde(rename = "update")]
    Update,
    /// Request data; answered directly to the sender.
    #[serde(rename = "data")]
    Data,
    /// Server to client only: announces the system channel ids.
    #[serde(rename = "sys")]
    System,
}

/// JSON channel model.
///
/// `{"id":"myChannel","owner":"user_id","rights":"rwrw","grant":{"user_id":"rw"}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDef {
    /// Channel id; may contain `:name` placeholders when declared as a template.
    #[serde(default)]
    pub id: String,
    /// Identity of the owner. Empty for system channels.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    /// Group label for group-scoped rights.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// `group-read, group-write, other-read, other-write`, e.g. `r-r-`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rights: String,
    /// Per-identity `read,write` overrides, e.g. `{"bob": "rw"}`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub grant: HashMap<String, String>,
    /// System channels can only be declared server side.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub system: bool,
}

impl ChannelDef {
    /// Creates a definition with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A single hub message, as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    /// Method; messages without one are dropped.
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// Target channel id.
    #[serde(rename = "cid", default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    /// Channel definition for creation and updates.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelDef>,
    /// Client-chosen request id, echoed back untouched.
    #[serde(rename = "rid", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    /// Payload.
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Identity of the sending client, stamped by the server.
    #[serde(rename = "u", default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
}

impl HubMessage {
    /// A publish message originating from the system.
    pub fn publish(channel_id: impl Into<String>, data: Value) -> Self {
        Self {
            method: Some(Method::Publish),
            channel_id: channel_id.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    /// The `sys` announcement listing system channel ids.
    pub fn system(channel_ids: Vec<String>) -> Self {
        Self {
            method: Some(Method::System),
            data: Some(Value::from(channel_ids)),
            ..Self::default()
        }
    }

    /// Falls back to the embedded channel's id when `cid` is empty.
    pub fn normalize_channel_id(&mut self) {
        if self.channel_id.is_empty() {
            if let Some(def) = &self.channel {
                if !def.id.is_empty() {
                    self.channel_id = def.id.clone();
                }
            }
        }
    }

    /// Marks the message as acknowledged.
    pub fn acknowledge(&mut self) {
        self.data = Some(Value::from("ok"));
    }

    /// Serializes the message once for fan-out.
    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}

/// Whether a channel id may be routed through the hub.
pub fn is_routable_channel_id(channel_id: &str, length_limit: usize) -> bool {
    !channel_id.is_empty() && channel_id != RESERVED_CHANNEL_ID && channel_id.len() <= length_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_preserves_method_channel_and_data() {
        let msg = HubMessage {
            method: Some(Method::Publish),
            channel_id: "rooms/1".into(),
            data: Some(json!({"text": "hi", "n": [1, 2]})),
            request_id: Some(7),
            ..HubMessage::default()
        };
        let text = serde_json::to_string(&msg).expect("serialize");
        let parsed: HubMessage = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(parsed.method, Some(Method::Publish));
        assert_eq!(parsed.channel_id, "rooms/1");
        assert_eq!(parsed.data, msg.data);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_wire_names() {
        let msg = HubMessage::publish("news", json!(1));
        let value: Value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value, json!({"m": "pub", "cid": "news", "d": 1}));
    }

    #[test]
    fn test_parses_client_subscribe_with_channel() {
        let msg: HubMessage = serde_json::from_str(
            r#"{"m":"sub","c":{"id":"rooms/1","rights":"--r-","grant":{"bob":"r"}},"rid":3}"#,
        )
        .expect("deserialize");
        assert_eq!(msg.method, Some(Method::Subscribe));
        assert!(msg.channel_id.is_empty());
        let def = msg.channel.as_ref().expect("channel");
        assert_eq!(def.grant.get("bob").map(String::as_str), Some("r"));
        assert!(!def.system);
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let parsed = serde_json::from_str::<HubMessage>(r#"{"m":"drop","cid":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_normalize_channel_id_uses_embedded_channel() {
        let mut msg = HubMessage {
            method: Some(Method::Subscribe),
            channel: Some(ChannelDef::new("rooms/9")),
            ..HubMessage::default()
        };
        msg.normalize_channel_id();
        assert_eq!(msg.channel_id, "rooms/9");
    }

    #[test]
    fn test_system_announcement() {
        let msg = HubMessage::system(vec!["news".into()]);
        let value: Value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value, json!({"m": "sys", "d": ["news"]}));
    }

    #[test]
    fn test_routable_channel_ids() {
        assert!(is_routable_channel_id("rooms/1", 140));
        assert!(!is_routable_channel_id("", 140));
        assert!(!is_routable_channel_id(RESERVED_CHANNEL_ID, 140));
        assert!(!is_routable_channel_id(&"x".repeat(141), 140));
        assert!(is_routable_channel_id(&"x".repeat(140), 140));
    }
}
