//! Bayeux message type.
//!
//! One shape serves requests, responses and delivered events. Transports
//! decode their wire format into [`Message`] before handing it to the engine.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client identifier issued by the handshake.
pub type ClientId = String;

/// A decoded Bayeux message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Target channel.
    pub channel: String,
    /// Client identifier, once handshaken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Correlation id chosen by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Extension payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    /// Protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Connection types offered by the client or supported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    /// Connection type used for a connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Channel pattern, or list of patterns, for (un)subscribe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Value>,
    /// Whether the request succeeded. Set on responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    /// Rendered [`ProtocolError`]. Set on failed responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reconnect advice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Value>,
}

impl Message {
    /// Create a message addressed to a channel.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the application payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Build the skeleton of a response to this message.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            id: self.id.clone(),
            ..Self::default()
        }
    }

    /// Record the outcome of a request on a response.
    ///
    /// `successful` is derived from the presence of an error.
    pub fn settle(&mut self, error: Option<ProtocolError>) {
        self.successful = Some(error.is_none());
        self.error = error.map(|e| e.to_string());
    }

    /// Whether this response reports success.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }
}

/// Flatten a `subscription` field into its entries.
///
/// A scalar becomes a single entry, an array contributes its non-null
/// elements. Returns `None` when the field is absent or null.
#[must_use]
pub fn subscription_entries(subscription: Option<&Value>) -> Option<Vec<Value>> {
    match subscription? {
        Value::Null => None,
        Value::Array(items) => Some(items.iter().filter(|v| !v.is_null()).cloned().collect()),
        other => Some(vec![other.clone()]),
    }
}

/// Extract a channel pattern from a subscription entry.
///
/// # Errors
///
/// Returns `channel_invalid` for entries that are not strings.
pub fn entry_pattern(entry: &Value) -> Result<&str, ProtocolError> {
    entry
        .as_str()
        .ok_or_else(|| ProtocolError::ChannelInvalid(entry.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_decoding() {
        let msg: Message = serde_json::from_value(json!({
            "channel": "/meta/handshake",
            "version": "1.0",
            "supportedConnectionTypes": ["long-polling"],
            "id": 1
        }))
        .unwrap();

        assert_eq!(msg.channel, "/meta/handshake");
        assert_eq!(msg.version.as_deref(), Some("1.0"));
        assert_eq!(
            msg.supported_connection_types,
            Some(vec!["long-polling".to_string()])
        );
        assert_eq!(msg.id, Some(json!(1)));
        assert!(msg.client_id.is_none());
    }

    #[test]
    fn test_response_omits_absent_fields() {
        let mut response = Message::new("/foo").with_id("7").reply();
        response.settle(None);

        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(
            encoded,
            json!({"channel": "/foo", "id": "7", "successful": true})
        );
    }

    #[test]
    fn test_settle_with_error() {
        let mut response = Message::new("/meta/connect").reply();
        response.settle(Some(ProtocolError::ParameterMissing("clientId")));

        assert!(!response.is_successful());
        assert_eq!(
            response.error.as_deref(),
            Some("402:clientId:Missing required parameter")
        );
    }

    #[test]
    fn test_builder_encoding() {
        let msg = Message::new("/chat/room")
            .with_id(3)
            .with_data(json!({"text": "hi"}));

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "channel": "/chat/room",
                "id": 3,
                "data": {"text": "hi"}
            })
        );
    }

    #[test]
    fn test_subscription_entries() {
        assert_eq!(subscription_entries(None), None);
        assert_eq!(subscription_entries(Some(&Value::Null)), None);
        assert_eq!(
            subscription_entries(Some(&json!("/foo"))),
            Some(vec![json!("/foo")])
        );
        assert_eq!(
            subscription_entries(Some(&json!(["/a", null, "/b"]))),
            Some(vec![json!("/a"), json!("/b")])
        );
        assert_eq!(subscription_entries(Some(&json!([]))), Some(vec![]));
    }

    #[test]
    fn test_entry_pattern_rejects_non_strings() {
        assert_eq!(entry_pattern(&json!("/a")), Ok("/a"));
        assert_eq!(
            entry_pattern(&json!(42)),
            Err(ProtocolError::ChannelInvalid("42".into()))
        );
    }
}
