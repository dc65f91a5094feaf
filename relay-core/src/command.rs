//! Command messages received on the daemon socket.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One inbound command: `{"apikey": "...", "action": "...", ...}`.
///
/// Fields beyond `apikey` and `action` are action-specific and kept verbatim
/// in [`CommandMessage::fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub apikey: String,
    pub action: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandMessage {
    pub fn new(apikey: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            apikey: apikey.into(),
            action: action.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style helper to attach an action-specific field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Decode a raw JSON value; fails when `apikey` or `action` is missing or not a string.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extra_fields_are_kept() {
        let message = CommandMessage::from_value(json!({
            "apikey": "k",
            "action": "think",
            "message": "hello",
            "priority": 2,
        }))
        .expect("decode");

        assert_eq!(message.action, "think");
        assert_eq!(message.field_str("message"), Some("hello"));
        assert_eq!(message.field("priority"), Some(&json!(2)));
        assert_eq!(message.field_str("priority"), None);
    }

    #[test]
    fn missing_action_is_rejected() {
        assert!(CommandMessage::from_value(json!({"apikey": "k"})).is_err());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(CommandMessage::from_value(json!(["apikey", "action"])).is_err());
    }

    #[test]
    fn serializes_flat() {
        let message = CommandMessage::new("k", "think").with_field("message", "nap");
        let encoded = serde_json::to_value(&message).expect("encode");
        assert_eq!(
            encoded,
            json!({"apikey": "k", "action": "think", "message": "nap"})
        );
    }
}
