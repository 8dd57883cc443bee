//! Read-only, null-safe access to one message's nested data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Name of the derived private/group classification field.
pub const IS_PRIVATE_FIELD: &str = "is_private";

/// Which sign of `chat_id` marks a private (one-to-one) conversation.
///
/// Telegram gives private chats the (positive) user id and groups/channels
/// negative ids, but rule files written against other session layers use the
/// inverse, so the convention is configuration rather than a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivateChatSign {
    #[default]
    Positive,
    Negative,
}

impl PrivateChatSign {
    /// Classify a conversation id.
    pub fn is_private(self, chat_id: i64) -> bool {
        match self {
            Self::Positive => chat_id > 0,
            Self::Negative => chat_id < 0,
        }
    }
}

impl FromStr for PrivateChatSign {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "+" => Ok(Self::Positive),
            "negative" | "-" => Ok(Self::Negative),
            other => Err(ConfigError::InvalidValue {
                key: "BOUNCE_PRIVATE_CHAT_SIGN".into(),
                message: format!("expected 'positive' or 'negative', got '{other}'"),
            }),
        }
    }
}

impl fmt::Display for PrivateChatSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => f.write_str("positive"),
            Self::Negative => f.write_str("negative"),
        }
    }
}

/// Options applied when a view is built from a raw message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewOptions {
    pub private_chat_sign: PrivateChatSign,
}

/// Read-only view over one inbound message.
#[derive(Debug, Clone)]
pub struct MessageView {
    message: Value,
}

impl MessageView {
    /// Wrap a raw message, adding derived fields.
    pub fn new(mut message: Value, options: &ViewOptions) -> Self {
        if let Value::Object(ref mut fields) = message {
            add_derived_fields(fields, options);
        }
        Self { message }
    }

    /// Resolve a dot-delimited attribute path.
    ///
    /// Never fails: a missing key, an index into a non-sequence, a key into a
    /// scalar or an out-of-range index all resolve to `None`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.message, |current, segment| match current {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Resolve a path to a string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Top-level fields of the message (empty if the message is not a mapping).
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.message.as_object().into_iter().flat_map(Map::iter)
    }

    /// The whole message, including derived fields.
    pub fn as_value(&self) -> &Value {
        &self.message
    }
}

fn add_derived_fields(fields: &mut Map<String, Value>, options: &ViewOptions) {
    if fields.contains_key(IS_PRIVATE_FIELD) {
        return;
    }
    if let Some(chat_id) = fields.get("chat_id").and_then(Value::as_i64) {
        let private = options.private_chat_sign.is_private(chat_id);
        fields.insert(IS_PRIVATE_FIELD.to_string(), Value::Bool(private));
    }
}
