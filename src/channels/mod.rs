//! Chat transport abstraction.
//!
//! A transport owns the session with the chat network: it authenticates,
//! delivers message events as one ordered stream, sends texts and forwards
//! remote method calls. Everything rule-related lives in the engine.

pub mod stdio;
pub mod telegram;

pub use stdio::StdioTransport;
pub use telegram::TelegramTransport;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Stream of raw inbound events, in arrival order.
pub type EventStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// Remote method used for read receipts.
pub const VIEW_MESSAGES: &str = "viewMessages";
/// Remote method used to press an inline button.
pub const GET_CALLBACK_QUERY_ANSWER: &str = "getCallbackQueryAnswer";
/// Remote method used to refresh network state.
pub const SET_NETWORK_TYPE: &str = "setNetworkType";

/// Where a text message is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatTarget {
    Id(i64),
    Username(String),
}

impl ChatTarget {
    /// Interpret a JSON value as a chat target. Numeric strings become ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Id),
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(
                s.parse::<i64>()
                    .map(Self::Id)
                    .unwrap_or_else(|_| Self::Username(s.clone())),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => f.write_str(name),
        }
    }
}

/// Session with a chat network.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name (e.g. "telegram", "stdio").
    fn name(&self) -> &str;

    /// Verify credentials and connectivity.
    async fn health_check(&self) -> Result<(), TransportError>;

    /// Start receiving events. Called once; the stream ends when the session ends.
    async fn start(&self) -> Result<EventStream, TransportError>;

    /// Send a text message.
    async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<(), TransportError>;

    /// Invoke a remote method with a JSON payload.
    async fn call_method(&self, method: &str, payload: Value) -> Result<Value, TransportError>;

    /// Release the session.
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
