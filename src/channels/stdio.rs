//! Stdio transport: a JSON-lines bridge for an external session process.
//!
//! Each stdin line is one event. Each outgoing request is written to stdout
//! as one line, `{"@type": <method>, ...payload}`.

use async_trait::async_trait;
use futures::stream;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

use crate::channels::{ChatTarget, ChatTransport, EventStream};
use crate::error::TransportError;

/// Reads events from stdin and writes requests to stdout.
pub struct StdioTransport {
    stdout: Mutex<Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for StdioTransport {
    fn name(&self) -> &str {
        "stdio"
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn start(&self) -> Result<EventStream, TransportError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_event(&line) {
                        Ok(Some(event)) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => continue,
                        Err(e) => tracing::warn!("Skipping stdin line: {e}"),
                    },
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<(), TransportError> {
        let payload = json!({
            "chat_id": target,
            "input_message_content": {
                "@type": "inputMessageText",
                "text": {"@type": "formattedText", "text": text}
            }
        });
        self.call_method("sendMessage", payload).await.map(|_| ())
    }

    async fn call_method(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        let line = encode_request(method, payload)?;
        self.write_line(&line).await?;
        Ok(Value::Null)
    }
}

/// Parse one stdin line. Blank lines yield `None`.
fn parse_event(line: &str) -> Result<Option<Value>, TransportError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(line).map_err(|e| TransportError::InvalidEvent(e.to_string()))?;
    if !value.is_object() {
        return Err(TransportError::InvalidEvent(
            "expected a JSON object per line".into(),
        ));
    }
    Ok(Some(value))
}

/// Render a request as one JSON line with the method name under `@type`.
fn encode_request(method: &str, payload: Value) -> Result<String, TransportError> {
    let mut request = Map::new();
    request.insert("@type".into(), Value::String(method.to_string()));
    match payload {
        Value::Object(fields) => {
            for (key, value) in fields {
                if key != "@type" {
                    request.insert(key, value);
                }
            }
        }
        Value::Null => {}
        other => {
            request.insert("payload".into(), other);
        }
    }
    serde_json::to_string(&Value::Object(request))
        .map_err(|e| TransportError::InvalidEvent(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_lines() {
        assert_eq!(parse_event("   ").unwrap(), None);
        assert_eq!(
            parse_event(r#" {"message": {"id": 1}} "#).unwrap(),
            Some(json!({"message": {"id": 1}}))
        );
        assert!(matches!(parse_event("[1]"), Err(TransportError::InvalidEvent(_))));
        assert!(matches!(parse_event("{oops"), Err(TransportError::InvalidEvent(_))));
    }

    #[test]
    fn encodes_method_first() {
        let line = encode_request(
            "viewMessages",
            json!({"chat_id": 5, "message_ids": [9], "force_read": true}),
        )
        .unwrap();
        assert_eq!(
            line,
            r#"{"@type":"viewMessages","chat_id":5,"message_ids":[9],"force_read":true}"#
        );
    }

    #[test]
    fn encodes_empty_and_scalar_payloads() {
        assert_eq!(
            encode_request("setNetworkType", json!({})).unwrap(),
            r#"{"@type":"setNetworkType"}"#
        );
        assert_eq!(
            encode_request("close", Value::Null).unwrap(),
            r#"{"@type":"close"}"#
        );
        assert_eq!(
            encode_request("echo", json!(3)).unwrap(),
            r#"{"@type":"echo","payload":3}"#
        );
    }

    #[test]
    fn payload_cannot_override_method() {
        let line = encode_request("getMe", json!({"@type": "other"})).unwrap();
        assert_eq!(line, r#"{"@type":"getMe"}"#);
    }
}
