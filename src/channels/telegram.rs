//! Telegram transport over the Bot API.
//!
//! Updates are long-polled and rewritten into the message shape the rules
//! are written against (`chat_id`, `sender_id.user_id`, `content.text.text`,
//! `reply_markup.rows`), so a rules file reads the same on every transport.
//! Remote method calls are forwarded to the Bot API method of the same name.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};

use crate::channels::{ChatTarget, ChatTransport, EventStream};
use crate::error::TransportError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Pause after a failed poll before retrying.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram transport, connected to the Bot API via long-polling.
pub struct TelegramTransport {
    bot_token: SecretString,
    poll_timeout: Duration,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString, poll_timeout: Duration) -> Self {
        Self {
            bot_token,
            poll_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    fn call_failed(method: &str, reason: impl Into<String>) -> TransportError {
        TransportError::CallFailed {
            name: "telegram".into(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Send one chunk (at most 4096 chars).
    async fn send_message_chunk(&self, chat_id: &Value, text: &str) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        self.call_method("sendMessage", body).await.map(|_| ())
    }
}

fn api_url(token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        token.expose_secret()
    )
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| TransportError::StartupFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn start(&self) -> Result<EventStream, TransportError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();
        let timeout = self.poll_timeout.as_secs();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram transport listening for updates...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": timeout,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {}", e.without_url());
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(event) = normalize_update(update) else {
                        continue;
                    };

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<(), TransportError> {
        let chat_id = serde_json::to_value(target)
            .map_err(|e| Self::call_failed("sendMessage", e.to_string()))?;
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(&chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn call_method(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::call_failed(method, e.without_url().to_string()))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| Self::call_failed(method, e.without_url().to_string()))?;

        check_response(method, status, data)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        tracing::info!("Telegram transport shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Unwrap a Bot API response envelope.
///
/// A non-2xx status or `"ok": false` becomes `CallFailed` carrying the
/// API's `description`; otherwise `result` is returned.
fn check_response(
    method: &str,
    status: reqwest::StatusCode,
    mut data: Value,
) -> Result<Value, TransportError> {
    if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
        let description = data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        return Err(TelegramTransport::call_failed(
            method,
            format!("{status}: {description}"),
        ));
    }

    Ok(data
        .as_object_mut()
        .and_then(|fields| fields.remove("result"))
        .unwrap_or(Value::Null))
}

/// Rewrite a Bot API update into a `updateNewMessage` event.
///
/// Returns `None` for updates that carry no message.
fn normalize_update(update: &Value) -> Option<Value> {
    let message = update
        .get("message")
        .or_else(|| update.get("channel_post"))?;
    Some(json!({
        "@type": "updateNewMessage",
        "message": normalize_message(message),
    }))
}

fn normalize_message(message: &Value) -> Value {
    let mut out = Map::new();

    if let Some(id) = message.get("message_id") {
        out.insert("id".into(), id.clone());
    }
    if let Some(chat_id) = message.get("chat").and_then(|c| c.get("id")) {
        out.insert("chat_id".into(), chat_id.clone());
    }
    if let Some(date) = message.get("date") {
        out.insert("date".into(), date.clone());
    }
    out.insert("is_outgoing".into(), Value::Bool(false));

    if let Some(from) = message.get("from") {
        let mut sender = Map::new();
        sender.insert("@type".into(), json!("messageSenderUser"));
        if let Some(id) = from.get("id") {
            sender.insert("user_id".into(), id.clone());
        }
        if let Some(username) = from.get("username") {
            sender.insert("username".into(), username.clone());
        }
        out.insert("sender_id".into(), Value::Object(sender));
    }

    if let Some(text) = message.get("text").or_else(|| message.get("caption")) {
        out.insert(
            "content".into(),
            json!({"@type": "messageText", "text": {"text": text}}),
        );
    }

    if let Some(keyboard) = message
        .get("reply_markup")
        .and_then(|m| m.get("inline_keyboard"))
        .and_then(Value::as_array)
    {
        let rows: Vec<Value> = keyboard
            .iter()
            .filter_map(Value::as_array)
            .map(|row| Value::Array(row.iter().map(normalize_button).collect()))
            .collect();
        out.insert(
            "reply_markup".into(),
            json!({"@type": "replyMarkupInlineKeyboard", "rows": rows}),
        );
    }

    Value::Object(out)
}

fn normalize_button(button: &Value) -> Value {
    let text = button.get("text").cloned().unwrap_or(Value::Null);
    match button.get("callback_data") {
        Some(data) => json!({
            "text": text,
            "type": {"@type": "inlineKeyboardButtonTypeCallback", "data": data},
        }),
        None => json!({
            "text": text,
            "type": {"@type": "inlineKeyboardButtonTypeUrl"},
        }),
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let cut = floor_char_boundary(remaining, max_len);
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

/// Largest index `<= at` that lies on a char boundary (at least one char in).
fn floor_char_boundary(text: &str, at: usize) -> usize {
    let mut idx = at.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    if idx == 0 {
        text.chars().next().map_or(text.len(), char::len_utf8)
    } else {
        idx
    }
}

// ── Tests ───────────────────────────────────────────────────────────
