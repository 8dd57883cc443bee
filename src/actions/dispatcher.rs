//! Runs actions against the message they were triggered by.

use std::process::Stdio;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::actions::Action;
use crate::channels::{ChatTarget, ChatTransport, GET_CALLBACK_QUERY_ANSWER, VIEW_MESSAGES};
use crate::error::ActionError;
use crate::rules::MessageView;

/// Invokes actions through the chat transport.
pub struct ActionDispatcher {
    transport: Arc<dyn ChatTransport>,
}

impl ActionDispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Run a rule's actions in order, stopping at the first failure.
    ///
    /// Returns how many actions completed alongside the failure, if any.
    pub async fn run_all(
        &self,
        actions: &[Action],
        view: &MessageView,
    ) -> (usize, Option<(&'static str, ActionError)>) {
        for (done, action) in actions.iter().enumerate() {
            if let Err(e) = self.invoke(action, view).await {
                return (done, Some((action.name(), e)));
            }
        }
        (actions.len(), None)
    }

    /// Run a single action.
    pub async fn invoke(&self, action: &Action, view: &MessageView) -> Result<(), ActionError> {
        debug!(action = %action, "Invoking action");
        match action {
            Action::MarkAsRead => self.mark_as_read(view).await,
            Action::Click { label } => {
                let label = required(action, "label", label)?;
                self.click(view, label).await
            }
            Action::Reply { text, receiver } => {
                let text = required(action, "text", text)?;
                self.reply(view, text, receiver.as_ref()).await
            }
            Action::Log => {
                log_message(view);
                Ok(())
            }
            Action::Exec { command } => {
                let command = required(action, "command", command)?;
                exec(view, command).await
            }
        }
    }

    async fn mark_as_read(&self, view: &MessageView) -> Result<(), ActionError> {
        let payload = json!({
            "chat_id": chat_id(view)?,
            "message_ids": [message_id(view)?],
            "force_read": true,
        });
        self.transport.call_method(VIEW_MESSAGES, payload).await?;
        Ok(())
    }

    async fn click(&self, view: &MessageView, label: &str) -> Result<(), ActionError> {
        let button = find_button(view, label).ok_or_else(|| ActionError::ButtonNotFound {
            label: label.to_string(),
        })?;
        let data = callback_data(button).ok_or_else(|| ActionError::NoCallbackData {
            label: label.to_string(),
        })?;
        let payload = json!({
            "chat_id": chat_id(view)?,
            "message_id": message_id(view)?,
            "payload": {
                "@type": "callbackQueryPayloadData",
                "data": data,
            },
        });
        self.transport
            .call_method(GET_CALLBACK_QUERY_ANSWER, payload)
            .await?;
        Ok(())
    }

    async fn reply(
        &self,
        view: &MessageView,
        text: &str,
        receiver: Option<&ChatTarget>,
    ) -> Result<(), ActionError> {
        let target = match receiver {
            Some(target) => target.clone(),
            None => chat_id(view)?,
        };
        self.transport.send_text(&target, text).await?;
        Ok(())
    }
}

fn required<'a>(
    action: &Action,
    argument: &str,
    value: &'a Option<String>,
) -> Result<&'a str, ActionError> {
    value.as_deref().ok_or_else(|| ActionError::MissingArgument {
        action: action.name().to_string(),
        argument: argument.to_string(),
    })
}

fn chat_id(view: &MessageView) -> Result<ChatTarget, ActionError> {
    view.get("chat_id")
        .and_then(ChatTarget::from_value)
        .ok_or_else(|| ActionError::MissingField {
            field: "chat_id".into(),
        })
}

fn message_id(view: &MessageView) -> Result<Value, ActionError> {
    view.get("id")
        .filter(|id| id.is_i64() || id.is_string())
        .cloned()
        .ok_or_else(|| ActionError::MissingField { field: "id".into() })
}

/// Find the first button labelled `label`.
fn find_button<'a>(view: &'a MessageView, label: &str) -> Option<&'a Value> {
    view.get("reply_markup.rows")?
        .as_array()?
        .iter()
        .filter_map(Value::as_array)
        .flatten()
        .find(|button| button.get("text").and_then(Value::as_str) == Some(label))
}

/// Callback payload of a button; URL and other non-callback buttons have none.
fn callback_data(button: &Value) -> Option<&Value> {
    button.pointer("/type/data").filter(|data| !data.is_null())
}

fn log_message(view: &MessageView) {
    let rendered = serde_json::to_string_pretty(view.as_value())
        .unwrap_or_else(|_| view.as_value().to_string());
    info!("Message:\n{rendered}");
}

/// Run `command` through the shell with the message JSON on stdin.
///
/// Waits for the process; its exit status is only logged.
async fn exec(view: &MessageView, command: &str) -> Result<(), ActionError> {
    let failed = |source| ActionError::Exec {
        command: command.to_string(),
        source,
    };

    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(failed)?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = view.as_value().to_string();
        // The command may exit without reading its input.
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            debug!(command, error = %e, "Could not write message to command stdin");
        }
    }

    let status = child.wait().await.map_err(failed)?;
    debug!(command, %status, "External command finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::EventStream;
    use crate::error::TransportError;
    use crate::rules::ViewOptions;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl ChatTransport for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn health_check(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn start(&self) -> Result<EventStream, TransportError> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn send_text(&self, target: &ChatTarget, text: &str) -> Result<(), TransportError> {
            self.calls
                .lock()
                .await
                .push(("sendMessage".into(), json!({"chat_id": target, "text": text})));
            Ok(())
        }
        async fn call_method(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
            self.calls.lock().await.push((method.into(), payload));
            Ok(Value::Null)
        }
    }

    fn setup() -> (Arc<Recorder>, ActionDispatcher) {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = ActionDispatcher::new(recorder.clone());
        (recorder, dispatcher)
    }

    fn message() -> MessageView {
        MessageView::new(
            json!({
                "id": 77,
                "chat_id": 500,
                "content": {"text": {"text": "Continue?"}},
                "reply_markup": {"rows": [
                    [{"text": "Yes", "type": {"data": "eWVz"}}],
                    [{"text": "Maybe", "type": {"data": "bWF5YmU="}}, {"text": "Later"}]
                ]}
            }),
            &ViewOptions::default(),
        )
    }

    #[tokio::test]
    async fn mark_as_read_sends_view_messages() {
        let (recorder, dispatcher) = setup();
        dispatcher.invoke(&Action::MarkAsRead, &message()).await.unwrap();
        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, VIEW_MESSAGES);
        assert_eq!(
            calls[0].1,
            json!({"chat_id": 500, "message_ids": [77], "force_read": true})
        );
    }

    #[tokio::test]
    async fn click_sends_button_payload() {
        let (recorder, dispatcher) = setup();
        let action = Action::Click {
            label: Some("Maybe".into()),
        };
        dispatcher.invoke(&action, &message()).await.unwrap();
        let calls = recorder.calls.lock().await;
        assert_eq!(calls[0].0, GET_CALLBACK_QUERY_ANSWER);
        assert_eq!(calls[0].1["message_id"], json!(77));
        assert_eq!(calls[0].1["payload"]["data"], json!("bWF5YmU="));
        assert_eq!(calls[0].1["payload"]["@type"], json!("callbackQueryPayloadData"));
    }

    #[tokio::test]
    async fn click_unknown_label_fails() {
        let (recorder, dispatcher) = setup();
        let action = Action::Click {
            label: Some("No".into()),
        };
        let err = dispatcher.invoke(&action, &message()).await.unwrap_err();
        assert!(matches!(err, ActionError::ButtonNotFound { ref label } if label == "No"));
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn click_without_buttons_fails() {
        let (_, dispatcher) = setup();
        let view = MessageView::new(json!({"id": 1, "chat_id": 2}), &ViewOptions::default());
        let action = Action::Click {
            label: Some("Yes".into()),
        };
        assert!(matches!(
            dispatcher.invoke(&action, &view).await,
            Err(ActionError::ButtonNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reply_defaults_to_originating_chat() {
        let (recorder, dispatcher) = setup();
        let action = Action::Reply {
            text: Some("pong".into()),
            receiver: None,
        };
        dispatcher.invoke(&action, &message()).await.unwrap();
        let override_action = Action::Reply {
            text: Some("fwd".into()),
            receiver: Some(ChatTarget::Id(9)),
        };
        dispatcher.invoke(&override_action, &message()).await.unwrap();

        let calls = recorder.calls.lock().await;
        assert_eq!(calls[0].1, json!({"chat_id": 500, "text": "pong"}));
        assert_eq!(calls[1].1, json!({"chat_id": 9, "text": "fwd"}));
    }

    #[tokio::test]
    async fn reply_without_text_fails_at_dispatch() {
        let (_, dispatcher) = setup();
        let action = Action::Reply {
            text: None,
            receiver: None,
        };
        let err = dispatcher.invoke(&action, &message()).await.unwrap_err();
        assert!(matches!(err, ActionError::MissingArgument { ref argument, .. } if argument == "text"));
    }

    #[tokio::test]
    async fn reply_needs_a_chat() {
        let (_, dispatcher) = setup();
        let view = MessageView::new(json!({"text": "hi"}), &ViewOptions::default());
        let action = Action::Reply {
            text: Some("x".into()),
            receiver: None,
        };
        assert!(matches!(
            dispatcher.invoke(&action, &view).await,
            Err(ActionError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn run_all_stops_at_first_failure() {
        let (recorder, dispatcher) = setup();
        let actions = vec![
            Action::Click {
                label: Some("Yes".into()),
            },
            Action::Click {
                label: Some("No".into()),
            },
            Action::MarkAsRead,
        ];
        let (done, failure) = dispatcher.run_all(&actions, &message()).await;
        assert_eq!(done, 1);
        let (name, err) = failure.unwrap();
        assert_eq!(name, "click");
        assert!(matches!(err, ActionError::ButtonNotFound { .. }));
        assert_eq!(recorder.calls.lock().await.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_pipes_message_to_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("message.json");
        let (_, dispatcher) = setup();
        let action = Action::Exec {
            command: Some(format!("cat > {}", out.display())),
        };
        dispatcher.invoke(&action, &message()).await.unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["id"], json!(77));
        assert_eq!(written["is_private"], json!(true));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_ignores_exit_status() {
        let (_, dispatcher) = setup();
        let action = Action::Exec {
            command: Some("exit 3".into()),
        };
        assert!(dispatcher.invoke(&action, &message()).await.is_ok());
    }

    #[test]
    fn button_lookup_and_callback_data() {
        let view = message();
        let later = find_button(&view, "Later").unwrap();
        assert_eq!(callback_data(later), None);
        let yes = find_button(&view, "Yes").unwrap();
        assert_eq!(callback_data(yes), Some(&json!("eWVz")));
        assert!(find_button(&view, "Nope").is_none());
    }

    #[tokio::test]
    async fn click_button_without_callback_data_fails() {
        let (recorder, dispatcher) = setup();
        let view = MessageView::new(
            json!({
                "id": 3,
                "chat_id": 4,
                "reply_markup": {"rows": [[
                    {"text": "Site", "type": {"@type": "inlineKeyboardButtonTypeUrl"}}
                ]]}
            }),
            &ViewOptions::default(),
        );
        let action = Action::Click {
            label: Some("Site".into()),
        };
        let err = dispatcher.invoke(&action, &view).await.unwrap_err();
        assert!(matches!(err, ActionError::NoCallbackData { ref label } if label == "Site"));
        assert!(recorder.calls.lock().await.is_empty());

        let later = Action::Click {
            label: Some("Later".into()),
        };
        assert!(matches!(
            dispatcher.invoke(&later, &message()).await,
            Err(ActionError::NoCallbackData { .. })
        ));
    }
}
