//! Rule engine: owns the active rule set and the single evaluation loop.
//!
//! Message events and administrative commands are consumed by one
//! `tokio::select!` loop, so a reload can never interleave with a message
//! that is still being handled.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::actions::ActionDispatcher;
use crate::channels::{ChatTransport, SET_NETWORK_TYPE};
use crate::error::{RuleError, TransportError};
use crate::rules::{MessageView, RuleSet, ViewOptions};

/// Administrative requests delivered to the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Re-read the rules file and swap it in if it validates.
    Reload,
    /// Ask the transport to refresh its network state.
    RefreshNetwork,
    /// Stop the loop.
    Shutdown,
}

/// What happened while handling one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Rules whose conditions all held.
    pub matched: usize,
    /// Rules that failed to evaluate (treated as not matched).
    pub eval_errors: usize,
    /// Matched rules whose actions stopped on an error.
    pub action_errors: usize,
}

/// Engine settings.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Rules file used by [`Engine::reload`].
    pub rules_file: Option<PathBuf>,
    pub view: ViewOptions,
}

/// Rule engine bound to one chat transport.
pub struct Engine {
    rules: Arc<RuleSet>,
    transport: Arc<dyn ChatTransport>,
    dispatcher: ActionDispatcher,
    options: EngineOptions,
}

impl Engine {
    pub fn new(rules: RuleSet, transport: Arc<dyn ChatTransport>, options: EngineOptions) -> Self {
        Self {
            rules: Arc::new(rules),
            dispatcher: ActionDispatcher::new(Arc::clone(&transport)),
            transport,
            options,
        }
    }

    /// Snapshot of the active rule set.
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules)
    }

    /// Validate `source` and make it the active rule set.
    ///
    /// On error the previous rule set stays active.
    pub fn reconfigure(&mut self, source: &str) -> Result<usize, RuleError> {
        let candidate = RuleSet::from_json_str(source)?;
        Ok(self.swap(candidate))
    }

    /// Re-read the configured rules file.
    pub async fn reload(&mut self) -> Result<usize, RuleError> {
        let Some(path) = self.options.rules_file.clone() else {
            return Err(RuleError::Read {
                path: "<none>".into(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no rules file configured",
                ),
            });
        };
        let candidate = RuleSet::load(&path).await?;
        Ok(self.swap(candidate))
    }

    fn swap(&mut self, candidate: RuleSet) -> usize {
        let count = candidate.len();
        self.rules = Arc::new(candidate);
        count
    }

    /// Forward a network refresh to the transport.
    pub async fn refresh_network(&self) -> Result<(), TransportError> {
        self.transport
            .call_method(SET_NETWORK_TYPE, json!({}))
            .await
            .map(|_| ())
    }

    /// Evaluate every rule against one event and run the matched actions.
    pub async fn handle_message(&self, event: Value) -> HandleOutcome {
        let Some(message) = extract_message(event) else {
            warn!("Ignoring event without a message object");
            return HandleOutcome::default();
        };
        debug!(message = %message, "New message");

        let view = MessageView::new(message, &self.options.view);
        let rules = Arc::clone(&self.rules);
        let evaluation = rules.evaluate(&view);

        let mut outcome = HandleOutcome {
            matched: evaluation.matched.len(),
            eval_errors: evaluation.errors,
            action_errors: 0,
        };

        for rule in evaluation.matched {
            let (done, failure) = self.dispatcher.run_all(rule.actions(), &view).await;
            if let Some((action, e)) = failure {
                error!(
                    rule = %rule.label(),
                    action,
                    completed = done,
                    error = %e,
                    "Action failed, skipping the rest of this rule"
                );
                outcome.action_errors += 1;
            }
        }

        outcome
    }

    /// Apply one administrative command. Returns false on shutdown.
    pub async fn apply(&mut self, command: ControlCommand) -> bool {
        match command {
            ControlCommand::Reload => {
                info!("Reloading rules...");
                match self.reload().await {
                    Ok(count) => info!(rules = count, "Rules reloaded"),
                    Err(e) => error!(error = %e, "Failed to reload rules, keeping the previous set"),
                }
                true
            }
            ControlCommand::RefreshNetwork => {
                info!("Updating network settings...");
                if let Err(e) = self.refresh_network().await {
                    error!(error = %e, "Network refresh failed");
                }
                true
            }
            ControlCommand::Shutdown => false,
        }
    }

    /// Run until the event stream ends, a shutdown command arrives, or Ctrl+C.
    pub async fn run(
        mut self,
        mut control: mpsc::Receiver<ControlCommand>,
    ) -> Result<(), TransportError> {
        self.transport.health_check().await?;
        let mut events = self.transport.start().await?;
        let mut control_open = true;

        info!(
            transport = self.transport.name(),
            rules = self.rules.len(),
            "Engine ready and listening"
        );

        loop {
            tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                command = control.recv(), if control_open => {
                    match command {
                        Some(command) => {
                            if !self.apply(command).await {
                                info!("Shutdown requested");
                                break;
                            }
                        }
                        None => control_open = false,
                    }
                }
                event = events.next() => {
                    match event {
                        Some(event) => {
                            self.handle_message(event).await;
                        }
                        None => {
                            info!("Event stream ended, shutting down...");
                            break;
                        }
                    }
                }
            }
        }

        self.transport.shutdown().await?;
        Ok(())
    }
}

/// Take the `message` object out of a raw event.
fn extract_message(event: Value) -> Option<Value> {
    match event {
        Value::Object(mut fields) => match fields.remove("message") {
            Some(message @ Value::Object(_)) => Some(message),
            _ => None,
        },
        _ => None,
    }
}
