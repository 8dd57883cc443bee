//! Error types for bounce.
//!
//! [`ConfigError`] and [`TransportError`] stop startup. Rule handling has
//! three tiers, matching how far a failure is allowed to travel:
//! - [`RuleError`]: the rule source is unusable; the load or reload is rejected.
//! - [`EvalError`]: one rule failed to evaluate against one message; that rule
//!   is treated as not matched.
//! - [`ActionError`]: one action failed; the remaining actions of that rule are
//!   skipped.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while building a rule set from its source document.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Malformed rule source: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read rules file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule {rule}: unexpected matcher '{matcher}' for '{path}'")]
    UnknownMatcher {
        rule: String,
        path: String,
        matcher: String,
    },

    #[error("Rule {rule}: malformed condition on '{path}': {reason}")]
    MalformedCondition {
        rule: String,
        path: String,
        reason: String,
    },

    #[error("Rule {rule}: invalid regexp for '{path}': {source}")]
    InvalidRegex {
        rule: String,
        path: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule {rule}: invalid expression for '{path}': {reason}")]
    InvalidExpression {
        rule: String,
        path: String,
        reason: String,
    },

    #[error("Rule {rule}: unsupported action '{action}'. Supported: {supported}")]
    UnsupportedAction {
        rule: String,
        action: String,
        supported: String,
    },

    #[error("Rule {rule}: invalid arguments for action '{action}': {reason}")]
    InvalidArguments {
        rule: String,
        action: String,
        reason: String,
    },

    #[error("Rule {rule}: no actions declared")]
    NoActions { rule: String },
}

/// Errors raised while evaluating a rule against a message.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Expression '{expression}' failed: {reason}")]
    Expression { expression: String, reason: String },
}

/// Errors raised while running an action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Button not found: {label}")]
    ButtonNotFound { label: String },

    #[error("Button {label} carries no callback data")]
    NoCallbackData { label: String },

    #[error("Action '{action}' is missing required argument '{argument}'")]
    MissingArgument { action: String, argument: String },

    #[error("Message has no usable '{field}' field")]
    MissingField { field: String },

    #[error("External command '{command}' failed: {source}")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Transport {name} failed to call {method}: {reason}")]
    CallFailed {
        name: String,
        method: String,
        reason: String,
    },

    #[error("Invalid event format: {0}")]
    InvalidEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
