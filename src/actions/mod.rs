//! Action catalog.
//!
//! Every name a rule may reference is listed in [`CATALOG`]. Rule sources are
//! turned into [`Action`] values at load time, so an unknown name or a badly
//! shaped argument list is rejected before any message is processed.

pub mod dispatcher;

pub use dispatcher::ActionDispatcher;

use std::fmt;

use serde_json::{Map, Value};

use crate::channels::ChatTarget;
use crate::error::RuleError;

/// One side effect a matched rule can perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a read receipt for the message.
    MarkAsRead,
    /// Press the inline button with this label.
    Click { label: Option<String> },
    /// Send text to the originating conversation, or to `receiver`.
    Reply {
        text: Option<String>,
        receiver: Option<ChatTarget>,
    },
    /// Log the message.
    Log,
    /// Run a shell command with the message JSON on stdin.
    Exec { command: Option<String> },
}

impl Action {
    /// Canonical catalog name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MarkAsRead => "mark_as_read",
            Self::Click { .. } => "click",
            Self::Reply { .. } => "reply",
            Self::Log => "log",
            Self::Exec { .. } => "exec",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Catalog entry: names, parameters, and how to build the action.
pub struct ActionSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub params: &'static [&'static str],
    pub description: &'static str,
    build: fn(&BoundArgs) -> Result<Action, String>,
}

impl ActionSpec {
    /// Signature as shown in `--list-actions`, e.g. `reply(text, receiver?)`.
    pub fn signature(&self) -> String {
        if self.params.is_empty() {
            return self.name.to_string();
        }
        format!("{}({})", self.name, self.params.join(", "))
    }

    fn param_names(&self) -> impl Iterator<Item = &'static str> {
        self.params.iter().map(|p| p.trim_end_matches('?'))
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

/// The fixed capability catalog.
pub static CATALOG: &[ActionSpec] = &[
    ActionSpec {
        name: "mark_as_read",
        aliases: &["mark-as-read"],
        params: &[],
        description: "Marks the message as read.",
        build: |_| Ok(Action::MarkAsRead),
    },
    ActionSpec {
        name: "click",
        aliases: &[],
        params: &["label"],
        description: "Clicks the inline button with the given label.",
        build: |args| {
            Ok(Action::Click {
                label: args.string("label")?,
            })
        },
    },
    ActionSpec {
        name: "reply",
        aliases: &[],
        params: &["text", "receiver?"],
        description: "Sends a reply, optionally to a different receiver.",
        build: |args| {
            let receiver = match args.get("receiver") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(
                    ChatTarget::from_value(raw)
                        .ok_or_else(|| "'receiver' must be a chat id or a username".to_string())?,
                ),
            };
            Ok(Action::Reply {
                text: args.string("text")?,
                receiver,
            })
        },
    },
    ActionSpec {
        name: "log",
        aliases: &[],
        params: &[],
        description: "Logs the full message as JSON.",
        build: |_| Ok(Action::Log),
    },
    ActionSpec {
        name: "exec",
        aliases: &["execute-external"],
        params: &["command"],
        description: "Runs a shell command, passing the message to its stdin as JSON.",
        build: |args| {
            Ok(Action::Exec {
                command: args.string("command")?,
            })
        },
    },
];

/// Look up a catalog entry by name or alias.
pub fn lookup(name: &str) -> Option<&'static ActionSpec> {
    CATALOG.iter().find(|spec| spec.matches_name(name))
}

/// Comma-separated canonical names, for error messages.
pub fn supported_names() -> String {
    CATALOG
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Catalog listing printed by `--list-actions`: one line per action with
/// its description, plus an indented alias line where aliases exist.
pub fn render_catalog() -> String {
    let mut lines = Vec::new();
    for spec in CATALOG {
        lines.push(format!("{:<28} {}", spec.signature(), spec.description));
        if !spec.aliases.is_empty() {
            lines.push(format!("{:<28} aliases: {}", "", spec.aliases.join(", ")));
        }
    }
    lines.join("\n")
}

/// Raw arguments as written in the rule source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl ActionArgs {
    /// Interpret a `do` payload: a mapping becomes keyword arguments, a
    /// sequence positional arguments, `null` nothing, and any other scalar a
    /// single positional argument.
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Object(map) => Self {
                keyword: map.clone(),
                ..Self::default()
            },
            Value::Array(items) => Self {
                positional: items.clone(),
                ..Self::default()
            },
            Value::Null => Self::default(),
            scalar => Self {
                positional: vec![scalar.clone()],
                ..Self::default()
            },
        }
    }
}

/// Arguments bound to parameter names.
#[derive(Debug, Default)]
pub struct BoundArgs {
    values: Map<String, Value>,
}

impl BoundArgs {
    fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A string parameter; absent stays `None` and is reported at dispatch.
    fn string(&self, name: &str) -> Result<Option<String>, String> {
        match self.values.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(format!("'{name}' must be a string, got {other}")),
        }
    }
}

fn bind(spec: &ActionSpec, args: &ActionArgs) -> Result<BoundArgs, String> {
    let names: Vec<&str> = spec.param_names().collect();
    if args.positional.len() > names.len() {
        return Err(format!(
            "takes {} argument(s) but {} were given",
            names.len(),
            args.positional.len()
        ));
    }

    let mut bound = BoundArgs::default();
    for (name, value) in names.iter().zip(&args.positional) {
        bound.values.insert((*name).to_string(), value.clone());
    }
    for (key, value) in &args.keyword {
        if !names.contains(&key.as_str()) {
            return Err(format!("unexpected keyword argument '{key}'"));
        }
        if bound.values.contains_key(key) {
            return Err(format!("got multiple values for argument '{key}'"));
        }
        bound.values.insert(key.clone(), value.clone());
    }
    Ok(bound)
}

/// Resolve an action name and its arguments into an [`Action`].
pub fn build_action(rule: &str, name: &str, args: &ActionArgs) -> Result<Action, RuleError> {
    let spec = lookup(name).ok_or_else(|| RuleError::UnsupportedAction {
        rule: rule.to_string(),
        action: name.to_string(),
        supported: supported_names(),
    })?;

    let invalid = |reason: String| RuleError::InvalidArguments {
        rule: rule.to_string(),
        action: name.to_string(),
        reason,
    };

    let bound = bind(spec, args).map_err(invalid)?;
    (spec.build)(&bound).map_err(invalid)
}
