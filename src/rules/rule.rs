//! Rules and rule sets.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::actions::{Action, ActionArgs, build_action};
use crate::error::{EvalError, RuleError};
use crate::rules::matcher::{Condition, Matcher};
use crate::rules::view::MessageView;

// ── Source document ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDef {
    #[serde(default)]
    name: Option<String>,
    on: Map<String, Value>,
    #[serde(rename = "do")]
    action: ActionDef,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ActionDef {
    Single(String),
    Sequence(Map<String, Value>),
}

// ── Rule ────────────────────────────────────────────────────────────

/// Conditions joined by AND, plus the actions to run when all hold.
#[derive(Debug, Clone)]
pub struct Rule {
    label: String,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
}

impl Rule {
    pub fn new(label: impl Into<String>, conditions: Vec<Condition>, actions: Vec<Action>) -> Self {
        Self {
            label: label.into(),
            conditions,
            actions,
        }
    }

    /// Name from the rule source, or `#<position>` when unnamed.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// True iff every condition holds. Stops at the first condition that
    /// does not hold or fails to evaluate.
    pub fn matches(&self, view: &MessageView) -> Result<bool, EvalError> {
        for condition in &self.conditions {
            if !condition.is_fulfilled(view)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn parse(position: usize, def: RuleDef) -> Result<Self, RuleError> {
        let label = def.name.unwrap_or_else(|| format!("#{position}"));

        let conditions = def
            .on
            .iter()
            .map(|(path, raw)| -> Result<Condition, RuleError> {
                Ok(Condition::new(path, Matcher::parse(&label, path, raw)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let actions = match def.action {
            ActionDef::Single(name) => vec![build_action(&label, &name, &ActionArgs::default())?],
            ActionDef::Sequence(entries) => entries
                .iter()
                .map(|(name, payload)| {
                    build_action(&label, name, &ActionArgs::from_payload(payload))
                })
                .collect::<Result<Vec<_>, RuleError>>()?,
        };
        if actions.is_empty() {
            return Err(RuleError::NoActions { rule: label });
        }

        Ok(Self::new(label, conditions, actions))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions: Vec<String> = self.conditions.iter().map(ToString::to_string).collect();
        let actions: Vec<&str> = self.actions.iter().map(Action::name).collect();
        write!(
            f,
            "{}: [{}] -> {}",
            self.label,
            conditions.join(" && "),
            actions.join(", ")
        )
    }
}

// ── RuleSet ─────────────────────────────────────────────────────────

/// Result of evaluating a rule set against one message.
#[derive(Debug)]
pub struct Evaluation<'a> {
    /// Rules whose conditions all held, in declared order.
    pub matched: Vec<&'a Rule>,
    /// Rules whose evaluation failed; each was treated as not matched.
    pub errors: usize,
}

/// Ordered, immutable collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Parse and validate a rule source document (JSON text).
    pub fn from_json_str(source: &str) -> Result<Self, RuleError> {
        let value: Value = serde_json::from_str(source)?;
        Self::from_value(value)
    }

    /// Build from an already-parsed document.
    pub fn from_value(value: Value) -> Result<Self, RuleError> {
        // Either a bare list of rules or `{"bounces": [...]}`.
        let list = match value {
            Value::Object(mut doc) => doc.remove("bounces").ok_or_else(|| {
                <serde_json::Error as serde::de::Error>::custom(
                    "expected a list of rules or an object with a 'bounces' list",
                )
            })?,
            other => other,
        };
        let defs: Vec<RuleDef> = serde_json::from_value(list)?;
        let rules = defs
            .into_iter()
            .enumerate()
            .map(|(position, def)| Rule::parse(position, def))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Read and validate a rules file.
    pub async fn load(path: &Path) -> Result<Self, RuleError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RuleError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json_str(&source)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule count followed by one line per rule, as printed by `--check`.
    pub fn summary(&self) -> String {
        let mut out = format!("{} rule(s) OK", self.rules.len());
        for rule in &self.rules {
            out.push_str("\n  ");
            out.push_str(&rule.to_string());
        }
        out
    }

    /// Evaluate every rule independently against the message.
    ///
    /// A rule that fails to evaluate is logged and counted as not matched;
    /// it never stops the remaining rules from being evaluated.
    pub fn evaluate(&self, view: &MessageView) -> Evaluation<'_> {
        let mut evaluation = Evaluation {
            matched: Vec::new(),
            errors: 0,
        };

        for rule in &self.rules {
            match rule.matches(view) {
                Ok(true) => {
                    debug!(rule = %rule, "Message matched rule");
                    evaluation.matched.push(rule);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(rule = %rule.label(), error = %e, "Rule evaluation failed, treating as no match");
                    evaluation.errors += 1;
                }
            }
        }

        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChatTarget;
    use crate::rules::view::ViewOptions;
    use serde_json::json;

    fn view(message: Value) -> MessageView {
        MessageView::new(message, &ViewOptions::default())
    }

    fn labels<'a>(evaluation: &Evaluation<'a>) -> Vec<&'a str> {
        evaluation.matched.iter().copied().map(Rule::label).collect()
    }

    #[test]
    fn parses_list_and_wrapped_layouts() {
        let list = RuleSet::from_value(json!([{"on": {"text": "a"}, "do": "log"}])).unwrap();
        let wrapped =
            RuleSet::from_value(json!({"bounces": [{"on": {"text": "a"}, "do": "log"}]})).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(wrapped.len(), 1);
        assert!(RuleSet::from_value(json!([])).unwrap().is_empty());
    }

    #[test]
    fn keeps_declared_action_order() {
        let set = RuleSet::from_json_str(
            r#"[{"on": {}, "do": {"reply": ["first"], "mark_as_read": null, "click": "Yes", "log": []}}]"#,
        )
        .unwrap();
        let names: Vec<&str> = set.rules()[0].actions().iter().map(Action::name).collect();
        assert_eq!(names, vec!["reply", "mark_as_read", "click", "log"]);
        assert_eq!(
            set.rules()[0].actions()[0],
            Action::Reply {
                text: Some("first".into()),
                receiver: None
            }
        );
    }

    #[test]
    fn keyword_payload_becomes_arguments() {
        let set = RuleSet::from_value(
            json!([{"on": {}, "do": {"reply": {"text": "hi", "receiver": -100}}}]),
        )
        .unwrap();
        assert_eq!(
            set.rules()[0].actions()[0],
            Action::Reply {
                text: Some("hi".into()),
                receiver: Some(ChatTarget::Id(-100))
            }
        );
    }

    #[test]
    fn unknown_action_fails_fast() {
        let err = RuleSet::from_value(json!([
            {"on": {"text": "a"}, "do": "log"},
            {"on": {"text": "b"}, "do": {"log": null, "self_destruct": []}}
        ]))
        .unwrap_err();
        match err {
            RuleError::UnsupportedAction { rule, action, .. } => {
                assert_eq!(rule, "#1");
                assert_eq!(action, "self_destruct");
            }
            other => panic!("Expected UnsupportedAction, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_sources() {
        for source in [
            json!({"rules": []}),
            json!([{"on": {"text": "a"}}]),
            json!([{"do": "log"}]),
            json!([{"on": [], "do": "log"}]),
            json!([{"on": {}, "do": 3}]),
            json!([{"on": {}, "do": "log", "priority": 1}]),
            json!("rules"),
        ] {
            assert!(
                matches!(RuleSet::from_value(source.clone()), Err(RuleError::Parse(_))),
                "expected parse error for {source}"
            );
        }
        assert!(matches!(
            RuleSet::from_value(json!([{"on": {}, "do": {}}])),
            Err(RuleError::NoActions { .. })
        ));
        assert!(matches!(RuleSet::from_json_str("[{"), Err(RuleError::Parse(_))));
    }

    #[test]
    fn all_conditions_must_hold() {
        let set = RuleSet::from_value(json!([
            {"name": "both", "on": {"text": "hi", "sender_id.user_id": 1}, "do": "log"},
            {"name": "text-only", "on": {"text": "hi"}, "do": "log"},
            {"name": "no-conditions", "on": {}, "do": "log"}
        ]))
        .unwrap();

        let from_one = set.evaluate(&view(json!({"text": "hi", "sender_id": {"user_id": 1}})));
        assert_eq!(labels(&from_one), vec!["both", "text-only", "no-conditions"]);

        let from_two = set.evaluate(&view(json!({"text": "hi", "sender_id": {"user_id": 2}})));
        assert_eq!(labels(&from_two), vec!["text-only", "no-conditions"]);
    }

    #[test]
    fn short_circuits_before_failing_condition() {
        let set = RuleSet::from_value(json!([{
            "on": {
                "text": "never",
                "check": {"matcher": "expression", "value": "undefined_name > 1"}
            },
            "do": "log"
        }]))
        .unwrap();
        let evaluation = set.evaluate(&view(json!({"text": "hi"})));
        assert!(evaluation.matched.is_empty());
        assert_eq!(evaluation.errors, 0);
    }

    #[test]
    fn failing_rule_does_not_stop_others() {
        let set = RuleSet::from_value(json!([
            {"name": "broken", "on": {"x": {"matcher": "expr", "value": "undefined_name > 1"}}, "do": "log"},
            {"name": "fine", "on": {"text": "hi"}, "do": "log"}
        ]))
        .unwrap();
        let evaluation = set.evaluate(&view(json!({"text": "hi"})));
        assert_eq!(labels(&evaluation), vec!["fine"]);
        assert_eq!(evaluation.errors, 1);
    }

    #[test]
    fn display_summarises_rule() {
        let set = RuleSet::from_value(json!([
            {"on": {"text": {"matcher": "regexp", "value": "a+"}, "n": 1}, "do": {"reply": "x", "log": null}}
        ]))
        .unwrap();
        assert_eq!(set.rules()[0].to_string(), "#0: [text ~ a+ && n == 1] -> reply, log");
    }

    #[test]
    fn summary_lists_rules() {
        let set = RuleSet::from_value(json!([
            {"name": "pong", "on": {"text": "ping"}, "do": {"reply": "pong"}},
            {"on": {}, "do": "log"}
        ]))
        .unwrap();
        assert_eq!(
            set.summary(),
            "2 rule(s) OK\n  pong: [text == \"ping\"] -> reply\n  #1: [] -> log"
        );
        assert_eq!(RuleSet::default().summary(), "0 rule(s) OK");
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"{"bounces": [{"on": {"text": "ping"}, "do": "reply"}]}"#).unwrap();
        assert_eq!(RuleSet::load(&path).await.unwrap().len(), 1);

        let missing = RuleSet::load(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(RuleError::Read { .. })));
    }
}
