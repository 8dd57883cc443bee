//! Matchers and conditions.

use std::fmt;

use regex::Regex;
use serde_json::Value;

use crate::error::{EvalError, RuleError};
use crate::rules::expression::CompiledExpression;
use crate::rules::view::MessageView;

/// Predicate applied to one resolved field value.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact structural equality, no coercion.
    Equality(Value),
    /// Whole-string regular expression match.
    Regexp(AnchoredRegex),
    /// Boolean expression over the whole message.
    Expression(CompiledExpression),
}

/// A regex compiled so that it only accepts full matches.
#[derive(Debug, Clone)]
pub struct AnchoredRegex {
    pattern: String,
    regex: Regex,
}

impl AnchoredRegex {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{pattern})$"))?,
        })
    }

    /// The pattern as written in the rule source.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_full_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl Matcher {
    /// Evaluate the matcher. `actual` is the value resolved from the
    /// condition's path; expressions look at the whole view instead.
    pub fn matches(&self, actual: Option<&Value>, view: &MessageView) -> Result<bool, EvalError> {
        match self {
            Self::Equality(expected) => Ok(actual == Some(expected)),
            Self::Regexp(regex) => Ok(actual
                .and_then(Value::as_str)
                .is_some_and(|text| regex.is_full_match(text))),
            Self::Expression(expr) => expr.evaluate(view),
        }
    }

    /// Build a matcher from a condition value in the rule source.
    ///
    /// A non-object value is shorthand for equality. An object must be a
    /// descriptor: `{"matcher": "<kind>", "value": ...}`.
    pub fn parse(rule: &str, path: &str, raw: &Value) -> Result<Self, RuleError> {
        let Value::Object(descriptor) = raw else {
            return Ok(Self::Equality(raw.clone()));
        };

        let malformed = |reason: &str| RuleError::MalformedCondition {
            rule: rule.to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if let Some(extra) = descriptor.keys().find(|k| *k != "matcher" && *k != "value") {
            return Err(malformed(&format!("unknown descriptor key '{extra}'")));
        }
        let kind = descriptor
            .get("matcher")
            .ok_or_else(|| malformed("descriptor is missing 'matcher'"))?
            .as_str()
            .ok_or_else(|| malformed("'matcher' must be a string"))?;
        let value = descriptor
            .get("value")
            .ok_or_else(|| malformed("descriptor is missing 'value'"))?;

        match kind {
            "equals" | "equal" | "eq" => Ok(Self::Equality(value.clone())),
            "regexp" | "regex" => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| malformed("regexp value must be a string"))?;
                let regex = AnchoredRegex::new(pattern).map_err(|source| RuleError::InvalidRegex {
                    rule: rule.to_string(),
                    path: path.to_string(),
                    source,
                })?;
                Ok(Self::Regexp(regex))
            }
            "expression" | "expr" => {
                let code = value
                    .as_str()
                    .ok_or_else(|| malformed("expression value must be a string"))?;
                let expr =
                    CompiledExpression::new(code).map_err(|reason| RuleError::InvalidExpression {
                        rule: rule.to_string(),
                        path: path.to_string(),
                        reason,
                    })?;
                Ok(Self::Expression(expr))
            }
            other => Err(RuleError::UnknownMatcher {
                rule: rule.to_string(),
                path: path.to_string(),
                matcher: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equality(expected) => write!(f, "== {expected}"),
            Self::Regexp(regex) => write!(f, "~ {}", regex.pattern()),
            Self::Expression(expr) => write!(f, "expr {}", expr.source()),
        }
    }
}

/// An attribute path paired with the matcher applied to it.
#[derive(Debug, Clone)]
pub struct Condition {
    pub path: String,
    pub matcher: Matcher,
}

impl Condition {
    pub fn new(path: impl Into<String>, matcher: Matcher) -> Self {
        Self {
            path: path.into(),
            matcher,
        }
    }

    pub fn is_fulfilled(&self, view: &MessageView) -> Result<bool, EvalError> {
        self.matcher.matches(view.get(&self.path), view)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.matcher {
            Matcher::Expression(_) => write!(f, "{}", self.matcher),
            _ => write!(f, "{} {}", self.path, self.matcher),
        }
    }
}
