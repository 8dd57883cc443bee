//! Restricted expression scope for `expression` matchers.
//!
//! Expressions are minijinja expressions evaluated in an environment that
//! starts out empty. The only names an expression can see are:
//! - the message's top-level fields (including derived fields), as variables;
//! - `time`: `time()`, `localtime()`;
//! - `datetime`: `now()`, `utcnow()`, `fromtimestamp(ts)`, `days_since(ts)`.
//!
//! Plus the `lower`, `upper`, `trim` and `length` filters. There is no access
//! to the environment, the filesystem or processes. Rule files are authored by
//! the operator; message senders only ever supply data.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use minijinja::value::{Object, Value, from_args};
use minijinja::{Environment, Error, ErrorKind, Expression, State, UndefinedBehavior};

use crate::error::EvalError;
use crate::rules::view::MessageView;

/// Shared, immutable evaluation environment.
static ENV: LazyLock<Environment<'static>> = LazyLock::new(build_env);

fn build_env() -> Environment<'static> {
    let mut env = Environment::empty();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("lower", lower_filter);
    env.add_filter("upper", upper_filter);
    env.add_filter("trim", trim_filter);
    env.add_filter("length", length_filter);
    env
}

/// An expression compiled once against the shared environment.
#[derive(Clone)]
pub struct CompiledExpression {
    source: String,
    expr: Arc<Expression<'static, 'static>>,
}

impl CompiledExpression {
    /// Compile `code`; syntax errors are returned as text.
    pub fn new(code: &str) -> Result<Self, String> {
        let expr = ENV
            .compile_expression_owned(code.to_string())
            .map_err(|e| e.to_string())?;
        Ok(Self {
            source: code.to_string(),
            expr: Arc::new(expr),
        })
    }

    /// The expression as written in the rule source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a message view and interpret the result as a boolean.
    pub fn evaluate(&self, view: &MessageView) -> Result<bool, EvalError> {
        let fail = |reason: String| EvalError::Expression {
            expression: self.source.clone(),
            reason,
        };

        let result = self.expr.eval(scope(view)).map_err(|e| fail(e.to_string()))?;

        if result.is_undefined() {
            return Err(fail("expression evaluated to an undefined value".into()));
        }
        Ok(result.is_true())
    }
}

impl fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledExpression").field(&self.source).finish()
    }
}

/// Build the variable scope: message fields, then the two helper namespaces.
fn scope(view: &MessageView) -> Value {
    let mut vars: BTreeMap<String, Value> = view
        .fields()
        .map(|(name, value)| (name.clone(), Value::from_serialize(value)))
        .collect();
    vars.insert("time".into(), Value::from_object(TimeHelpers));
    vars.insert("datetime".into(), Value::from_object(DateTimeHelpers));
    Value::from(vars)
}

// ── Helper namespaces ───────────────────────────────────────────────

#[derive(Debug)]
struct TimeHelpers;

impl Object for TimeHelpers {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "time" => {
                let () = from_args(args)?;
                let now = Utc::now();
                let secs = now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0;
                Ok(Value::from(secs))
            }
            "localtime" => {
                let () = from_args(args)?;
                Ok(calendar(&Local::now()))
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("time has no method '{method}'"),
            )),
        }
    }
}

#[derive(Debug)]
struct DateTimeHelpers;

impl Object for DateTimeHelpers {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "now" => {
                let () = from_args(args)?;
                Ok(calendar(&Local::now()))
            }
            "utcnow" => {
                let () = from_args(args)?;
                Ok(calendar(&Utc::now()))
            }
            "fromtimestamp" => {
                let (ts,): (i64,) = from_args(args)?;
                let local = Local
                    .timestamp_opt(ts, 0)
                    .single()
                    .ok_or_else(|| invalid_timestamp(ts))?;
                Ok(calendar(&local))
            }
            "days_since" => {
                let (ts,): (i64,) = from_args(args)?;
                let then = DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| invalid_timestamp(ts))?;
                Ok(Value::from(Utc::now().signed_duration_since(then).num_days()))
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("datetime has no method '{method}'"),
            )),
        }
    }
}

fn invalid_timestamp(ts: i64) -> Error {
    Error::new(ErrorKind::InvalidOperation, format!("timestamp {ts} is out of range"))
}

/// Calendar breakdown of a point in time.
fn calendar<Tz: TimeZone>(at: &DateTime<Tz>) -> Value {
    let mut fields: BTreeMap<&'static str, Value> = BTreeMap::new();
    fields.insert("year", Value::from(at.year()));
    fields.insert("month", Value::from(at.month()));
    fields.insert("day", Value::from(at.day()));
    fields.insert("hour", Value::from(at.hour()));
    fields.insert("minute", Value::from(at.minute()));
    fields.insert("second", Value::from(at.second()));
    fields.insert("weekday", Value::from(at.weekday().num_days_from_monday()));
    fields.insert("timestamp", Value::from(at.timestamp()));
    Value::from(fields)
}

// ── Filters ─────────────────────────────────────────────────────────

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

fn trim_filter(value: String) -> String {
    value.trim().to_string()
}

fn length_filter(value: Value) -> Result<usize, Error> {
    value.len().ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot take the length of {}", value.kind()),
        )
    })
}
