//! Rule matching.
//!
//! Every inbound message is wrapped in a [`MessageView`] and checked against
//! each [`Rule`] of the active [`RuleSet`]:
//! 1. each [`Condition`] resolves its attribute path through the view;
//! 2. its [`Matcher`] (equality, full-match regexp, or expression) decides;
//! 3. a rule matches when all of its conditions hold.
//!
//! Rule sets are built once, validated up front, and never modified.

pub mod expression;
pub mod matcher;
pub mod rule;
pub mod view;

pub use expression::CompiledExpression;
pub use matcher::{AnchoredRegex, Condition, Matcher};
pub use rule::{Evaluation, Rule, RuleSet};
pub use view::{MessageView, PrivateChatSign, ViewOptions};
