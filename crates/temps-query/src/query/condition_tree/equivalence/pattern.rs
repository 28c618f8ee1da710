//! LIKE-style patterns: `%` matches any sequence, `_` one character and `\`
//! escapes the next one.

use serde_json::Value;

use super::{string_type, Alternative};
use crate::error::Result;
use crate::query::condition_tree::{ConditionTree, ConditionTreeLeaf};
use crate::query::context::EvalContext;
use crate::query::operator::Operator::{self, *};
use crate::types::ColumnType;

/// Text of a pattern value (non-strings use their JSON rendering)
pub fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Escape LIKE wildcards so the text matches literally
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// LIKE pattern and case sensitivity equivalent to a string operator
pub fn like_pattern(operator: Operator, value: &Value) -> (String, bool) {
    let raw = text(value);
    let escaped = escape_like(&raw);

    match operator {
        Like => (raw, true),
        ILike => (raw, false),
        Contains => (format!("%{}%", escaped), true),
        IContains => (format!("%{}%", escaped), false),
        StartsWith => (format!("{}%", escaped), true),
        IStartsWith => (format!("{}%", escaped), false),
        EndsWith => (format!("%{}", escaped), true),
        IEndsWith => (format!("%{}", escaped), false),
        _ => (escaped, true),
    }
}

/// Translate a LIKE pattern into an anchored regular expression
pub fn like_to_regex(like: &str, case_sensitive: bool) -> String {
    let mut expression = String::from(if case_sensitive { "(?s)^" } else { "(?is)^" });
    let mut escaped = false;

    for c in like.chars() {
        if escaped {
            expression.push_str(&regex::escape(&c.to_string()));
            escaped = false;
            continue;
        }

        match c {
            '\\' => escaped = true,
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }

    if escaped {
        expression.push_str(&regex::escape("\\"));
    }
    expression.push('$');
    expression
}

fn to_like(leaf: &ConditionTreeLeaf, _: &ColumnType, _: &EvalContext) -> Result<ConditionTree> {
    let value = leaf.value.clone().unwrap_or(Value::Null);
    let (like, case_sensitive) = like_pattern(leaf.operator, &value);
    let operator = if case_sensitive { Like } else { ILike };
    Ok(leaf.with_operator(operator, Value::String(like)).into())
}

fn to_match(leaf: &ConditionTreeLeaf, _: &ColumnType, _: &EvalContext) -> Result<ConditionTree> {
    let value = leaf.value.clone().unwrap_or(Value::Null);
    let (like, case_sensitive) = like_pattern(leaf.operator, &value);
    Ok(leaf
        .with_operator(Match, Value::String(like_to_regex(&like, case_sensitive)))
        .into())
}

static CASE_SENSITIVE: [Alternative; 1] = [Alternative {
    depends_on: &[Like],
    applies_to: string_type,
    replacer: to_like,
}];

static CASE_INSENSITIVE: [Alternative; 1] = [Alternative {
    depends_on: &[ILike],
    applies_to: string_type,
    replacer: to_like,
}];

static LIKE: [Alternative; 1] = [Alternative {
    depends_on: &[Match],
    applies_to: string_type,
    replacer: to_match,
}];

pub(super) fn alternatives(operator: Operator) -> &'static [Alternative] {
    match operator {
        Contains | StartsWith | EndsWith => &CASE_SENSITIVE,
        IContains | IStartsWith | IEndsWith => &CASE_INSENSITIVE,
        Like | ILike => &LIKE,
        _ => &[],
    }
}
