//! Compiles `field<op>value` query-string expressions into a storage-neutral
//! filter document, one predicate map per field.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Lexical comparison operators recognized in raw expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gte,
    Lte,
    Gt,
    Lt,
    Regex,
    Ne,
    Eq,
}

/// Predicate keys of the compiled filter document. Serializes to the
/// lowercase name the collection manager expects (`gte`, `in`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Gte,
    Lte,
    Gt,
    Lt,
    Regex,
    Ne,
    Eq,
    In,
    Nin,
}

/// Constraints attached to one field, at most one entry per predicate key.
pub type FieldPredicate = BTreeMap<PredicateOp, Value>;

/// The compiled filter document handed to the collection manager.
pub type CompiledQuery = BTreeMap<String, FieldPredicate>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no comparison operator in expression: {0}")]
pub struct MalformedExpression(pub String);

/// Operator tokens in match order. Two-character operators come first:
/// `>=` contains `>` and `!=` contains `=`, so testing the short form
/// first would split a compound operator in the middle.
const OPERATORS: [(CompareOp, &str); 7] = [
    (CompareOp::Gte, ">="),
    (CompareOp::Lte, "<="),
    (CompareOp::Gt, ">"),
    (CompareOp::Lt, "<"),
    (CompareOp::Regex, "~"),
    (CompareOp::Ne, "!="),
    (CompareOp::Eq, "="),
];

const DATETIME_SUFFIX: &str = "_datetime";

/// Compiles raw percent-encoded expression strings into a [`CompiledQuery`].
///
/// Expressions targeting the same field accumulate into one predicate map,
/// so `age>=18` followed by `age<=65` yields a single two-operator range.
/// Repeating the same operator on a field is last-write-wins.
///
/// ```rust
/// let query = filter_query::compile(["age>=18", "age<=65"]).unwrap();
/// assert_eq!(query["age"].len(), 2);
/// ```
pub fn compile<I, S>(expressions: I) -> Result<CompiledQuery, MalformedExpression>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut compiled = CompiledQuery::new();

    for raw in expressions {
        // Decode before tokenizing so an escaped operator or bracket inside a
        // value is restored first. Lossy on purpose, matching URL unescaping
        // of stray bytes.
        let bytes = urlencoding::decode_binary(raw.as_ref().as_bytes());
        let decoded = String::from_utf8_lossy(&bytes);

        let (op, field, value) = split_expression(&decoded)
            .ok_or_else(|| MalformedExpression(decoded.to_string()))?;

        let predicate = compiled.entry(field.to_string()).or_default();
        match op {
            CompareOp::Gte => predicate.insert(PredicateOp::Gte, comparison_value(field, value)),
            CompareOp::Lte => predicate.insert(PredicateOp::Lte, comparison_value(field, value)),
            CompareOp::Gt => predicate.insert(PredicateOp::Gt, comparison_value(field, value)),
            CompareOp::Lt => predicate.insert(PredicateOp::Lt, comparison_value(field, value)),
            CompareOp::Regex => {
                // The pattern is passed through verbatim; the store owns the
                // matching semantics.
                predicate.insert(PredicateOp::Regex, Value::String(value.to_string()))
            }
            CompareOp::Ne => match parse_list(value) {
                Some(items) => predicate.insert(PredicateOp::Nin, Value::Array(items)),
                None => predicate.insert(PredicateOp::Ne, Value::String(value.to_string())),
            },
            CompareOp::Eq => match parse_list(value) {
                Some(items) => predicate.insert(PredicateOp::In, Value::Array(items)),
                None => predicate.insert(PredicateOp::Eq, Value::String(value.to_string())),
            },
        };
    }

    Ok(compiled)
}

/// Splits an expression at the first operator found in [`OPERATORS`] order,
/// trimming whitespace around field and value.
fn split_expression(expr: &str) -> Option<(CompareOp, &str, &str)> {
    for (op, token) in OPERATORS {
        if let Some((field, value)) = expr.split_once(token) {
            return Some((op, field.trim(), value.trim()));
        }
    }
    None
}

/// Value for an ordering comparison. Datetime fields are compared as
/// ISO-8601 strings, which order lexicographically; everything else is
/// numeric when the value parses as a finite float, verbatim otherwise.
fn comparison_value(field: &str, value: &str) -> Value {
    if field.ends_with(DATETIME_SUFFIX) {
        return Value::String(value.to_string());
    }
    match value
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        Some(number) => Value::Number(number),
        None => Value::String(value.to_string()),
    }
}

/// Detects a `[a,b,c]` list literal and splits it into trimmed elements.
/// List elements are never numeric-coerced.
fn parse_list(value: &str) -> Option<Vec<Value>> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(|item| Value::String(item.trim().to_string()))
            .collect(),
    )
}
