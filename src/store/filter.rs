//! Structured record filters.
//!
//! Field names are validated identifiers and values stay typed JSON, so a
//! repository can evaluate a filter without interpolating user input.

use std::fmt;

use serde_json::Value;

use crate::error::{AppError, AppResult};

const MAX_FIELD_NAME_LEN: usize = 64;

/// A validated record field name: ASCII letter first, then letters, digits
/// or underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldName(String);

impl FieldName {
    pub fn parse(name: &str) -> AppResult<Self> {
        let mut chars = name.chars();
        let valid_head = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_head || !valid_tail || name.len() > MAX_FIELD_NAME_LEN {
            return Err(AppError::Invalid(format!("invalid filter field: {name:?}")));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    field: FieldName,
    op: FilterOp,
    value: Value,
}

impl Condition {
    fn matches(&self, record: &Value) -> bool {
        let actual = record.get(self.field.as_str()).unwrap_or(&Value::Null);
        let equal = values_equal(actual, &self.value);
        match self.op {
            FilterOp::Eq => equal,
            FilterOp::Ne => !equal,
        }
    }
}

/// Conjunction of conditions. An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on a single equality.
    pub fn eq(field: &str, value: impl Into<Value>) -> AppResult<Self> {
        Self::new().and_eq(field, value)
    }

    pub fn and_eq(self, field: &str, value: impl Into<Value>) -> AppResult<Self> {
        self.and(field, FilterOp::Eq, value)
    }

    pub fn and(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> AppResult<Self> {
        self.conditions.push(Condition {
            field: FieldName::parse(field)?,
            op,
            value: value.into(),
        });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a JSON record.
    pub fn matches(&self, record: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Query-string values arrive as strings; compare them loosely against
/// typed record fields.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a == e,
        (Value::Number(_) | Value::Bool(_), Value::String(e)) => actual.to_string() == *e,
        _ => actual == expected,
    }
}
