//! Numeric coercion shared by every arithmetic operator and builtin
//!
//! Accepts ints, floats and strings that parse as numbers after trimming.
//! Everything else is rejected. The SQL compiler uses the same functions
//! when it folds literal arguments, so both targets agree on what counts as
//! numeric.

use crate::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

pub fn to_number(value: &Value) -> Option<Number> {
    match value {
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

pub fn to_float(value: &Value) -> Option<f64> {
    to_number(value).map(Number::as_f64)
}

/// Floats truncate toward zero.
pub fn to_int(value: &Value) -> Option<i64> {
    match to_number(value)? {
        Number::Int(i) => Some(i),
        Number::Float(f) => float_to_int(f),
    }
}

pub fn is_numeric_string(s: &str) -> bool {
    parse_number(s).is_some()
}

fn parse_number(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::Int(i));
    }
    // Rust accepts "inf" and "NaN"; a numeric string must be finite.
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Number::Float)
}

fn float_to_int(f: f64) -> Option<i64> {
    let truncated = f.trunc();
    if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        Some(truncated as i64)
    } else {
        None
    }
}
