//! Builtin function library
//!
//! Each builtin carries two implementations that must agree: a native
//! function for the interpreter and a [`SqlMapping`] for the predicate
//! compiler. Builtins without a mapping (`BCRYPT`) are interpreter-only and
//! the compiler rejects them.

use chrono::{Days, Local, NaiveDate, NaiveDateTime};

use crate::coerce::{to_float, to_int};
use crate::{FunctionDefinition, FunctionError, Value};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub type BuiltinFn = fn(&[Value]) -> Result<Value, FunctionError>;

/// Declared kind of a builtin parameter, checked against literal arguments
/// at compile time and against values at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Any,
    Text,
    Number,
    Integer,
    Bool,
}

impl ParamKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ParamKind::Any => "any value",
            ParamKind::Text => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Bool => "boolean",
        }
    }

    /// Null is accepted everywhere except boolean slots; builtins propagate it.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamKind::Any, _) => true,
            (ParamKind::Bool, v) => v.as_bool().is_some(),
            (_, Value::Null) => true,
            (ParamKind::Text, v) => v.as_str().is_some(),
            (ParamKind::Number, v) => to_float(v).is_some(),
            (ParamKind::Integer, v) => to_int(v).is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum NativeImpl {
    Eager(BuiltinFn),
    /// Only the selected branch is evaluated; handled by the interpreter.
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlMapping {
    /// `NAME(arg, ...)`
    Call(&'static str),
    /// Emitted verbatim, e.g. `CURDATE()`.
    Keyword(&'static str),
    /// `DATE_ADD(date, INTERVAL ? DAY)`
    AddDays,
    /// `(FLOOR(x * POW(10, p) + 0.5) / POW(10, p))`
    RoundHalfUp,
    /// `(field LIKE ?)` with the pattern bound as a parameter.
    Like(LikePattern),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikePattern {
    Contains,
    StartsWith,
    EndsWith,
}

impl LikePattern {
    /// Builds the bound LIKE pattern. `%`, `_` and `\` in `text` are escaped
    /// so they match literally.
    pub fn pattern(&self, text: &str) -> String {
        let mut escaped = String::with_capacity(text.len() + 2);
        for c in text.chars() {
            if matches!(c, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        match self {
            LikePattern::Contains => format!("%{}%", escaped),
            LikePattern::StartsWith => format!("{}%", escaped),
            LikePattern::EndsWith => format!("%{}", escaped),
        }
    }

    pub fn matches(&self, subject: &str, text: &str) -> bool {
        match self {
            LikePattern::Contains => subject.contains(text),
            LikePattern::StartsWith => subject.starts_with(text),
            LikePattern::EndsWith => subject.ends_with(text),
        }
    }
}

#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    /// Kind of value produced for non-null input. `Any` when it depends on
    /// the arguments.
    pub returns: ParamKind,
    pub params: &'static [ParamKind],
    pub native: NativeImpl,
    pub sql: Option<SqlMapping>,
    pub category: &'static str,
    pub description: &'static str,
    pub usage: &'static str,
}

impl Builtin {
    pub fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.name.to_string(),
            category: self.category.to_string(),
            description: self.description.to_string(),
            usage: self.usage.to_string(),
        }
    }
}

pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "TODAY",
        returns: ParamKind::Text,
        params: &[],
        native: NativeImpl::Eager(today),
        sql: Some(SqlMapping::Keyword("CURDATE()")),
        category: "Date",
        description: "Returns today's date (YYYY-MM-DD)",
        usage: "TODAY()",
    },
    Builtin {
        name: "NOW",
        returns: ParamKind::Text,
        params: &[],
        native: NativeImpl::Eager(now),
        sql: Some(SqlMapping::Keyword("NOW()")),
        category: "Date",
        description: "Returns current date/time (YYYY-MM-DD HH:MM:SS)",
        usage: "NOW()",
    },
    Builtin {
        name: "DATE_ADD",
        returns: ParamKind::Text,
        params: &[ParamKind::Text, ParamKind::Integer],
        native: NativeImpl::Eager(date_add),
        sql: Some(SqlMapping::AddDays),
        category: "Date",
        description: "Adds days to a date",
        usage: "DATE_ADD(date, days)",
    },
    Builtin {
        name: "LEN",
        returns: ParamKind::Integer,
        params: &[ParamKind::Text],
        native: NativeImpl::Eager(len),
        sql: Some(SqlMapping::Call("CHAR_LENGTH")),
        category: "Text",
        description: "Length of string in characters",
        usage: "LEN(text)",
    },
    Builtin {
        name: "UPPER",
        returns: ParamKind::Text,
        params: &[ParamKind::Text],
        native: NativeImpl::Eager(upper),
        sql: Some(SqlMapping::Call("UPPER")),
        category: "Text",
        description: "Converts to uppercase",
        usage: "UPPER(text)",
    },
    Builtin {
        name: "LOWER",
        returns: ParamKind::Text,
        params: &[ParamKind::Text],
        native: NativeImpl::Eager(lower),
        sql: Some(SqlMapping::Call("LOWER")),
        category: "Text",
        description: "Converts to lowercase",
        usage: "LOWER(text)",
    },
    Builtin {
        name: "CONTAINS",
        returns: ParamKind::Bool,
        params: &[ParamKind::Text, ParamKind::Text],
        native: NativeImpl::Eager(contains),
        sql: Some(SqlMapping::Like(LikePattern::Contains)),
        category: "Text",
        description: "True when text contains the given substring",
        usage: "CONTAINS(text, 'substring')",
    },
    Builtin {
        name: "STARTS_WITH",
        returns: ParamKind::Bool,
        params: &[ParamKind::Text, ParamKind::Text],
        native: NativeImpl::Eager(starts_with),
        sql: Some(SqlMapping::Like(LikePattern::StartsWith)),
        category: "Text",
        description: "True when text starts with the given prefix",
        usage: "STARTS_WITH(text, 'prefix')",
    },
    Builtin {
        name: "ENDS_WITH",
        returns: ParamKind::Bool,
        params: &[ParamKind::Text, ParamKind::Text],
        native: NativeImpl::Eager(ends_with),
        sql: Some(SqlMapping::Like(LikePattern::EndsWith)),
        category: "Text",
        description: "True when text ends with the given suffix",
        usage: "ENDS_WITH(text, 'suffix')",
    },
    Builtin {
        name: "ROUND",
        returns: ParamKind::Number,
        params: &[ParamKind::Number, ParamKind::Integer],
        native: NativeImpl::Eager(round),
        sql: Some(SqlMapping::RoundHalfUp),
        category: "Math",
        description: "Rounds a number half-up to the specified precision",
        usage: "ROUND(number, precision)",
    },
    Builtin {
        name: "IF",
        returns: ParamKind::Any,
        params: &[ParamKind::Bool, ParamKind::Any, ParamKind::Any],
        native: NativeImpl::Conditional,
        sql: Some(SqlMapping::Call("IF")),
        category: "Logic",
        description: "Conditional logic",
        usage: "IF(condition, true_val, false_val)",
    },
    Builtin {
        name: "BCRYPT",
        returns: ParamKind::Text,
        params: &[ParamKind::Text],
        native: NativeImpl::Eager(bcrypt_hash),
        sql: None,
        category: "Security",
        description: "Hashes a password with bcrypt",
        usage: "BCRYPT(password)",
    },
];

/// Case-insensitive lookup in the builtin table.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
}

fn type_error(function: &str, position: usize, kind: ParamKind, actual: &Value) -> FunctionError {
    FunctionError::ArgumentType {
        function: function.to_string(),
        position,
        expected: kind.describe(),
        actual: actual.kind(),
    }
}

fn arity_error(function: &str, expected: usize, args: &[Value]) -> FunctionError {
    FunctionError::Arity {
        function: function.to_string(),
        expected,
        actual: args.len(),
    }
}

fn today(args: &[Value]) -> Result<Value, FunctionError> {
    if !args.is_empty() {
        return Err(arity_error("TODAY", 0, args));
    }
    Ok(Value::String(Local::now().format(DATE_FORMAT).to_string()))
}

fn now(args: &[Value]) -> Result<Value, FunctionError> {
    if !args.is_empty() {
        return Err(arity_error("NOW", 0, args));
    }
    Ok(Value::String(Local::now().format(DATETIME_FORMAT).to_string()))
}

fn single_text<'a>(function: &str, args: &'a [Value]) -> Result<Option<&'a str>, FunctionError> {
    match args {
        [Value::Null] => Ok(None),
        [Value::String(s)] => Ok(Some(s)),
        [other] => Err(type_error(function, 1, ParamKind::Text, other)),
        _ => Err(arity_error(function, 1, args)),
    }
}

fn len(args: &[Value]) -> Result<Value, FunctionError> {
    Ok(match single_text("LEN", args)? {
        Some(s) => Value::Int(s.chars().count() as i64),
        None => Value::Null,
    })
}

fn upper(args: &[Value]) -> Result<Value, FunctionError> {
    Ok(match single_text("UPPER", args)? {
        Some(s) => Value::String(s.to_ascii_uppercase()),
        None => Value::Null,
    })
}

fn lower(args: &[Value]) -> Result<Value, FunctionError> {
    Ok(match single_text("LOWER", args)? {
        Some(s) => Value::String(s.to_ascii_lowercase()),
        None => Value::Null,
    })
}

fn like(function: &str, pattern: LikePattern, args: &[Value]) -> Result<Value, FunctionError> {
    match args {
        // A NULL column never matches a LIKE predicate.
        [Value::Null, _] | [_, Value::Null] => Ok(Value::Bool(false)),
        [Value::String(subject), Value::String(text)] => {
            Ok(Value::Bool(pattern.matches(subject, text)))
        }
        [Value::String(_), other] => Err(type_error(function, 2, ParamKind::Text, other)),
        [other, _] => Err(type_error(function, 1, ParamKind::Text, other)),
        _ => Err(arity_error(function, 2, args)),
    }
}

fn contains(args: &[Value]) -> Result<Value, FunctionError> {
    like("CONTAINS", LikePattern::Contains, args)
}

fn starts_with(args: &[Value]) -> Result<Value, FunctionError> {
    like("STARTS_WITH", LikePattern::StartsWith, args)
}

fn ends_with(args: &[Value]) -> Result<Value, FunctionError> {
    like("ENDS_WITH", LikePattern::EndsWith, args)
}

pub const BCRYPT_COST: u32 = 10;

fn bcrypt_hash(args: &[Value]) -> Result<Value, FunctionError> {
    let Some(password) = single_text("BCRYPT", args)? else {
        return Ok(Value::Null);
    };
    bcrypt::hash(password, BCRYPT_COST)
        .map(Value::String)
        .map_err(|e| FunctionError::InvalidArgument {
            function: "BCRYPT".to_string(),
            message: e.to_string(),
        })
}

/// Half-up rounding: `floor(x * 10^p + 0.5) / 10^p`.
pub fn round_half_up(x: f64, precision: i32) -> f64 {
    if precision >= 0 {
        let mult = 10f64.powi(precision);
        (x * mult + 0.5).floor() / mult
    } else {
        // 10^-p is not exact in binary; divide by the exact power instead.
        let div = 10f64.powi(-precision);
        (x / div + 0.5).floor() * div
    }
}

fn round(args: &[Value]) -> Result<Value, FunctionError> {
    let [value, precision] = args else {
        return Err(arity_error("ROUND", 2, args));
    };
    if value.is_null() || precision.is_null() {
        return Ok(Value::Null);
    }

    let x = to_float(value).ok_or_else(|| type_error("ROUND", 1, ParamKind::Number, value))?;
    // Beyond +/-308 the power of ten is not a finite f64.
    let p = to_int(precision)
        .map(|p| p.clamp(-308, 308) as i32)
        .ok_or_else(|| type_error("ROUND", 2, ParamKind::Integer, precision))?;

    Ok(Value::Float(round_half_up(x, p)))
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input, DATE_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(input, DATETIME_FORMAT)
                .ok()
                .map(|dt| dt.date())
        })
}

fn date_add(args: &[Value]) -> Result<Value, FunctionError> {
    let [date, days] = args else {
        return Err(arity_error("DATE_ADD", 2, args));
    };
    if date.is_null() || days.is_null() {
        return Ok(Value::Null);
    }

    let text = date
        .as_str()
        .ok_or_else(|| type_error("DATE_ADD", 1, ParamKind::Text, date))?;
    let days = to_int(days).ok_or_else(|| type_error("DATE_ADD", 2, ParamKind::Integer, days))?;

    let start = parse_date(text).ok_or_else(|| FunctionError::InvalidArgument {
        function: "DATE_ADD".to_string(),
        message: format!("date format invalid: {}", text),
    })?;

    let shifted = if days >= 0 {
        start.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        start.checked_sub_days(Days::new(days.unsigned_abs()))
    };

    shifted
        .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
        .ok_or_else(|| FunctionError::InvalidArgument {
            function: "DATE_ADD".to_string(),
            message: format!("date out of range: {} + {} days", text, days),
        })
}
