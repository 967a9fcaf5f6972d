//! Function registry, runtime values and the builtin function library
//!
//! The registry is an explicit value owned by whoever evaluates formulas;
//! there is no process-wide instance. Every registration bumps a monotonic
//! epoch so that callers caching compiled programs can tell when their
//! bindings went stale.

pub mod builtins;
pub mod coerce;
mod value;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use builtins::{Builtin, LikePattern, NativeImpl, ParamKind, SqlMapping};
pub use value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("{function} requires {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("{function} argument {position} must be {expected}, got {actual}")]
    ArgumentType {
        function: String,
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl FunctionError {
    /// Error for caller-registered functions.
    pub fn custom(message: impl Into<String>) -> Self {
        FunctionError::Failed(message.into())
    }
}

/// Native callable as seen by the interpreter.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => *n == count,
            Arity::Variadic => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Variadic => f.write_str("any number of"),
        }
    }
}

#[derive(Clone)]
pub enum Implementation {
    Native(NativeFn),
    Conditional,
}

/// Catalog entry used for autocomplete in the admin console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub category: String,
    pub description: String,
    pub usage: String,
}

#[derive(Clone)]
pub struct FunctionEntry {
    pub name: String,
    pub arity: Arity,
    /// Declared parameter kinds; empty for variadic functions.
    pub params: Vec<ParamKind>,
    pub implementation: Implementation,
    /// `None` for caller-registered functions, which are interpreter-only.
    pub sql: Option<SqlMapping>,
    pub definition: Option<FunctionDefinition>,
}

impl FunctionEntry {
    pub fn from_builtin(builtin: &Builtin) -> Self {
        let implementation = match builtin.native {
            NativeImpl::Eager(f) => Implementation::Native(Arc::new(f)),
            NativeImpl::Conditional => Implementation::Conditional,
        };
        Self {
            name: builtin.name.to_string(),
            arity: Arity::Exact(builtin.params.len()),
            params: builtin.params.to_vec(),
            implementation,
            sql: builtin.sql,
            definition: Some(builtin.definition()),
        }
    }

    pub fn custom<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_ascii_uppercase(),
            arity: Arity::Variadic,
            params: Vec::new(),
            implementation: Implementation::Native(Arc::new(f)),
            sql: None,
            definition: None,
        }
    }

    pub fn param_kind(&self, position: usize) -> ParamKind {
        self.params.get(position).copied().unwrap_or(ParamKind::Any)
    }
}

impl fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("params", &self.params)
            .field("sql", &self.sql)
            .finish_non_exhaustive()
    }
}

pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
    epoch: u64,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry.epoch = 0;
        registry
    }

    /// Registry without builtins, for sandboxed engines.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
            epoch: 0,
        }
    }

    fn register_builtins(&mut self) {
        for builtin in builtins::BUILTINS {
            self.register(FunctionEntry::from_builtin(builtin));
        }
    }

    /// Adds or replaces a function and bumps the epoch.
    pub fn register(&mut self, entry: FunctionEntry) -> Option<FunctionEntry> {
        let key = entry.name.to_ascii_uppercase();
        self.epoch += 1;
        tracing::debug!(function = %key, epoch = self.epoch, "function registered");
        self.functions.insert(key, entry)
    }

    pub fn register_fn<F>(&mut self, name: &str, f: F) -> Option<FunctionEntry>
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        self.register(FunctionEntry::custom(name, f))
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Catalog of documented functions, ordered by category then name.
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut defs: Vec<_> = self
            .functions
            .values()
            .filter_map(|entry| entry.definition.clone())
            .collect();
        defs.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        defs
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = FunctionRegistry::default();

        let entry = registry.lookup("len").unwrap();
        assert_eq!(entry.name, "LEN");
        assert_eq!(entry.arity, Arity::Exact(1));
        assert_eq!(entry.sql, Some(SqlMapping::Call("CHAR_LENGTH")));
        assert_eq!(registry.epoch(), 0);
    }

    #[test]
    fn test_register_bumps_epoch_and_overwrites() {
        let mut registry = FunctionRegistry::default();

        assert!(registry
            .register_fn("double", |args| {
                let x = coerce::to_float(&args[0]).ok_or_else(|| FunctionError::custom("not a number"))?;
                Ok(Value::Float(x * 2.0))
            })
            .is_none());
        assert_eq!(registry.epoch(), 1);

        let previous = registry.register_fn("DOUBLE", |_| Ok(Value::Null));
        assert!(previous.is_some());
        assert_eq!(registry.epoch(), 2);

        let entry = registry.lookup("Double").unwrap();
        assert_eq!(entry.arity, Arity::Variadic);
        assert!(entry.sql.is_none());
    }

    #[test]
    fn test_definitions_cover_documented_builtins() {
        let registry = FunctionRegistry::default();
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();

        for expected in ["TODAY", "NOW", "DATE_ADD", "LEN", "UPPER", "LOWER", "ROUND", "IF", "BCRYPT"] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }

        // Interpreter-only builtin
        assert!(registry.lookup("bcrypt").unwrap().sql.is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = FunctionRegistry::empty();
        assert!(registry.is_empty());
        assert!(!registry.contains("IF"));
    }
}
