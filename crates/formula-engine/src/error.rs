//! Error types for the interpreter

use formula_registry::FunctionError;
use thiserror::Error;

pub use formula_ast::ParseError;

/// Deterministic failures found while binding an expression to the registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("{function} argument {position} must be {expected}, got {actual} literal")]
    ArgumentType {
        function: String,
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Failures that depend on the evaluation context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Unknown identifier: {0}")]
    MissingIdentifier(String),

    #[error("{context} requires a boolean, got {actual}")]
    NotBoolean {
        context: String,
        actual: &'static str,
    },

    #[error("Operator {op} requires a number, got {actual}")]
    NotNumeric { op: &'static str, actual: &'static str },

    #[error("Cannot compare {left} {op} {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Numeric overflow in {op}")]
    Overflow { op: &'static str },

    #[error("Function {name} failed: {source}")]
    Function {
        name: String,
        #[source]
        source: FunctionError,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl EngineError {
    /// Short tag used in structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Parse(_) => "parse",
            EngineError::Compile(_) => "compile",
            EngineError::Runtime(_) => "runtime",
        }
    }
}
