//! Formula interpreter
//!
//! Parses an expression once per registry epoch, binds every call site to
//! the registry and caches the result by expression text. Evaluation is pure
//! CPU work against a caller-supplied [`Context`].
//!
//! ```no_run
//! use formula_engine::{Context, Engine};
//! use formula_registry::Value;
//!
//! let engine = Engine::new();
//! let mut ctx = Context::new();
//! ctx.insert("score".to_string(), Value::Int(80));
//! let result = engine.evaluate("IF(score > 50, 'Pass', 'Fail')", &ctx);
//! ```

mod context;
mod engine;
mod error;
mod eval;
mod program;
mod template;

pub use context::{Context, FormulaContext, Visibility};
pub use engine::{Engine, EngineStats};
pub use error::{CompileError, EngineError, ParseError, RuntimeError};
pub use program::Program;
pub use template::substitute;
