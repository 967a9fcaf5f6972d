//! Formula AST - parser and AST types
//!
//! One expression language shared by the interpreter and the SQL predicate
//! compiler. Parsing is pure: no registry, no context.

pub mod ast;
mod parser;

pub use ast::*;
pub use parser::{parse, ParseError, Rule};
