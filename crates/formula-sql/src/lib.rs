//! SQL predicate compiler and rollup query builder
//!
//! Compiles formula expressions into parameterized SQL fragments for
//! list-view filters, sharing rules and rollup filters. The compiler holds no
//! shared state and fails closed: any error discards the partial fragment.

pub mod compiler;
pub mod rollup;

pub use compiler::{to_sql, CompileError, SqlCompiler, SqlError, SqlParam, SqlPredicate};
pub use rollup::{RollupError, RollupFunction, RollupQuery, RollupQueryBuilder};
