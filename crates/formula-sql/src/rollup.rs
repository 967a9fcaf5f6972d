//! Rollup aggregation queries
//!
//! A rollup summarizes child records that point at a parent through a
//! relationship field, optionally narrowed by a formula filter:
//!
//! ```text
//! SELECT SUM(`Amount`) FROM `opportunity` WHERE `account_id` = ? AND `is_deleted` = false AND ((Stage = ?))
//! ```

use std::fmt;
use std::str::FromStr;

use formula_registry::coerce::{to_float, to_int};
use formula_registry::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::compiler::{SqlCompiler, SqlError, SqlParam, SqlPredicate};

pub const DEFAULT_SOFT_DELETE_FIELD: &str = "is_deleted";

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("Unsupported rollup type: {0}")]
    UnsupportedFunction(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("{0} rollup requires a summary field")]
    MissingSummaryField(RollupFunction),

    #[error("Invalid rollup filter: {0}")]
    Filter(#[from] SqlError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollupFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl RollupFunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            RollupFunction::Count => "COUNT",
            RollupFunction::Sum => "SUM",
            RollupFunction::Min => "MIN",
            RollupFunction::Max => "MAX",
            RollupFunction::Avg => "AVG",
        }
    }

    /// Normalizes the raw aggregate. `None` or null means the child set was empty.
    pub fn finalize(&self, raw: Option<Value>) -> Value {
        let raw = raw.filter(|v| !v.is_null());
        match (self, raw) {
            (RollupFunction::Count, None) => Value::Int(0),
            (RollupFunction::Sum | RollupFunction::Avg, None) => Value::Float(0.0),
            (RollupFunction::Min | RollupFunction::Max, None) => Value::Null,
            (RollupFunction::Count, Some(v)) => to_int(&v).map(Value::Int).unwrap_or(v),
            (RollupFunction::Sum | RollupFunction::Avg, Some(v)) => {
                to_float(&v).map(Value::Float).unwrap_or(v)
            }
            (RollupFunction::Min | RollupFunction::Max, Some(v)) => v,
        }
    }
}

impl FromStr for RollupFunction {
    type Err = RollupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COUNT" => Ok(RollupFunction::Count),
            "SUM" => Ok(RollupFunction::Sum),
            "MIN" => Ok(RollupFunction::Min),
            "MAX" => Ok(RollupFunction::Max),
            "AVG" => Ok(RollupFunction::Avg),
            _ => Err(RollupError::UnsupportedFunction(s.to_string())),
        }
    }
}

impl fmt::Display for RollupFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Plain `[A-Za-z_][A-Za-z0-9_]*` names only; anything else could break out
/// of the backtick quoting.
fn quote_identifier(name: &str) -> Result<String, RollupError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(format!("`{}`", name))
    } else {
        Err(RollupError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct RollupQuery {
    function: RollupFunction,
    child_object: String,
    relationship_field: String,
    summary_field: Option<String>,
    filter: Option<String>,
    soft_delete_field: String,
    compiler: SqlCompiler,
}

impl RollupQuery {
    pub fn builder(
        function: RollupFunction,
        child_object: impl Into<String>,
        relationship_field: impl Into<String>,
    ) -> RollupQueryBuilder {
        RollupQueryBuilder {
            query: RollupQuery {
                function,
                child_object: child_object.into(),
                relationship_field: relationship_field.into(),
                summary_field: None,
                filter: None,
                soft_delete_field: DEFAULT_SOFT_DELETE_FIELD.to_string(),
                compiler: SqlCompiler::new(),
            },
        }
    }

    pub fn function(&self) -> RollupFunction {
        self.function
    }

    /// Builds the aggregate statement for one parent. The parent id is the
    /// first parameter; filter parameters follow.
    pub fn to_sql(&self, parent_id: &str) -> Result<SqlPredicate, RollupError> {
        let target = match (self.function, &self.summary_field) {
            (RollupFunction::Count, _) => "*".to_string(),
            (_, Some(field)) => quote_identifier(field)?,
            (function, None) => return Err(RollupError::MissingSummaryField(function)),
        };

        let mut sql = format!(
            "SELECT {}({}) FROM {} WHERE {} = ? AND {} = false",
            self.function.as_sql(),
            target,
            quote_identifier(&self.child_object)?,
            quote_identifier(&self.relationship_field)?,
            quote_identifier(&self.soft_delete_field)?,
        );
        let mut params = vec![SqlParam::from(parent_id)];

        if let Some(filter) = self.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            let predicate = self.compiler.compile(filter)?;
            sql.push_str(&format!(" AND ({})", predicate.sql));
            params.extend(predicate.params);
        }

        debug!(
            function = %self.function,
            child = %self.child_object,
            params = params.len(),
            "Built rollup query"
        );
        Ok(SqlPredicate { sql, params })
    }
}

pub struct RollupQueryBuilder {
    query: RollupQuery,
}

impl RollupQueryBuilder {
    pub fn summary_field(mut self, field: impl Into<String>) -> Self {
        self.query.summary_field = Some(field.into());
        self
    }

    /// Formula narrowing the child set, compiled with the builder's compiler.
    pub fn filter(mut self, expr: impl Into<String>) -> Self {
        self.query.filter = Some(expr.into());
        self
    }

    pub fn soft_delete_field(mut self, field: impl Into<String>) -> Self {
        self.query.soft_delete_field = field.into();
        self
    }

    /// Compiler used for the filter, e.g. one with a column allow-list.
    pub fn compiler(mut self, compiler: SqlCompiler) -> Self {
        self.query.compiler = compiler;
        self
    }

    pub fn finish(self) -> RollupQuery {
        self.query
    }

    pub fn build(self, parent_id: &str) -> Result<SqlPredicate, RollupError> {
        self.query.to_sql(parent_id)
    }
}

/// `UPDATE parent SET target = ? WHERE id = ?` for writing a finalized rollup back.
pub fn update_parent(
    parent_object: &str,
    target_field: &str,
    value: SqlParam,
    parent_id: &str,
) -> Result<SqlPredicate, RollupError> {
    Ok(SqlPredicate {
        sql: format!(
            "UPDATE {} SET {} = ? WHERE `id` = ?",
            quote_identifier(parent_object)?,
            quote_identifier(target_field)?
        ),
        params: vec![value, SqlParam::from(parent_id)],
    })
}
