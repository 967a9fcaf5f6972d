//! Formula to parameterized SQL predicate
//!
//! Every literal becomes a `?` placeholder with its value pushed to the
//! parameter list in left-to-right order, so no literal text ever reaches the
//! SQL string. Identifiers are emitted as bare column references; the grammar
//! already restricts them to `[A-Za-z0-9_.]`.

use std::collections::HashSet;

use formula_ast::{parse, BinaryOp, Call, Expr, Literal, ParseError, Path};
use formula_registry::builtins::{self, Builtin, ParamKind};
use formula_registry::coerce::{is_numeric_string, to_int};
use formula_registry::{SqlMapping, Value};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Unsupported function in SQL: {0}")]
    UnsupportedFunction(String),

    #[error("{function} requires {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("{function} argument {position} must be a string literal")]
    LiteralRequired { function: String, position: usize },

    #[error("{function} argument {position} must be {expected}, got {actual} literal")]
    ArgumentType {
        function: String,
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Operator {0} cannot take a null operand")]
    NullOperand(&'static str),

    #[error("Operand of {op} is not numeric: {operand}")]
    NonNumericOperand { op: &'static str, operand: String },

    #[error("Column not allowed: {0}")]
    ColumnNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("Failed to parse expression: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to compile expression: {0}")]
    Compile(#[from] CompileError),
}

/// Bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&Literal> for SqlParam {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Null => SqlParam::Null,
            Literal::Bool(b) => SqlParam::Bool(*b),
            Literal::Int(i) => SqlParam::Int(*i),
            Literal::Float(f) => SqlParam::Float(*f),
            Literal::String(s) => SqlParam::String(s.clone()),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::String(s.to_string())
    }
}

impl From<i64> for SqlParam {
    fn from(i: i64) -> Self {
        SqlParam::Int(i)
    }
}

impl From<f64> for SqlParam {
    fn from(f: f64) -> Self {
        SqlParam::Float(f)
    }
}

impl From<bool> for SqlParam {
    fn from(b: bool) -> Self {
        SqlParam::Bool(b)
    }
}

/// SQL fragment plus its bound parameters.
///
/// The number of `?` placeholders in `sql` always equals `params.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlPredicate {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Compiles with no column restriction.
pub fn to_sql(expr: &str) -> Result<SqlPredicate, SqlError> {
    SqlCompiler::new().compile(expr)
}

#[derive(Debug, Clone, Default)]
pub struct SqlCompiler {
    allowed_columns: Option<HashSet<String>>,
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts identifiers to the given dotted column names.
    pub fn with_allowed_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn compile(&self, expr: &str) -> Result<SqlPredicate, SqlError> {
        let ast = parse(expr).map_err(|e| {
            warn!(expr, error = %e, "Rejected SQL predicate");
            e
        })?;

        match self.compile_expr(&ast) {
            Ok(predicate) => {
                debug!(
                    expr,
                    sql = %predicate.sql,
                    params = predicate.params.len(),
                    "Compiled SQL predicate"
                );
                Ok(predicate)
            }
            Err(e) => {
                warn!(expr, error = %e, "Rejected SQL predicate");
                Err(e.into())
            }
        }
    }

    /// Compiles an already parsed expression. On error nothing partial is returned.
    pub fn compile_expr(&self, expr: &Expr) -> Result<SqlPredicate, CompileError> {
        let mut emitter = Emitter {
            compiler: self,
            params: Vec::new(),
        };
        let sql = emitter.emit(expr)?;
        Ok(SqlPredicate {
            sql,
            params: emitter.params,
        })
    }

    fn check_column(&self, path: &Path) -> Result<(), CompileError> {
        match &self.allowed_columns {
            Some(allowed) if !allowed.contains(&path.to_string()) => {
                Err(CompileError::ColumnNotAllowed(path.to_string()))
            }
            _ => Ok(()),
        }
    }
}

struct Emitter<'a> {
    compiler: &'a SqlCompiler,
    params: Vec<SqlParam>,
}

impl Emitter<'_> {
    fn emit(&mut self, expr: &Expr) -> Result<String, CompileError> {
        match expr {
            Expr::Literal { value } => Ok(self.bind(SqlParam::from(value))),
            Expr::Identifier { path } => {
                self.compiler.check_column(path)?;
                Ok(path.to_string())
            }
            Expr::Unary { operand, .. } => {
                if operand.is_null_literal() {
                    return Err(CompileError::NullOperand("-"));
                }
                check_numeric_operand("-", operand)?;
                Ok(format!("(-{})", self.emit(operand)?))
            }
            Expr::Binary { op, left, right } => self.emit_binary(*op, left, right),
            Expr::Call(call) => self.emit_call(call),
        }
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        "?".to_string()
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<String, CompileError> {
        let left_null = left.is_null_literal();
        let right_null = right.is_null_literal();

        if left_null || right_null {
            let test = match op {
                BinaryOp::Eq => "IS NULL",
                BinaryOp::Ne => "IS NOT NULL",
                other => return Err(CompileError::NullOperand(other.symbol())),
            };
            let subject = if right_null { left } else { right };
            return Ok(format!("({} {})", self.emit(subject)?, test));
        }

        if op.is_arithmetic() {
            check_numeric_operand(op.symbol(), left)?;
            check_numeric_operand(op.symbol(), right)?;
        }

        let operator = match op {
            BinaryOp::Eq => "=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            other => other.symbol(),
        };

        let lhs = self.emit(left)?;
        let rhs = self.emit(right)?;
        Ok(format!("({} {} {})", lhs, operator, rhs))
    }

    fn emit_call(&mut self, call: &Call) -> Result<String, CompileError> {
        let unsupported = || CompileError::UnsupportedFunction(call.name.to_ascii_uppercase());
        let builtin = builtins::lookup(&call.name).ok_or_else(unsupported)?;
        let mapping = builtin.sql.ok_or_else(unsupported)?;
        check_call(builtin, call)?;

        let args = &call.args;
        match mapping {
            SqlMapping::Keyword(keyword) => Ok(keyword.to_string()),
            SqlMapping::Call(function) => {
                let rendered = args
                    .iter()
                    .map(|arg| self.emit(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("{}({})", function, rendered.join(", ")))
            }
            SqlMapping::AddDays => {
                let date = self.emit(&args[0])?;
                let days = match &args[1] {
                    Expr::Literal { value } => {
                        let days = to_int(&Value::from(value))
                            .map(SqlParam::Int)
                            .unwrap_or(SqlParam::Null);
                        self.bind(days)
                    }
                    other => self.emit(other)?,
                };
                Ok(format!("DATE_ADD({}, INTERVAL {} DAY)", date, days))
            }
            SqlMapping::RoundHalfUp => {
                let x = self.emit(&args[0])?;
                let mark = self.params.len();
                let p = self.emit(&args[1])?;
                // The precision is rendered twice, so its parameters are bound twice.
                let repeated = self.params[mark..].to_vec();
                self.params.extend(repeated);
                Ok(format!(
                    "(FLOOR({} * POW(10, {}) + 0.5) / POW(10, {}))",
                    x, p, p
                ))
            }
            SqlMapping::Like(pattern) => {
                let text = args[1]
                    .as_str_literal()
                    .ok_or_else(|| CompileError::LiteralRequired {
                        function: builtin.name.to_string(),
                        position: 2,
                    })?;
                let subject = self.emit(&args[0])?;
                let bound = self.bind(SqlParam::String(pattern.pattern(text)));
                Ok(format!("({} LIKE {})", subject, bound))
            }
        }
    }
}

/// Rejects arithmetic operands the interpreter can never coerce to a number.
/// MySQL would read them as 0 instead of failing.
fn check_numeric_operand(op: &'static str, operand: &Expr) -> Result<(), CompileError> {
    let numeric = match operand {
        Expr::Literal {
            value: Literal::String(text),
        } => is_numeric_string(text),
        Expr::Literal {
            value: Literal::Bool(_),
        } => false,
        Expr::Call(call) => builtins::lookup(&call.name)
            .map_or(true, |b| !matches!(b.returns, ParamKind::Text | ParamKind::Bool)),
        _ => true,
    };

    if numeric {
        Ok(())
    } else {
        Err(CompileError::NonNumericOperand {
            op,
            operand: operand.to_string(),
        })
    }
}

/// Arity and literal-kind checks shared with the interpreter's builtin table.
fn check_call(builtin: &Builtin, call: &Call) -> Result<(), CompileError> {
    if call.args.len() != builtin.params.len() {
        return Err(CompileError::Arity {
            function: builtin.name.to_string(),
            expected: builtin.params.len(),
            actual: call.args.len(),
        });
    }

    for (index, (arg, kind)) in call.args.iter().zip(builtin.params).enumerate() {
        if let Expr::Literal { value } = arg {
            if !kind.accepts(&Value::from(value)) {
                return Err(CompileError::ArgumentType {
                    function: builtin.name.to_string(),
                    position: index + 1,
                    expected: kind.describe(),
                    actual: value.kind(),
                });
            }
        }
    }
    Ok(())
}
