//! Tree-walking evaluator over bound programs
//!
//! One function per node kind; `eval` only dispatches.

use std::cmp::Ordering;

use formula_ast::{BinaryOp, Path};
use formula_registry::coerce::{to_float, to_number, Number};
use formula_registry::{NativeFn, Value};

use crate::context::Context;
use crate::error::RuntimeError;
use crate::program::Node;

pub(crate) fn eval(node: &Node, ctx: &Context) -> Result<Value, RuntimeError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Identifier(path) => eval_identifier(path, ctx),
        Node::Neg(operand) => eval_neg(operand, ctx),
        Node::Binary { op, left, right } => eval_binary(*op, left, right, ctx),
        Node::Call {
            name,
            function,
            args,
        } => eval_call(name, function, args, ctx),
        Node::Conditional {
            condition,
            then,
            otherwise,
        } => eval_conditional(condition, then, otherwise, ctx),
    }
}

fn eval_identifier(path: &Path, ctx: &Context) -> Result<Value, RuntimeError> {
    let (root, rest) = path
        .segments
        .split_first()
        .ok_or_else(|| RuntimeError::MissingIdentifier(path.to_string()))?;

    ctx.get(root)
        .and_then(|value| value.get_path(rest))
        .cloned()
        .ok_or_else(|| RuntimeError::MissingIdentifier(path.to_string()))
}

fn eval_neg(operand: &Node, ctx: &Context) -> Result<Value, RuntimeError> {
    let value = eval(operand, ctx)?;
    if value.is_null() {
        return Ok(Value::Null);
    }
    match to_number(&value) {
        Some(Number::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or(RuntimeError::Overflow { op: "-" }),
        Some(Number::Float(f)) => Ok(Value::Float(-f)),
        None => Err(RuntimeError::NotNumeric {
            op: "-",
            actual: value.kind(),
        }),
    }
}

fn eval_call(
    name: &str,
    function: &NativeFn,
    args: &[Node],
    ctx: &Context,
) -> Result<Value, RuntimeError> {
    let values = args
        .iter()
        .map(|arg| eval(arg, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    function(&values).map_err(|source| RuntimeError::Function {
        name: name.to_string(),
        source,
    })
}

fn eval_conditional(
    condition: &Node,
    then: &Node,
    otherwise: &Node,
    ctx: &Context,
) -> Result<Value, RuntimeError> {
    if expect_bool(eval(condition, ctx)?, "IF")? {
        eval(then, ctx)
    } else {
        eval(otherwise, ctx)
    }
}

fn expect_bool(value: Value, context: &str) -> Result<bool, RuntimeError> {
    value.as_bool().ok_or_else(|| RuntimeError::NotBoolean {
        context: context.to_string(),
        actual: value.kind(),
    })
}

fn eval_binary(op: BinaryOp, left: &Node, right: &Node, ctx: &Context) -> Result<Value, RuntimeError> {
    if op.is_logical() {
        return eval_logical(op, left, right, ctx);
    }

    let lhs = eval(left, ctx)?;
    let rhs = eval(right, ctx)?;

    if op.is_equality() {
        let equal = values_equal(&lhs, &rhs);
        return Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }));
    }

    if op.is_ordering() {
        // A null operand excludes the row in SQL; here it is simply false.
        if lhs.is_null() || rhs.is_null() {
            return Ok(Value::Bool(false));
        }
        let ordering = compare(op, &lhs, &rhs)?;
        return Ok(Value::Bool(match op {
            BinaryOp::Gt => ordering == Ordering::Greater,
            BinaryOp::Ge => ordering != Ordering::Less,
            BinaryOp::Lt => ordering == Ordering::Less,
            _ => ordering != Ordering::Greater,
        }));
    }

    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    arithmetic(op, &lhs, &rhs)
}

fn eval_logical(op: BinaryOp, left: &Node, right: &Node, ctx: &Context) -> Result<Value, RuntimeError> {
    let lhs = expect_bool(eval(left, ctx)?, op.symbol())?;

    // Short-circuit
    match (op, lhs) {
        (BinaryOp::And, false) => return Ok(Value::Bool(false)),
        (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
        _ => {}
    }

    let rhs = expect_bool(eval(right, ctx)?, op.symbol())?;
    Ok(Value::Bool(rhs))
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

/// Both sides as floats when at least one is a number and the other is a
/// number or a numeric string.
fn numeric_pair(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
    if !(is_number(lhs) || is_number(rhs)) {
        return None;
    }
    Some((to_float(lhs)?, to_float(rhs)?))
}

pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => match numeric_pair(lhs, rhs) {
            Some((a, b)) => a == b,
            None => lhs == rhs,
        },
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Ordering, RuntimeError> {
    let mismatch = || RuntimeError::TypeMismatch {
        op: op.symbol(),
        left: lhs.kind(),
        right: rhs.kind(),
    };

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => {
            let (a, b) = numeric_pair(lhs, rhs).ok_or_else(mismatch)?;
            a.partial_cmp(&b).ok_or_else(mismatch)
        }
    }
}

/// Numeric only; strings take part through `to_number`, so `'5' + '5'` is 10.
fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    let symbol = op.symbol();
    let operand = |value: &Value| {
        to_number(value).ok_or(RuntimeError::NotNumeric {
            op: symbol,
            actual: value.kind(),
        })
    };
    let a = operand(lhs)?;
    let b = operand(rhs)?;

    if op == BinaryOp::Div {
        if b.as_f64() == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        return finite(a.as_f64() / b.as_f64(), symbol);
    }

    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let result = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                _ => x.checked_mul(y),
            };
            result
                .map(Value::Int)
                .ok_or(RuntimeError::Overflow { op: symbol })
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                _ => x * y,
            };
            finite(result, symbol)
        }
    }
}

fn finite(result: f64, op: &'static str) -> Result<Value, RuntimeError> {
    if result.is_finite() {
        Ok(Value::Float(result))
    } else {
        Err(RuntimeError::Overflow { op })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use formula_ast::parse;
    use formula_registry::FunctionRegistry;

    fn run(source: &str, ctx: &Context) -> Result<Value, RuntimeError> {
        let registry = FunctionRegistry::new();
        let program = Program::compile(source, &parse(source).unwrap(), &registry).unwrap();
        program.run(ctx)
    }

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_arithmetic_int_and_float() {
        let empty = Context::new();
        assert_eq!(run("1 + 2 * 3", &empty).unwrap(), Value::Int(7));
        assert_eq!(run("10 - 5 - 2", &empty).unwrap(), Value::Int(3));
        assert_eq!(run("7 / 2", &empty).unwrap(), Value::Float(3.5));
        assert_eq!(run("6 / 3", &empty).unwrap(), Value::Float(2.0));
        assert_eq!(run("1.5 + 1", &empty).unwrap(), Value::Float(2.5));
        assert_eq!(run("'5' * 2", &empty).unwrap(), Value::Int(10));
    }

    #[test]
    fn test_plus_coerces_numeric_strings() {
        let c = ctx(&[
            ("a", Value::from("5")),
            ("b", Value::from("5")),
            ("first", Value::from("Ada")),
        ]);
        assert_eq!(run("a + b", &c).unwrap(), Value::Int(10));
        assert_eq!(run("a + b == 10", &c).unwrap(), Value::Bool(true));
        assert!(matches!(
            run("first + ' '", &c),
            Err(RuntimeError::NotNumeric { op: "+", actual: "string" })
        ));
        assert!(matches!(
            run("first + 1", &c),
            Err(RuntimeError::NotNumeric { op: "+", actual: "string" })
        ));
    }

    #[test]
    fn test_null_flows_through_arithmetic() {
        let c = ctx(&[("amount", Value::Null), ("name", Value::Null)]);
        assert_eq!(run("amount + 10", &c).unwrap(), Value::Null);
        assert_eq!(run("-amount", &c).unwrap(), Value::Null);
        assert_eq!(run("amount * 2 > 100", &c).unwrap(), Value::Bool(false));
        assert_eq!(run("LEN(name) > 3", &c).unwrap(), Value::Bool(false));
        assert_eq!(run("LEN(name) <= 3", &c).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_division_by_zero_and_overflow() {
        let empty = Context::new();
        assert_eq!(run("1 / 0", &empty), Err(RuntimeError::DivisionByZero));
        assert_eq!(run("1.0 / 0.0", &empty), Err(RuntimeError::DivisionByZero));
        assert_eq!(
            run("9223372036854775807 + 1", &empty),
            Err(RuntimeError::Overflow { op: "+" })
        );
        let c = ctx(&[("min", Value::Int(i64::MIN))]);
        assert_eq!(run("-min", &c), Err(RuntimeError::Overflow { op: "-" }));
    }

    #[test]
    fn test_equality_semantics() {
        let c = ctx(&[
            ("owner", Value::Null),
            ("amount", Value::Int(100)),
            ("code", Value::from("100")),
            ("ratio", Value::Float(100.0)),
        ]);
        assert_eq!(run("owner == null", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("amount == null", &c).unwrap(), Value::Bool(false));
        assert_eq!(run("amount != null", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("amount == ratio", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("amount == code", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("code == '100.0'", &c).unwrap(), Value::Bool(false));
        assert_eq!(run("amount == true", &c).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_ordering_semantics() {
        let c = ctx(&[
            ("amount", Value::Int(1500)),
            ("name", Value::from("beta")),
            ("owner", Value::Null),
        ]);
        assert_eq!(run("amount > 1000", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("amount <= 1500.0", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("amount < '2000'", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("name > 'alpha'", &c).unwrap(), Value::Bool(true));
        assert_eq!(run("owner > 1", &c).unwrap(), Value::Bool(false));
        assert_eq!(run("1 >= owner", &c).unwrap(), Value::Bool(false));
        assert!(matches!(
            run("name >= 5", &c),
            Err(RuntimeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        let c = ctx(&[("active", Value::Bool(false)), ("count", Value::Int(3))]);
        // The right side would fail with a missing identifier if evaluated
        assert_eq!(run("active && missing > 1", &c).unwrap(), Value::Bool(false));
        assert_eq!(run("count > 1 || missing", &c).unwrap(), Value::Bool(true));
        assert!(matches!(
            run("count && true", &c),
            Err(RuntimeError::NotBoolean { actual: "int", .. })
        ));
    }

    #[test]
    fn test_nested_identifier() {
        let c = ctx(&[(
            "record",
            Value::from(serde_json::json!({ "account": { "name": "Acme" } })),
        )]);
        assert_eq!(run("record.account.name", &c).unwrap(), Value::from("Acme"));
        assert_eq!(
            run("record.account.owner", &c),
            Err(RuntimeError::MissingIdentifier("record.account.owner".to_string()))
        );
        assert_eq!(
            run("missing", &c),
            Err(RuntimeError::MissingIdentifier("missing".to_string()))
        );
    }

    #[test]
    fn test_if_is_lazy() {
        let c = ctx(&[("score", Value::Int(80))]);
        assert_eq!(
            run("IF(score > 50, 'Pass', 1 / 0)", &c).unwrap(),
            Value::from("Pass")
        );
        assert!(matches!(
            run("IF(score, 'Pass', 'Fail')", &c),
            Err(RuntimeError::NotBoolean { .. })
        ));
    }

    #[test]
    fn test_function_failure_is_wrapped() {
        let c = ctx(&[("count", Value::Int(5))]);
        assert!(matches!(
            run("LEN(count)", &c),
            Err(RuntimeError::Function { name, .. }) if name == "LEN"
        ));
    }
}
