//! Shared conformance table run against both the interpreter and the SQL
//! compiler. Every row pins the value the interpreter must produce for the
//! given record and the exact fragment and parameters the compiler must emit,
//! so the two targets cannot drift apart silently.

use formula_engine::{Context, Engine, EngineError, RuntimeError};
use formula_registry::Value;
use formula_sql::{to_sql, CompileError, SqlError};
use serde_json::json;

struct Case {
    expr: &'static str,
    record: serde_json::Value,
    value: serde_json::Value,
    sql: &'static str,
    params: serde_json::Value,
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            expr: "Amount == 1000",
            record: json!({ "Amount": 1000 }),
            value: json!(true),
            sql: "(Amount = ?)",
            params: json!([1000]),
        },
        Case {
            expr: "Amount > 1000 && Stage == 'Closed Won'",
            record: json!({ "Amount": 1500, "Stage": "Closed Won" }),
            value: json!(true),
            sql: "((Amount > ?) AND (Stage = ?))",
            params: json!([1000, "Closed Won"]),
        },
        Case {
            expr: "Amount >= 100 && (Stage == 'Won' || Stage == 'Lost')",
            record: json!({ "Amount": 100, "Stage": "Lost" }),
            value: json!(true),
            sql: "((Amount >= ?) AND ((Stage = ?) OR (Stage = ?)))",
            params: json!([100, "Won", "Lost"]),
        },
        Case {
            expr: "id != null",
            record: json!({ "id": "a1" }),
            value: json!(true),
            sql: "(id IS NOT NULL)",
            params: json!([]),
        },
        Case {
            expr: "name == null",
            record: json!({ "name": null }),
            value: json!(true),
            sql: "(name IS NULL)",
            params: json!([]),
        },
        Case {
            expr: "owner_id == nil || Priority == 'High'",
            record: json!({ "owner_id": "u1", "Priority": "Low" }),
            value: json!(false),
            sql: "((owner_id IS NULL) OR (Priority = ?))",
            params: json!(["High"]),
        },
        Case {
            expr: "Active == true",
            record: json!({ "Active": true }),
            value: json!(true),
            sql: "(Active = ?)",
            params: json!([true]),
        },
        Case {
            expr: "LEN(name) > 3",
            record: json!({ "name": "Nexus" }),
            value: json!(true),
            sql: "(CHAR_LENGTH(name) > ?)",
            params: json!([3]),
        },
        Case {
            expr: "UPPER(code) == 'ABC'",
            record: json!({ "code": "abc" }),
            value: json!(true),
            sql: "(UPPER(code) = ?)",
            params: json!(["ABC"]),
        },
        Case {
            expr: "lower(code) != 'abc'",
            record: json!({ "code": "ABC" }),
            value: json!(false),
            sql: "(LOWER(code) != ?)",
            params: json!(["abc"]),
        },
        Case {
            expr: "CONTAINS(Name, 'Corp')",
            record: json!({ "Name": "Acme Corp" }),
            value: json!(true),
            sql: "(Name LIKE ?)",
            params: json!(["%Corp%"]),
        },
        Case {
            expr: "STARTS_WITH(Email, 'admin') || ENDS_WITH(Email, '.org')",
            record: json!({ "Email": "ops@example.org" }),
            value: json!(true),
            sql: "((Email LIKE ?) OR (Email LIKE ?))",
            params: json!(["admin%", "%.org"]),
        },
        Case {
            expr: "CONTAINS(Code, '10%')",
            record: json!({ "Code": "SAVE10" }),
            value: json!(false),
            sql: "(Code LIKE ?)",
            params: json!(["%10\\%%"]),
        },
        Case {
            expr: "ROUND(price, 1) == 2.5",
            record: json!({ "price": 2.46 }),
            value: json!(true),
            sql: "((FLOOR(price * POW(10, ?) + 0.5) / POW(10, ?)) = ?)",
            params: json!([1, 1, 2.5]),
        },
        Case {
            expr: "IF(score > 50, 'Pass', 'Fail') == 'Pass'",
            record: json!({ "score": 80 }),
            value: json!(true),
            sql: "(IF((score > ?), ?, ?) = ?)",
            params: json!([50, "Pass", "Fail", "Pass"]),
        },
        Case {
            expr: "DATE_ADD(start_date, 3) == '2024-03-02'",
            record: json!({ "start_date": "2024-02-28" }),
            value: json!(true),
            sql: "(DATE_ADD(start_date, INTERVAL ? DAY) = ?)",
            params: json!([3, "2024-03-02"]),
        },
        Case {
            expr: "Amount + 10 > 100",
            record: json!({ "Amount": 95 }),
            value: json!(true),
            sql: "((Amount + ?) > ?)",
            params: json!([10, 100]),
        },
        Case {
            expr: "a + b == 10",
            record: json!({ "a": "5", "b": "5" }),
            value: json!(true),
            sql: "((a + b) = ?)",
            params: json!([10]),
        },
        Case {
            expr: "Amount + 10 > 100",
            record: json!({ "Amount": null }),
            value: json!(false),
            sql: "((Amount + ?) > ?)",
            params: json!([10, 100]),
        },
        Case {
            expr: "LEN(name) > 3",
            record: json!({ "name": null }),
            value: json!(false),
            sql: "(CHAR_LENGTH(name) > ?)",
            params: json!([3]),
        },
        Case {
            expr: "ROUND(price, 0) <= 10 || Stage == 'Open'",
            record: json!({ "price": null, "Stage": "Open" }),
            value: json!(true),
            sql: "(((FLOOR(price * POW(10, ?) + 0.5) / POW(10, ?)) <= ?) OR (Stage = ?))",
            params: json!([0, 0, 10, "Open"]),
        },
        Case {
            expr: "Quantity * 2 <= 10",
            record: json!({ "Quantity": 6 }),
            value: json!(false),
            sql: "((Quantity * ?) <= ?)",
            params: json!([2, 10]),
        },
        Case {
            expr: "-balance < -100",
            record: json!({ "balance": 150 }),
            value: json!(true),
            sql: "((-balance) < ?)",
            params: json!([-100]),
        },
        Case {
            expr: "record.Stage == 'Open'",
            record: json!({ "record": { "Stage": "Open" } }),
            value: json!(true),
            sql: "(record.Stage = ?)",
            params: json!(["Open"]),
        },
    ]
}

fn context(record: &serde_json::Value) -> Context {
    match Value::from(record.clone()) {
        Value::Map(map) => map.into_iter().collect(),
        other => panic!("record must be an object, got {:?}", other),
    }
}

#[test]
fn interpreter_matches_table() {
    let engine = Engine::new();
    for case in cases() {
        let actual = engine
            .evaluate(case.expr, &context(&case.record))
            .unwrap_or_else(|e| panic!("{} failed: {}", case.expr, e));
        assert_eq!(actual, Value::from(case.value.clone()), "{}", case.expr);
    }
}

#[test]
fn compiler_matches_table() {
    for case in cases() {
        let predicate = to_sql(case.expr).unwrap_or_else(|e| panic!("{} failed: {}", case.expr, e));
        assert_eq!(predicate.sql, case.sql, "{}", case.expr);
        assert_eq!(
            serde_json::to_value(&predicate.params).unwrap(),
            case.params,
            "{}",
            case.expr
        );
        assert_eq!(
            predicate.sql.matches('?').count(),
            predicate.params.len(),
            "{}",
            case.expr
        );
    }
}

#[test]
fn both_targets_reject_syntax_errors() {
    let engine = Engine::new();
    for expr in [
        "status == 'Open' AND assignee_id != null",
        "status == 'New' OR status == 'Prospecting'",
        "",
        "a = 1",
        "(a == 1",
    ] {
        assert!(
            matches!(engine.validate(expr), Err(EngineError::Parse(_))),
            "{}",
            expr
        );
        assert!(matches!(to_sql(expr), Err(SqlError::Parse(_))), "{}", expr);
    }
}

#[test]
fn both_targets_reject_bad_builtin_calls() {
    let engine = Engine::new();
    for expr in ["LEN(a, b) > 1", "ROUND(x) > 1", "LEN(5) > 1", "IF('x', 1, 2) == 1"] {
        assert!(
            matches!(engine.validate(expr), Err(EngineError::Compile(_))),
            "{}",
            expr
        );
        assert!(matches!(to_sql(expr), Err(SqlError::Compile(_))), "{}", expr);
    }
}

#[test]
fn interpreter_only_expressions() {
    let engine = Engine::new();
    engine.register_function("SCORE", |_| Ok(Value::Int(5)));

    let ctx = context(&json!({ "name": "Acme Corp", "someVar": "Corp", "first": "Ada" }));

    assert_eq!(
        engine.evaluate("CONTAINS(name, someVar)", &ctx).unwrap(),
        Value::Bool(true)
    );
    assert!(matches!(
        to_sql("CONTAINS(name, someVar)"),
        Err(SqlError::Compile(CompileError::LiteralRequired { .. }))
    ));

    assert_eq!(engine.evaluate("SCORE() > 1", &ctx).unwrap(), Value::Bool(true));
    assert!(matches!(
        to_sql("SCORE() > 1"),
        Err(SqlError::Compile(CompileError::UnsupportedFunction(_)))
    ));

    let hash = engine.evaluate("BCRYPT(first)", &ctx).unwrap();
    assert!(matches!(hash, Value::String(h) if h.starts_with("$2b$")));
    assert!(matches!(
        to_sql("BCRYPT(password) == 'x'"),
        Err(SqlError::Compile(CompileError::UnsupportedFunction(name))) if name == "BCRYPT"
    ));
}

#[test]
fn both_targets_reject_non_numeric_arithmetic() {
    let engine = Engine::new();
    let ctx = context(&json!({ "a": "x", "b": "y", "first": "Ada" }));

    for expr in [
        "UPPER(a) + LOWER(b) == 'Xy'",
        "first + '!' == 'Ada!'",
        "TODAY() - 1 > 0",
    ] {
        assert!(
            matches!(
                engine.evaluate(expr, &ctx),
                Err(EngineError::Runtime(RuntimeError::NotNumeric { .. }))
            ),
            "{}",
            expr
        );
        assert!(
            matches!(
                to_sql(expr),
                Err(SqlError::Compile(CompileError::NonNumericOperand { .. }))
            ),
            "{}",
            expr
        );
    }
}
