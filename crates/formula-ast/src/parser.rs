//! Pest-based parser for formula expressions

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "formula.pest"]
pub struct FormulaParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Invalid literal {literal}: {reason}")]
    InvalidLiteral { literal: String, reason: String },

    #[error("Pest error: {0}")]
    Pest(#[from] pest::error::Error<Rule>),
}

/// Parse formula source text into an AST
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    if source.trim().is_empty() {
        return Err(ParseError::Syntax("Empty expression".to_string()));
    }

    let mut pairs = FormulaParser::parse(Rule::formula, source)?;
    let formula = pairs
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    let expr = formula
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::expr)
        .ok_or_else(|| ParseError::Syntax("Missing expression".to_string()))?;

    parse_expr(expr)
}

fn next_inner<'i>(inner: &mut Pairs<'i, Rule>, parent: Rule) -> Result<Pair<'i, Rule>, ParseError> {
    inner
        .next()
        .ok_or_else(|| ParseError::Syntax(format!("Incomplete {:?}", parent)))
}

fn parse_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let rule = pair.as_rule();
    match rule {
        Rule::expr => {
            let mut inner = pair.into_inner();
            parse_expr(next_inner(&mut inner, rule)?)
        }
        Rule::or_expr | Rule::and_expr | Rule::cmp_expr | Rule::add_expr | Rule::mul_expr => {
            // Flat sequence: operand (op operand)*
            let mut inner = pair.into_inner();
            let mut left = parse_expr(next_inner(&mut inner, rule)?)?;

            while let Some(op_pair) = inner.next() {
                let op = BinaryOp::from_symbol(op_pair.as_str()).ok_or_else(|| {
                    ParseError::Syntax(format!("Unknown operator: {}", op_pair.as_str()))
                })?;
                let right = parse_expr(next_inner(&mut inner, rule)?)?;
                left = Expr::binary(op, left, right);
            }

            Ok(left)
        }
        Rule::unary_expr => parse_unary(pair),
        Rule::primary => {
            let mut inner = pair.into_inner();
            let first = next_inner(&mut inner, rule)?;
            match first.as_rule() {
                Rule::literal => parse_literal(first),
                Rule::func_call => parse_func_call(first),
                Rule::ident_path => Ok(parse_ident_path(first)),
                Rule::expr => parse_expr(first),
                other => Err(ParseError::Syntax(format!("Invalid primary: {:?}", other))),
            }
        }
        other => Err(ParseError::Syntax(format!("Cannot parse expr: {:?}", other))),
    }
}

fn parse_unary(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut negations = 0usize;
    let mut operand = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::neg_op => negations += 1,
            _ => operand = Some(parse_expr(inner)?),
        }
    }

    let mut expr = operand.ok_or_else(|| ParseError::Syntax("Missing operand".to_string()))?;
    for _ in 0..negations {
        expr = negate(expr)?;
    }
    Ok(expr)
}

/// Folds negation into numeric literals, otherwise wraps in a unary node.
fn negate(expr: Expr) -> Result<Expr, ParseError> {
    match expr {
        Expr::Literal {
            value: Literal::Int(i),
        } => i
            .checked_neg()
            .map(|n| Expr::literal(Literal::Int(n)))
            .ok_or_else(|| ParseError::InvalidLiteral {
                literal: format!("-{}", i),
                reason: "integer overflow".to_string(),
            }),
        Expr::Literal {
            value: Literal::Float(x),
        } => Ok(Expr::literal(Literal::Float(-x))),
        other => Ok(Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(other),
        }),
    }
}

fn parse_literal(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let token = next_inner(&mut inner, Rule::literal)?;
    let text = token.as_str();

    let value = match token.as_rule() {
        Rule::int => Literal::Int(text.parse().map_err(|e: std::num::ParseIntError| {
            ParseError::InvalidLiteral {
                literal: text.to_string(),
                reason: e.to_string(),
            }
        })?),
        Rule::float => Literal::Float(text.parse().map_err(|e: std::num::ParseFloatError| {
            ParseError::InvalidLiteral {
                literal: text.to_string(),
                reason: e.to_string(),
            }
        })?),
        Rule::string => {
            let body = token
                .into_inner()
                .next()
                .map(|p| p.as_str())
                .unwrap_or_default();
            Literal::String(unescape(body))
        }
        Rule::boolean => Literal::Bool(text.eq_ignore_ascii_case("true")),
        Rule::null => Literal::Null,
        other => return Err(ParseError::Syntax(format!("Invalid literal: {:?}", other))),
    };

    Ok(Expr::literal(value))
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_ident_path(pair: Pair<Rule>) -> Expr {
    let segments = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::ident)
        .map(|p| p.as_str().to_string())
        .collect();
    Expr::identifier(Path::new(segments))
}

fn parse_func_call(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_inner(&mut inner, Rule::func_call)?.as_str().to_string();

    let args = if let Some(arg_list) = inner.next() {
        arg_list
            .into_inner()
            .map(parse_expr)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![]
    };

    Ok(Expr::Call(Call { name, args }))
}
