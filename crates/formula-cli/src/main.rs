//! `formula` command line front end
//!
//! Evaluates, validates and compiles formula expressions. Results are JSON
//! on stdout; logs go to stderr or a file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use formula_engine::{substitute, Context, Engine, FormulaContext};
use formula_registry::Value;
use formula_sql::{RollupFunction, RollupQuery, SqlCompiler};
use serde_json::json;
use tracing::info;

mod config;
mod logging;

use config::Config;

/// Formula expression toolkit
#[derive(Parser, Debug)]
#[command(name = "formula", author, version, about, long_about = None)]
struct Cli {
    /// Path to formula.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate an expression against a JSON context
    Eval {
        expr: String,

        #[command(flatten)]
        input: ContextArgs,

        /// Treat the context as {"record", "prior", "user", "env", ...}
        #[arg(long)]
        formula: bool,

        /// Require a boolean result
        #[arg(long, conflicts_with = "formula")]
        condition: bool,
    },

    /// Check that an expression parses and binds
    Validate { expr: String },

    /// Compile an expression into a parameterized SQL predicate
    Sql {
        expr: String,

        /// Allowed column (repeatable); overrides the configured allow-list
        #[arg(long = "column")]
        columns: Vec<String>,
    },

    /// List the builtin function catalog
    Functions,

    /// Build a rollup aggregate query for one parent record
    Rollup {
        /// COUNT, SUM, MIN, MAX or AVG
        #[arg(long)]
        function: String,

        /// Child object (table) name
        #[arg(long)]
        child: String,

        /// Field on the child pointing at the parent
        #[arg(long)]
        relationship: String,

        /// Summarized field, required for everything but COUNT
        #[arg(long)]
        field: Option<String>,

        /// Formula narrowing the child records
        #[arg(long)]
        filter: Option<String>,

        parent_id: String,
    },

    /// Replace {Field} placeholders in a template with record values
    Substitute {
        template: String,

        #[command(flatten)]
        input: ContextArgs,
    },
}

#[derive(clap::Args, Debug)]
struct ContextArgs {
    /// Inline JSON object
    #[arg(long, conflicts_with = "context_file")]
    context: Option<String>,

    /// File containing a JSON object
    #[arg(long)]
    context_file: Option<PathBuf>,
}

impl ContextArgs {
    fn json(&self) -> Result<serde_json::Value> {
        let text = match (&self.context, &self.context_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file {}", path.display()))?,
            (None, None) => return Ok(json!({})),
        };
        serde_json::from_str(&text).context("Context must be a JSON object")
    }

    fn record(&self) -> Result<BTreeMap<String, Value>> {
        match Value::from(self.json()?) {
            Value::Map(map) => Ok(map),
            other => anyhow::bail!("Context must be a JSON object, got {}", other.kind()),
        }
    }
}

fn print(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the outcome and reports whether it succeeded.
fn report<T: serde::Serialize, E: std::fmt::Display>(
    outcome: std::result::Result<T, E>,
    kind: impl Fn(&E) -> &'static str,
) -> Result<bool> {
    match outcome {
        Ok(result) => {
            print(&json!({ "success": true, "result": result }))?;
            Ok(true)
        }
        Err(err) => {
            print(&json!({ "success": false, "kind": kind(&err), "error": err.to_string() }))?;
            Ok(false)
        }
    }
}

fn run(cli: Cli, config: &Config) -> Result<bool> {
    let engine = Engine::new();

    match cli.command {
        Command::Eval {
            expr,
            input,
            formula,
            condition,
        } => {
            if formula {
                let ctx: FormulaContext =
                    serde_json::from_value(input.json()?).context("Invalid formula context")?;
                report(engine.evaluate_formula(&expr, &ctx), |e| e.kind())
            } else {
                let ctx: Context = input.record()?.into_iter().collect();
                if condition {
                    report(engine.evaluate_condition(&expr, &ctx), |e| e.kind())
                } else {
                    report(engine.evaluate(&expr, &ctx), |e| e.kind())
                }
            }
        }

        Command::Validate { expr } => report(engine.validate(&expr).map(|_| true), |e| e.kind()),

        Command::Sql { expr, columns } => {
            let allowed = if columns.is_empty() {
                config.sql.allowed_columns.clone()
            } else {
                columns
            };
            let compiler = if allowed.is_empty() {
                SqlCompiler::new()
            } else {
                SqlCompiler::new().with_allowed_columns(allowed)
            };
            report(compiler.compile(&expr), |e| match e {
                formula_sql::SqlError::Parse(_) => "parse",
                formula_sql::SqlError::Compile(_) => "compile",
            })
        }

        Command::Functions => {
            print(&json!({ "success": true, "functions": engine.function_definitions() }))?;
            Ok(true)
        }

        Command::Rollup {
            function,
            child,
            relationship,
            field,
            filter,
            parent_id,
        } => {
            let function: RollupFunction = function.parse()?;
            let mut builder = RollupQuery::builder(function, child, relationship)
                .soft_delete_field(config.sql.soft_delete_field.clone());
            if !config.sql.allowed_columns.is_empty() {
                builder = builder.compiler(
                    SqlCompiler::new().with_allowed_columns(config.sql.allowed_columns.clone()),
                );
            }
            if let Some(field) = field {
                builder = builder.summary_field(field);
            }
            if let Some(filter) = filter {
                builder = builder.filter(filter);
            }
            report(builder.build(&parent_id), |_| "rollup")
        }

        Command::Substitute { template, input } => {
            let record = input.record()?;
            print(&json!({ "success": true, "result": substitute(&template, &record) }))?;
            Ok(true)
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_logging_env();
    logging::init();

    info!(command = ?cli.command, "Running formula command");

    if !run(cli, &config)? {
        std::process::exit(1);
    }
    Ok(())
}
