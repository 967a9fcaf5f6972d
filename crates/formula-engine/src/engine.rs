//! Interpreter entry point and program cache

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use formula_ast::parse;
use formula_registry::{FunctionDefinition, FunctionError, FunctionRegistry, Value};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::context::{Context, FormulaContext};
use crate::error::{EngineError, RuntimeError};
use crate::program::Program;

/// Registry and cached programs live under one lock so that registration,
/// the epoch bump and cache invalidation happen together.
struct EngineState {
    registry: FunctionRegistry,
    programs: HashMap<String, Arc<Program>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub compilations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cached_programs: usize,
    pub epoch: u64,
}

pub struct Engine {
    state: RwLock<EngineState>,
    compilations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_registry(FunctionRegistry::new())
    }

    pub fn with_registry(registry: FunctionRegistry) -> Self {
        Self {
            state: RwLock::new(EngineState {
                registry,
                programs: HashMap::new(),
            }),
            compilations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Evaluates `expr` against `ctx`.
    ///
    /// The compiled program is cached by expression text under the current
    /// registry epoch. Runtime errors are never cached.
    pub fn evaluate(&self, expr: &str, ctx: &Context) -> Result<Value, EngineError> {
        let program = self.program(expr)?;
        Ok(program.run(ctx)?)
    }

    /// Succeeds iff `evaluate` would not fail with a parse or compile error.
    pub fn validate(&self, expr: &str) -> Result<(), EngineError> {
        self.program(expr).map(|_| ())
    }

    pub fn evaluate_formula(&self, expr: &str, ctx: &FormulaContext) -> Result<Value, EngineError> {
        self.evaluate(expr, &ctx.flatten())
    }

    /// Evaluates a validation rule or flow condition; the result must be a boolean.
    pub fn evaluate_condition(&self, expr: &str, ctx: &Context) -> Result<bool, EngineError> {
        let value = self.evaluate(expr, ctx)?;
        value.as_bool().ok_or_else(|| {
            EngineError::Runtime(RuntimeError::NotBoolean {
                context: "condition".to_string(),
                actual: value.kind(),
            })
        })
    }

    /// Adds or replaces a function. Every cached program is dropped.
    pub fn register_function<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        let mut state = self.state.write();
        let replaced = state.registry.register_fn(name, f).is_some();
        let dropped = state.programs.len();
        state.programs.clear();

        info!(
            function = %name.to_ascii_uppercase(),
            replaced,
            epoch = state.registry.epoch(),
            dropped_programs = dropped,
            "Function registered"
        );
    }

    /// Drops every cached program without bumping the epoch.
    pub fn clear_cache(&self) {
        let mut state = self.state.write();
        let dropped = state.programs.len();
        state.programs.clear();
        info!(dropped_programs = dropped, "Formula cache cleared");
    }

    pub fn epoch(&self) -> u64 {
        self.state.read().registry.epoch()
    }

    pub fn function_definitions(&self) -> Vec<FunctionDefinition> {
        self.state.read().registry.definitions()
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            compilations: self.compilations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cached_programs: state.programs.len(),
            epoch: state.registry.epoch(),
        }
    }

    /// Returns the cached program for `expr`, compiling it on a miss.
    fn program(&self, expr: &str) -> Result<Arc<Program>, EngineError> {
        if let Some(program) = self.state.read().programs.get(expr) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            trace!(expr, "Program cache hit");
            return Ok(Arc::clone(program));
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // Parsing does not depend on the registry, so it runs outside the lock.
        let ast = parse(expr)?;

        let mut state = self.state.write();
        if let Some(program) = state.programs.get(expr) {
            return Ok(Arc::clone(program));
        }

        let program = Arc::new(Program::compile(expr, &ast, &state.registry)?);
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(
            expr,
            fingerprint = %ast.fingerprint(),
            epoch = program.epoch(),
            "Compiled formula"
        );

        state.programs.insert(expr.to_string(), Arc::clone(&program));
        Ok(program)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_evaluate_builtins() {
        let engine = Engine::new();

        let c = ctx(&[("score", Value::Int(80)), ("name", Value::from("Nexus"))]);
        assert_eq!(
            engine.evaluate("IF(score > 50, 'Pass', 'Fail')", &c).unwrap(),
            Value::from("Pass")
        );
        assert_eq!(engine.evaluate("LEN(name)", &c).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_second_call_is_cache_hit() {
        let engine = Engine::new();
        let c = ctx(&[("a", Value::Int(2))]);

        let first = engine.evaluate("a * 21", &c).unwrap();
        let second = engine.evaluate("a * 21", &c).unwrap();

        assert_eq!(first, second);
        let stats = engine.stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cached_programs, 1);
    }

    #[test]
    fn test_errors_are_tagged_and_not_cached() {
        let engine = Engine::new();

        let err = engine.evaluate("a ==", &Context::new()).unwrap_err();
        assert_eq!(err.kind(), "parse");

        let err = engine.evaluate("NOPE(1)", &Context::new()).unwrap_err();
        assert_eq!(err.kind(), "compile");

        let err = engine.evaluate("missing + 1", &Context::new()).unwrap_err();
        assert_eq!(err.kind(), "runtime");

        // Only the program that compiled is cached
        assert_eq!(engine.stats().cached_programs, 1);
    }

    #[test]
    fn test_validate() {
        let engine = Engine::new();
        assert!(engine.validate("Amount > 1000 && Stage == 'Closed Won'").is_ok());
        assert!(matches!(
            engine.validate("Amount > 1000 AND Stage == 'Closed Won'"),
            Err(EngineError::Parse(_))
        ));
        assert!(matches!(
            engine.validate("LEN(a, b)"),
            Err(EngineError::Compile(_))
        ));
        assert_eq!(engine.stats().compilations, 1);
    }

    #[test]
    fn test_evaluate_condition() {
        let engine = Engine::new();
        let c = ctx(&[("Amount", Value::Int(1500))]);

        assert!(engine.evaluate_condition("Amount > 1000", &c).unwrap());
        assert!(!engine.evaluate_condition("Amount > 2000", &c).unwrap());
        assert!(matches!(
            engine.evaluate_condition("Amount", &c),
            Err(EngineError::Runtime(RuntimeError::NotBoolean { actual: "int", .. }))
        ));
    }

    #[test]
    fn test_register_function_invalidates_cache() {
        let engine = Engine::new();
        engine.register_function("BONUS", |_| Ok(Value::Int(1)));
        assert_eq!(engine.evaluate("BONUS() + 1", &Context::new()).unwrap(), Value::Int(2));
        assert_eq!(engine.epoch(), 1);

        engine.register_function("bonus", |_| Ok(Value::Int(10)));
        assert_eq!(engine.stats().cached_programs, 0);
        assert_eq!(engine.evaluate("BONUS() + 1", &Context::new()).unwrap(), Value::Int(11));
        assert_eq!(engine.stats().compilations, 2);
        assert_eq!(engine.epoch(), 2);
    }

    #[test]
    fn test_clear_cache_keeps_epoch() {
        let engine = Engine::new();
        engine.evaluate("1 + 1", &Context::new()).unwrap();
        engine.clear_cache();

        let stats = engine.stats();
        assert_eq!(stats.cached_programs, 0);
        assert_eq!(stats.epoch, 0);
    }

    #[test]
    fn test_function_definitions() {
        let engine = Engine::new();
        let defs = engine.function_definitions();
        let round = defs.iter().find(|d| d.name == "ROUND").unwrap();
        assert_eq!(round.category, "Math");
        assert_eq!(round.usage, "ROUND(number, precision)");
    }
}
