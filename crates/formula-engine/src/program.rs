//! Compiled programs
//!
//! A [`Program`] is the AST with every call site resolved against the
//! registry. Resolution happens once per expression per epoch; evaluation
//! then never touches the registry or its lock.

use formula_ast::{BinaryOp, Call, Expr, Path};
use formula_registry::{FunctionRegistry, Implementation, NativeFn, Value};

use crate::context::Context;
use crate::error::{CompileError, RuntimeError};
use crate::eval;

pub(crate) enum Node {
    Literal(Value),
    Identifier(Path),
    Neg(Box<Node>),
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Call {
        name: String,
        function: NativeFn,
        args: Vec<Node>,
    },
    /// `IF(cond, then, otherwise)`; only the selected branch runs.
    Conditional {
        condition: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
}

pub struct Program {
    source: String,
    root: Node,
    epoch: u64,
    functions: Vec<String>,
}

impl Program {
    pub fn compile(
        source: &str,
        expr: &Expr,
        registry: &FunctionRegistry,
    ) -> Result<Self, CompileError> {
        Ok(Self {
            source: source.to_string(),
            root: bind(expr, registry)?,
            epoch: registry.epoch(),
            functions: expr.function_names(),
        })
    }

    pub fn run(&self, ctx: &Context) -> Result<Value, RuntimeError> {
        eval::eval(&self.root, ctx)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Registry epoch the call sites were resolved under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Upper-cased names of the functions this program calls.
    pub fn functions(&self) -> &[String] {
        &self.functions
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .field("epoch", &self.epoch)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

fn bind(expr: &Expr, registry: &FunctionRegistry) -> Result<Node, CompileError> {
    match expr {
        Expr::Literal { value } => Ok(Node::Literal(Value::from(value))),
        Expr::Identifier { path } => Ok(Node::Identifier(path.clone())),
        Expr::Unary { operand, .. } => Ok(Node::Neg(Box::new(bind(operand, registry)?))),
        Expr::Binary { op, left, right } => Ok(Node::Binary {
            op: *op,
            left: Box::new(bind(left, registry)?),
            right: Box::new(bind(right, registry)?),
        }),
        Expr::Call(call) => bind_call(call, registry),
    }
}

fn bind_call(call: &Call, registry: &FunctionRegistry) -> Result<Node, CompileError> {
    let entry = registry
        .lookup(&call.name)
        .ok_or_else(|| CompileError::UnknownFunction(call.name.to_ascii_uppercase()))?;

    if !entry.arity.accepts(call.args.len()) {
        return Err(CompileError::Arity {
            function: entry.name.clone(),
            expected: entry.arity.to_string(),
            actual: call.args.len(),
        });
    }

    // Literal arguments can be checked now; everything else waits for run time.
    for (index, arg) in call.args.iter().enumerate() {
        if let Expr::Literal { value } = arg {
            let kind = entry.param_kind(index);
            if !kind.accepts(&Value::from(value)) {
                return Err(CompileError::ArgumentType {
                    function: entry.name.clone(),
                    position: index + 1,
                    expected: kind.describe(),
                    actual: value.kind(),
                });
            }
        }
    }

    let mut args = call
        .args
        .iter()
        .map(|arg| bind(arg, registry))
        .collect::<Result<Vec<_>, _>>()?;

    match &entry.implementation {
        Implementation::Native(function) => Ok(Node::Call {
            name: entry.name.clone(),
            function: function.clone(),
            args,
        }),
        Implementation::Conditional => {
            // Arity was checked above, so there are exactly three nodes.
            let otherwise = args.pop();
            let then = args.pop();
            let condition = args.pop();
            match (condition, then, otherwise) {
                (Some(condition), Some(then), Some(otherwise)) => Ok(Node::Conditional {
                    condition: Box::new(condition),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                }),
                _ => Err(CompileError::Arity {
                    function: entry.name.clone(),
                    expected: "3".to_string(),
                    actual: call.args.len(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_ast::parse;

    fn compile(source: &str) -> Result<Program, CompileError> {
        let registry = FunctionRegistry::new();
        Program::compile(source, &parse(source).unwrap(), &registry)
    }

    #[test]
    fn test_compile_records_functions_and_epoch() {
        let program = compile("IF(LEN(name) > 3, upper(name), lower(name))").unwrap();
        assert_eq!(program.functions(), ["IF", "LEN", "UPPER", "LOWER"]);
        assert_eq!(program.epoch(), 0);
        assert_eq!(program.source(), "IF(LEN(name) > 3, upper(name), lower(name))");
    }

    #[test]
    fn test_unknown_function() {
        let err = compile("SHA256(password)").unwrap_err();
        assert_eq!(err, CompileError::UnknownFunction("SHA256".to_string()));
        assert!(compile("BCRYPT(password)").is_ok());
    }

    #[test]
    fn test_arity_mismatch() {
        assert!(matches!(
            compile("ROUND(3.14159)"),
            Err(CompileError::Arity { actual: 1, .. })
        ));
        assert!(matches!(
            compile("TODAY(1)"),
            Err(CompileError::Arity { actual: 1, .. })
        ));
        assert!(matches!(
            compile("IF(true, 1)"),
            Err(CompileError::Arity { actual: 2, .. })
        ));
    }

    #[test]
    fn test_literal_argument_kinds() {
        assert!(matches!(
            compile("LEN(5)"),
            Err(CompileError::ArgumentType { position: 1, expected: "string", .. })
        ));
        assert!(matches!(
            compile("IF('x', 1, 2)"),
            Err(CompileError::ArgumentType { position: 1, expected: "boolean", .. })
        ));
        assert!(matches!(
            compile("ROUND(amount, 'two')"),
            Err(CompileError::ArgumentType { position: 2, .. })
        ));
        assert!(compile("ROUND('2.5', 0)").is_ok());
        assert!(compile("LEN(null)").is_ok());
        assert!(compile("DATE_ADD('2024-01-01', '3')").is_ok());
    }

    #[test]
    fn test_custom_functions_are_variadic() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("score", |args| Ok(Value::Int(args.len() as i64)));

        let expr = parse("SCORE(1, 'a', x, null)").unwrap();
        let program = Program::compile("SCORE(1, 'a', x, null)", &expr, &registry).unwrap();
        assert_eq!(program.epoch(), 1);
    }
}
