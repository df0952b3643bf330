use crate::context::EvalContext;
use crate::function::FunctionContext;
use crate::rng::SharedRng;
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use scenarioforge_expr::{Expr, ExprKind};

/// Tree-walking evaluator for parsed expressions.
///
/// Borrows its context and RNG: one interpreter per kernel invocation, all
/// sharing the run's RNG stream.
pub struct Interpreter<'a> {
    pub context: &'a EvalContext,
    pub rng: &'a SharedRng,
}

impl<'a> Interpreter<'a> {
    pub fn new(context: &'a EvalContext, rng: &'a SharedRng) -> Self {
        Self { context, rng }
    }

    /* ===================  public  =================== */

    pub fn evaluate(&self, expr: &Expr) -> Result<Value, EngineError> {
        match &expr.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Variable(name) => self.eval_variable(name),
            ExprKind::Identifier(name) => self.eval_identifier(name),
            ExprKind::Unary { op, operand } => self.eval_unary(op, operand),
            ExprKind::Binary { op, left, right } => self.eval_binary(op, left, right),
            ExprKind::Call { name, args } => self.eval_call(name, args),
            ExprKind::Member { object, field } => self.eval_member(object, field),
            ExprKind::Index { object, index } => self.eval_index(object, index),
            ExprKind::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(consequent)
                } else {
                    self.evaluate(alternate)
                }
            }
            ExprKind::ArrayLit(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.evaluate(item)?);
                }
                Ok(Value::Array(out))
            }
        }
    }

    /* ===================  variables & identifiers  =================== */

    fn eval_variable(&self, name: &str) -> Result<Value, EngineError> {
        self.context.get(name).cloned().ok_or_else(|| {
            EngineError::new(EngineErrorKind::UnknownVariable)
                .with_message(format!("Unknown variable '${name}'"))
        })
    }

    /// Bare identifiers resolve only to the zero-arg named constants. There
    /// is no global scope.
    fn eval_identifier(&self, name: &str) -> Result<Value, EngineError> {
        match name {
            "PI" => Ok(Value::Number(std::f64::consts::PI)),
            "E" => Ok(Value::Number(std::f64::consts::E)),
            _ => Err(EngineError::new(EngineErrorKind::UnknownIdentifier)
                .with_message(format!("Unknown identifier '{name}'"))),
        }
    }

    /* ===================  unary ops  =================== */

    fn eval_unary(&self, op: &str, operand: &Expr) -> Result<Value, EngineError> {
        let v = self.evaluate(operand)?;
        match op {
            "-" => Ok(Value::Number(-v.to_number())),
            "!" => Ok(Value::Boolean(!v.is_truthy())),
            _ => Err(EngineError::new(EngineErrorKind::TypeMismatch)
                .with_message(format!("Unary operator '{op}'"))),
        }
    }

    /* ===================  binary ops  =================== */

    fn eval_binary(&self, op: &str, left: &Expr, right: &Expr) -> Result<Value, EngineError> {
        // Logical operators coerce to boolean and short-circuit.
        if op == "&&" {
            let l = self.evaluate(left)?;
            if !l.is_truthy() {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(self.evaluate(right)?.is_truthy()));
        }
        if op == "||" {
            let l = self.evaluate(left)?;
            if l.is_truthy() {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(self.evaluate(right)?.is_truthy()));
        }

        let l = self.evaluate(left)?;
        let r = self.evaluate(right)?;

        match op {
            // Equality is strict: no coercion between value kinds.
            "==" => Ok(Value::Boolean(strict_eq(&l, &r))),
            "!=" => Ok(Value::Boolean(!strict_eq(&l, &r))),
            // Ordering coerces numerically; NaN comparisons are false.
            "<" => Ok(Value::Boolean(l.to_number() < r.to_number())),
            ">" => Ok(Value::Boolean(l.to_number() > r.to_number())),
            "<=" => Ok(Value::Boolean(l.to_number() <= r.to_number())),
            ">=" => Ok(Value::Boolean(l.to_number() >= r.to_number())),
            // Arithmetic coerces numerically; division by zero follows IEEE.
            "+" => Ok(Value::Number(l.to_number() + r.to_number())),
            "-" => Ok(Value::Number(l.to_number() - r.to_number())),
            "*" => Ok(Value::Number(l.to_number() * r.to_number())),
            "/" => Ok(Value::Number(l.to_number() / r.to_number())),
            "%" => Ok(Value::Number(l.to_number() % r.to_number())),
            "^" => Ok(Value::Number(l.to_number().powf(r.to_number()))),
            _ => Err(EngineError::new(EngineErrorKind::TypeMismatch)
                .with_message(format!("Binary operator '{op}'"))),
        }
    }

    /* ===================  function calls  =================== */

    fn eval_call(&self, name: &str, args: &[Expr]) -> Result<Value, EngineError> {
        let Some(fun) = crate::function_registry::get(name) else {
            return Err(EngineError::new(EngineErrorKind::UnknownFunction)
                .with_message(format!("Unknown function '{name}'")));
        };

        if args.len() < fun.min_args() {
            return Err(EngineError::new(EngineErrorKind::TypeMismatch).with_message(format!(
                "{name}() expects at least {} argument(s), got {}",
                fun.min_args(),
                args.len()
            )));
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate(arg)?);
        }

        fun.eval(&values, &FunctionContext { rng: self.rng })
    }

    /* ===================  member & index access  =================== */

    /// Member access never faults: `null.k` is `null`, and so is a missing
    /// key or a primitive receiver.
    fn eval_member(&self, object: &Expr, field: &str) -> Result<Value, EngineError> {
        let obj = self.evaluate(object)?;
        Ok(match obj {
            Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        })
    }

    fn eval_index(&self, object: &Expr, index: &Expr) -> Result<Value, EngineError> {
        let obj = self.evaluate(object)?;
        let idx = self.evaluate(index)?;
        Ok(match obj {
            Value::Array(items) => {
                let i = idx.to_number();
                if i.is_nan() || i < 0.0 {
                    Value::Null
                } else {
                    items.get(i.floor() as usize).cloned().unwrap_or(Value::Null)
                }
            }
            Value::Object(map) => match idx {
                Value::Text(key) => map.get(&key).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            _ => Value::Null,
        })
    }
}

/// Strict identity on primitives; structural on containers.
pub(crate) fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| strict_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((ka, va), (kb, vb))| ka == kb && strict_eq(va, vb))
        }
        _ => false,
    }
}

/// Evaluate a parsed expression against a context using the process default
/// RNG. Executors thread their own seeded stream instead.
pub fn evaluate(expr: &Expr, context: &EvalContext) -> Result<Value, EngineError> {
    crate::builtins::load_builtins();
    let rng = crate::rng::default_rng();
    Interpreter::new(context, &rng).evaluate(expr)
}
