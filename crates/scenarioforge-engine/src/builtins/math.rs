//! Numeric builtins: elementary math, powers, trigonometry, and the named
//! constants.

use super::utils::{number_arg, splat_numbers};
use crate::function::{Function, FunctionContext};
use crate::function_registry::register_function;
use scenarioforge_common::{EngineError, Value};
use std::sync::Arc;

/// Defines a one-argument numeric function struct.
macro_rules! unary_math_fn {
    ($ty:ident, $name:literal, $op:expr) => {
        #[derive(Debug)]
        pub struct $ty;

        impl Function for $ty {
            fn name(&self) -> &'static str {
                $name
            }
            fn min_args(&self) -> usize {
                1
            }
            fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
                let f: fn(f64) -> f64 = $op;
                Ok(Value::Number(f(number_arg(args, 0))))
            }
        }
    };
}

unary_math_fn!(AbsFn, "abs", |n| n.abs());
unary_math_fn!(CeilFn, "ceil", |n| n.ceil());
unary_math_fn!(FloorFn, "floor", |n| n.floor());
unary_math_fn!(TruncFn, "trunc", |n| n.trunc());
unary_math_fn!(SignFn, "sign", |n| if n == 0.0 { 0.0 } else { n.signum() });
unary_math_fn!(SqrtFn, "sqrt", |n| n.sqrt());
unary_math_fn!(CbrtFn, "cbrt", |n| n.cbrt());
unary_math_fn!(ExpFn, "exp", |n| n.exp());
unary_math_fn!(LogFn, "log", |n| n.ln());
unary_math_fn!(Log10Fn, "log10", |n| n.log10());
unary_math_fn!(Log2Fn, "log2", |n| n.log2());
unary_math_fn!(SinFn, "sin", |n| n.sin());
unary_math_fn!(CosFn, "cos", |n| n.cos());
unary_math_fn!(TanFn, "tan", |n| n.tan());
unary_math_fn!(AsinFn, "asin", |n| n.asin());
unary_math_fn!(AcosFn, "acos", |n| n.acos());
unary_math_fn!(AtanFn, "atan", |n| n.atan());

/// Round half away from zero, optionally to `d` decimal digits:
/// `round(3.5) == 4`, `round(-3.5) == -4`, `round(2.125, 2) == 2.13`.
pub(crate) fn round_half_away(x: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let scaled = x * factor;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };
    rounded / factor
}

#[derive(Debug)]
pub struct RoundFn;

impl Function for RoundFn {
    fn name(&self) -> &'static str {
        "round"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let x = number_arg(args, 0);
        let digits = if args.len() > 1 {
            number_arg(args, 1).trunc() as i32
        } else {
            0
        };
        Ok(Value::Number(round_half_away(x, digits)))
    }
}

#[derive(Debug)]
pub struct PowFn;

impl Function for PowFn {
    fn name(&self) -> &'static str {
        "pow"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(number_arg(args, 0).powf(number_arg(args, 1))))
    }
}

#[derive(Debug)]
pub struct Atan2Fn;

impl Function for Atan2Fn {
    fn name(&self) -> &'static str {
        "atan2"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        // atan2(y, x)
        Ok(Value::Number(number_arg(args, 0).atan2(number_arg(args, 1))))
    }
}

#[derive(Debug)]
pub struct MinFn;

impl Function for MinFn {
    fn name(&self) -> &'static str {
        "min"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let n = splat_numbers(args)
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        Ok(Value::Number(n))
    }
}

#[derive(Debug)]
pub struct MaxFn;

impl Function for MaxFn {
    fn name(&self) -> &'static str {
        "max"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let n = splat_numbers(args)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(Value::Number(n))
    }
}

#[derive(Debug)]
pub struct ClampFn;

impl Function for ClampFn {
    fn name(&self) -> &'static str {
        "clamp"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let x = number_arg(args, 0);
        let lo = number_arg(args, 1);
        let hi = number_arg(args, 2);
        Ok(Value::Number(x.max(lo).min(hi)))
    }
}

/// `PI` and `E` are callable as zero-arg functions; the evaluator also
/// resolves them as bare identifiers.
#[derive(Debug)]
pub struct PiFn;

impl Function for PiFn {
    fn name(&self) -> &'static str {
        "PI"
    }
    fn eval(&self, _args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(std::f64::consts::PI))
    }
}

#[derive(Debug)]
pub struct EulerFn;

impl Function for EulerFn {
    fn name(&self) -> &'static str {
        "E"
    }
    fn eval(&self, _args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(std::f64::consts::E))
    }
}

pub fn register_builtins() {
    register_function(Arc::new(AbsFn));
    register_function(Arc::new(CeilFn));
    register_function(Arc::new(FloorFn));
    register_function(Arc::new(RoundFn));
    register_function(Arc::new(TruncFn));
    register_function(Arc::new(SignFn));
    register_function(Arc::new(SqrtFn));
    register_function(Arc::new(CbrtFn));
    register_function(Arc::new(PowFn));
    register_function(Arc::new(ExpFn));
    register_function(Arc::new(LogFn));
    register_function(Arc::new(Log10Fn));
    register_function(Arc::new(Log2Fn));
    register_function(Arc::new(SinFn));
    register_function(Arc::new(CosFn));
    register_function(Arc::new(TanFn));
    register_function(Arc::new(AsinFn));
    register_function(Arc::new(AcosFn));
    register_function(Arc::new(AtanFn));
    register_function(Arc::new(Atan2Fn));
    register_function(Arc::new(MinFn));
    register_function(Arc::new(MaxFn));
    register_function(Arc::new(ClampFn));
    register_function(Arc::new(PiFn));
    register_function(Arc::new(EulerFn));
}
