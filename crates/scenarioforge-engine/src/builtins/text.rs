//! String builtins. Indices are character-based.

use super::utils::{number_arg, text_arg};
use crate::function::{Function, FunctionContext};
use crate::function_registry::register_function;
use scenarioforge_common::{EngineError, Value};
use std::sync::Arc;

#[derive(Debug)]
pub struct ConcatFn;

impl Function for ConcatFn {
    fn name(&self) -> &'static str {
        "concat"
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let mut out = String::new();
        for arg in args {
            out.push_str(&arg.to_text());
        }
        Ok(Value::Text(out))
    }
}

macro_rules! unary_text_fn {
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
                let f: fn(&str) -> String = $op;
                Ok(Value::Text(f(&text_arg(args, 0))))
            }
        }
    };
}

unary_text_fn!(UpperFn, "upper", |s| s.to_uppercase());
unary_text_fn!(LowerFn, "lower", |s| s.to_lowercase());
unary_text_fn!(TrimFn, "trim", |s| s.trim().to_string());

#[derive(Debug)]
pub struct SubstringFn;

impl Function for SubstringFn {
    fn name(&self) -> &'static str {
        "substring"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let s = text_arg(args, 0);
        let chars: Vec<char> = s.chars().collect();
        let clamp = |x: f64| {
            if x.is_nan() {
                0
            } else {
                (x.trunc().max(0.0) as usize).min(chars.len())
            }
        };
        let mut start = clamp(number_arg(args, 1));
        let mut end = if args.len() > 2 {
            clamp(number_arg(args, 2))
        } else {
            chars.len()
        };
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        Ok(Value::Text(chars[start..end].iter().collect()))
    }
}

#[derive(Debug)]
pub struct ReplaceFn;

impl Function for ReplaceFn {
    fn name(&self) -> &'static str {
        "replace"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let s = text_arg(args, 0);
        let from = text_arg(args, 1);
        let to = text_arg(args, 2);
        // first occurrence only
        Ok(Value::Text(s.replacen(&from, &to, 1)))
    }
}

#[derive(Debug)]
pub struct SplitFn;

impl Function for SplitFn {
    fn name(&self) -> &'static str {
        "split"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let s = text_arg(args, 0);
        let sep = text_arg(args, 1);
        let parts: Vec<Value> = if sep.is_empty() {
            s.chars().map(|c| Value::Text(c.to_string())).collect()
        } else {
            s.split(&sep).map(|p| Value::Text(p.to_string())).collect()
        };
        Ok(Value::Array(parts))
    }
}

#[derive(Debug)]
pub struct StartsWithFn;

impl Function for StartsWithFn {
    fn name(&self) -> &'static str {
        "startsWith"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Boolean(
            text_arg(args, 0).starts_with(&text_arg(args, 1)),
        ))
    }
}

#[derive(Debug)]
pub struct EndsWithFn;

impl Function for EndsWithFn {
    fn name(&self) -> &'static str {
        "endsWith"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Boolean(
            text_arg(args, 0).ends_with(&text_arg(args, 1)),
        ))
    }
}

pub fn register_builtins() {
    register_function(Arc::new(ConcatFn));
    register_function(Arc::new(UpperFn));
    register_function(Arc::new(LowerFn));
    register_function(Arc::new(TrimFn));
    register_function(Arc::new(SubstringFn));
    register_function(Arc::new(ReplaceFn));
    register_function(Arc::new(SplitFn));
    register_function(Arc::new(StartsWithFn));
    register_function(Arc::new(EndsWithFn));
}
