//! Logical and type-inspection builtins.

use crate::function::{Function, FunctionContext};
use crate::function_registry::register_function;
use scenarioforge_common::{EngineError, Value};
use std::sync::Arc;

#[derive(Debug)]
pub struct IfFn;

impl Function for IfFn {
    fn name(&self) -> &'static str {
        "if"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(if args[0].is_truthy() {
            args[1].clone()
        } else {
            args[2].clone()
        })
    }
}

#[derive(Debug)]
pub struct AndFn;

impl Function for AndFn {
    fn name(&self) -> &'static str {
        "and"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Boolean(args.iter().all(Value::is_truthy)))
    }
}

#[derive(Debug)]
pub struct OrFn;

impl Function for OrFn {
    fn name(&self) -> &'static str {
        "or"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Boolean(args.iter().any(Value::is_truthy)))
    }
}

#[derive(Debug)]
pub struct NotFn;

impl Function for NotFn {
    fn name(&self) -> &'static str {
        "not"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Boolean(!args[0].is_truthy()))
    }
}

macro_rules! predicate_fn {
    ($ty:ident, $name:literal, $pat:pat) => {
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
                Ok(Value::Boolean(matches!(&args[0], $pat)))
            }
        }
    };
}

predicate_fn!(IsNullFn, "isNull", Value::Null);
predicate_fn!(IsNumberFn, "isNumber", Value::Number(_));
predicate_fn!(IsStringFn, "isString", Value::Text(_));
predicate_fn!(IsArrayFn, "isArray", Value::Array(_));

#[derive(Debug)]
pub struct CoalesceFn;

impl Function for CoalesceFn {
    fn name(&self) -> &'static str {
        "coalesce"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null))
    }
}

pub fn register_builtins() {
    register_function(Arc::new(IfFn));
    register_function(Arc::new(AndFn));
    register_function(Arc::new(OrFn));
    register_function(Arc::new(NotFn));
    register_function(Arc::new(IsNullFn));
    register_function(Arc::new(IsNumberFn));
    register_function(Arc::new(IsStringFn));
    register_function(Arc::new(IsArrayFn));
    register_function(Arc::new(CoalesceFn));
}
