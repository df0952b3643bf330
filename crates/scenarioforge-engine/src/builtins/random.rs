//! Volatile builtins.

use crate::function::{FnCaps, Function, FunctionContext};
use crate::function_registry::register_function;
use scenarioforge_common::{EngineError, Value};
use std::sync::Arc;

/// Returns a uniformly distributed pseudo-random number in `[0, 1)`.
///
/// Draws from the run's shared RNG stream, so a seeded simulation gets the
/// same sequence on every replay, interleaved with distribution sampling in
/// node-evaluation order.
#[derive(Debug)]
pub struct RandomFn;

impl Function for RandomFn {
    fn name(&self) -> &'static str {
        "random"
    }

    fn caps(&self) -> FnCaps {
        FnCaps::VOLATILE
    }

    fn eval(&self, _args: &[Value], ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(ctx.rng.next_f64()))
    }
}

pub fn register_builtins() {
    register_function(Arc::new(RandomFn));
}
