//! Statistical builtins. Population formulas throughout; percentile uses
//! linear interpolation between order statistics (shared with the risk
//! metrics module).

use super::utils::splat_numbers;
use crate::function::{Function, FunctionContext};
use crate::function_registry::register_function;
use crate::metrics;
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use std::sync::Arc;

#[derive(Debug)]
pub struct SumFn;

impl Function for SumFn {
    fn name(&self) -> &'static str {
        "sum"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(splat_numbers(args).iter().sum()))
    }
}

#[derive(Debug)]
pub struct MeanFn;

impl Function for MeanFn {
    fn name(&self) -> &'static str {
        "mean"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let xs = splat_numbers(args);
        Ok(Value::Number(xs.iter().sum::<f64>() / xs.len() as f64))
    }
}

#[derive(Debug)]
pub struct MedianFn;

impl Function for MedianFn {
    fn name(&self) -> &'static str {
        "median"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let mut xs = splat_numbers(args);
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(Value::Number(metrics::median_of_sorted(&xs)))
    }
}

#[derive(Debug)]
pub struct StdFn;

impl Function for StdFn {
    fn name(&self) -> &'static str {
        "std"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(
            metrics::population_variance(&splat_numbers(args)).sqrt(),
        ))
    }
}

#[derive(Debug)]
pub struct VarianceFn;

impl Function for VarianceFn {
    fn name(&self) -> &'static str {
        "variance"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(metrics::population_variance(&splat_numbers(
            args,
        ))))
    }
}

#[derive(Debug)]
pub struct PercentileFn;

impl Function for PercentileFn {
    fn name(&self) -> &'static str {
        "percentile"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let (data, p) = match args {
            [Value::Array(items), p] => (items.as_slice(), p.to_number()),
            _ => {
                return Err(EngineError::new(EngineErrorKind::TypeMismatch)
                    .with_message("percentile() expects (array, p)"));
            }
        };
        if !(0.0..=100.0).contains(&p) {
            return Err(EngineError::new(EngineErrorKind::IndexOutOfRange)
                .with_message(format!("percentile p must be in [0, 100], got {p}")));
        }
        let mut xs: Vec<f64> = data.iter().map(Value::to_number).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(Value::Number(metrics::percentile_of_sorted(&xs, p)))
    }
}

#[derive(Debug)]
pub struct CountFn;

impl Function for CountFn {
    fn name(&self) -> &'static str {
        "count"
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(super::utils::splat(args).len() as f64))
    }
}

#[derive(Debug)]
pub struct ProductFn;

impl Function for ProductFn {
    fn name(&self) -> &'static str {
        "product"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        Ok(Value::Number(splat_numbers(args).iter().product()))
    }
}

pub fn register_builtins() {
    register_function(Arc::new(SumFn));
    register_function(Arc::new(MeanFn));
    register_function(Arc::new(MedianFn));
    register_function(Arc::new(StdFn));
    register_function(Arc::new(VarianceFn));
    register_function(Arc::new(PercentileFn));
    register_function(Arc::new(CountFn));
    register_function(Arc::new(ProductFn));
}
