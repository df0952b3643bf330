//! Array builtins. `length` also covers text, matching its double listing
//! in the function table.

use super::utils::{array_arg, number_arg};
use crate::function::{Function, FunctionContext};
use crate::function_registry::register_function;
use crate::interpreter::strict_eq;
use scenarioforge_common::{EngineError, Value};
use std::sync::Arc;

#[derive(Debug)]
pub struct LengthFn;

impl Function for LengthFn {
    fn name(&self) -> &'static str {
        "length"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let n = match &args[0] {
            Value::Array(items) => items.len(),
            Value::Text(s) => s.chars().count(),
            Value::Object(map) => map.len(),
            _ => 0,
        };
        Ok(Value::Number(n as f64))
    }
}

#[derive(Debug)]
pub struct FirstFn;

impl Function for FirstFn {
    fn name(&self) -> &'static str {
        "first"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("first", args, 0)?;
        Ok(items.first().cloned().unwrap_or(Value::Null))
    }
}

#[derive(Debug)]
pub struct LastFn;

impl Function for LastFn {
    fn name(&self) -> &'static str {
        "last"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("last", args, 0)?;
        Ok(items.last().cloned().unwrap_or(Value::Null))
    }
}

/// Resolve a possibly-negative index against a length, slice-style.
fn resolve_index(i: f64, len: usize) -> usize {
    if i.is_nan() {
        return 0;
    }
    let i = i.trunc() as i64;
    if i < 0 {
        (len as i64 + i).max(0) as usize
    } else {
        (i as usize).min(len)
    }
}

#[derive(Debug)]
pub struct SliceFn;

impl Function for SliceFn {
    fn name(&self) -> &'static str {
        "slice"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("slice", args, 0)?;
        let start = resolve_index(number_arg(args, 1), items.len());
        let end = if args.len() > 2 {
            resolve_index(number_arg(args, 2), items.len())
        } else {
            items.len()
        };
        if start >= end {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(Value::Array(items[start..end].to_vec()))
    }
}

#[derive(Debug)]
pub struct ReverseFn;

impl Function for ReverseFn {
    fn name(&self) -> &'static str {
        "reverse"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let mut items = array_arg("reverse", args, 0)?.to_vec();
        items.reverse();
        Ok(Value::Array(items))
    }
}

#[derive(Debug)]
pub struct SortFn;

impl Function for SortFn {
    fn name(&self) -> &'static str {
        "sort"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let mut items = array_arg("sort", args, 0)?.to_vec();
        // ascending numeric order; NaN coercions sort last
        items.sort_by(|a, b| {
            let (x, y) = (a.to_number(), b.to_number());
            x.partial_cmp(&y)
                .unwrap_or_else(|| x.is_nan().cmp(&y.is_nan()))
        });
        Ok(Value::Array(items))
    }
}

#[derive(Debug)]
pub struct UniqueFn;

impl Function for UniqueFn {
    fn name(&self) -> &'static str {
        "unique"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("unique", args, 0)?;
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !out.iter().any(|seen| strict_eq(seen, item)) {
                out.push(item.clone());
            }
        }
        Ok(Value::Array(out))
    }
}

#[derive(Debug)]
pub struct FlattenFn;

impl Function for FlattenFn {
    fn name(&self) -> &'static str {
        "flatten"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("flatten", args, 0)?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Array(inner) => out.extend(inner.iter().cloned()),
                other => out.push(other.clone()),
            }
        }
        Ok(Value::Array(out))
    }
}

#[derive(Debug)]
pub struct ContainsFn;

impl Function for ContainsFn {
    fn name(&self) -> &'static str {
        "contains"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("contains", args, 0)?;
        Ok(Value::Boolean(
            items.iter().any(|item| strict_eq(item, &args[1])),
        ))
    }
}

#[derive(Debug)]
pub struct IndexOfFn;

impl Function for IndexOfFn {
    fn name(&self) -> &'static str {
        "indexOf"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(&self, args: &[Value], _ctx: &FunctionContext) -> Result<Value, EngineError> {
        let items = array_arg("indexOf", args, 0)?;
        let idx = items
            .iter()
            .position(|item| strict_eq(item, &args[1]))
            .map(|i| i as f64)
            .unwrap_or(-1.0);
        Ok(Value::Number(idx))
    }
}

pub fn register_builtins() {
    register_function(Arc::new(LengthFn));
    register_function(Arc::new(FirstFn));
    register_function(Arc::new(LastFn));
    register_function(Arc::new(SliceFn));
    register_function(Arc::new(ReverseFn));
    register_function(Arc::new(SortFn));
    register_function(Arc::new(UniqueFn));
    register_function(Arc::new(FlattenFn));
    register_function(Arc::new(ContainsFn));
    register_function(Arc::new(IndexOfFn));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SharedRng;

    fn call(f: &dyn Function, args: &[Value]) -> Value {
        let rng = SharedRng::seeded(1);
        f.eval(args, &FunctionContext { rng: &rng }).unwrap()
    }

    fn arr(xs: &[f64]) -> Value {
        Value::Array(xs.iter().map(|&x| Value::Number(x)).collect())
    }

    #[test]
    fn length_covers_arrays_and_text() {
        assert_eq!(call(&LengthFn, &[arr(&[1.0, 2.0])]), Value::Number(2.0));
        assert_eq!(call(&LengthFn, &[Value::Text("abc".into())]), Value::Number(3.0));
        assert_eq!(call(&LengthFn, &[Value::Null]), Value::Number(0.0));
    }

    #[test]
    fn slice_supports_negative_indices() {
        let data = arr(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            call(&SliceFn, &[data.clone(), Value::Number(1.0), Value::Number(3.0)]),
            arr(&[2.0, 3.0])
        );
        assert_eq!(
            call(&SliceFn, &[data.clone(), Value::Number(-2.0)]),
            arr(&[3.0, 4.0])
        );
        assert_eq!(
            call(&SliceFn, &[data, Value::Number(3.0), Value::Number(1.0)]),
            arr(&[])
        );
    }

    #[test]
    fn sort_is_ascending_numeric() {
        assert_eq!(
            call(&SortFn, &[arr(&[3.0, 1.0, 2.0])]),
            arr(&[1.0, 2.0, 3.0])
        );
    }

    #[test]
    fn unique_preserves_first_occurrence() {
        assert_eq!(
            call(&UniqueFn, &[arr(&[2.0, 1.0, 2.0, 1.0])]),
            arr(&[2.0, 1.0])
        );
    }

    #[test]
    fn flatten_is_one_level() {
        let nested = Value::Array(vec![
            arr(&[1.0, 2.0]),
            Value::Array(vec![arr(&[3.0])]),
            Value::Number(4.0),
        ]);
        let flat = call(&FlattenFn, &[nested]);
        assert_eq!(
            flat,
            Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.0),
                arr(&[3.0]),
                Value::Number(4.0)
            ])
        );
    }

    #[test]
    fn contains_and_index_of_use_strict_equality() {
        let data = Value::Array(vec![Value::Number(1.0), Value::Text("1".into())]);
        assert_eq!(
            call(&ContainsFn, &[data.clone(), Value::Text("1".into())]),
            Value::Boolean(true)
        );
        assert_eq!(
            call(&IndexOfFn, &[data.clone(), Value::Text("1".into())]),
            Value::Number(1.0)
        );
        assert_eq!(
            call(&IndexOfFn, &[data, Value::Boolean(true)]),
            Value::Number(-1.0)
        );
    }
}
