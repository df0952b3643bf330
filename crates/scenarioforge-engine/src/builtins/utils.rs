//! Shared argument helpers for the builtin table.

use scenarioforge_common::{EngineError, EngineErrorKind, Value};

/// Splat arguments one level: any array argument contributes its elements,
/// everything else contributes itself. This is how the aggregate builtins
/// accept both `sum([1,2,3])` and `sum(1, 2, 3)`.
pub(crate) fn splat(args: &[Value]) -> Vec<Value> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    out
}

/// Splat plus numeric coercion.
pub(crate) fn splat_numbers(args: &[Value]) -> Vec<f64> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Array(items) => out.extend(items.iter().map(Value::to_number)),
            other => out.push(other.to_number()),
        }
    }
    out
}

/// Require an array argument at position `i`.
pub(crate) fn array_arg<'a>(
    name: &str,
    args: &'a [Value],
    i: usize,
) -> Result<&'a [Value], EngineError> {
    match args.get(i) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(EngineError::new(EngineErrorKind::TypeMismatch)
            .with_message(format!("{name}() expects an array, got {}", other.kind_name()))),
        None => Err(EngineError::new(EngineErrorKind::TypeMismatch)
            .with_message(format!("{name}() is missing its array argument"))),
    }
}

/// Numeric coercion for the argument at position `i` (Null when absent).
pub(crate) fn number_arg(args: &[Value], i: usize) -> f64 {
    args.get(i).map(Value::to_number).unwrap_or(f64::NAN)
}

/// Text coercion for the argument at position `i`.
pub(crate) fn text_arg(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_text).unwrap_or_default()
}
