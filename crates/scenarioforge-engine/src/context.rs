//! Expression evaluation context: the fixed table of `$`-bindings visible to
//! an expression. The executor builds one per kernel invocation; the
//! evaluator only reads it.

use rustc_hash::FxHashMap;
use scenarioforge_common::Value;
use std::collections::BTreeMap;

/// The set of `$`-bindings an expression can see. Keys are stored without
/// the sigil (`inputs`, not `$inputs`). Unknown variables are an evaluation
/// error, so nothing outside this table is reachable from user code.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    vars: FxHashMap<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Builder-style bind.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

/// Convenience: an `$inputs`/`$params`-shaped object from string pairs.
pub fn object<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<BTreeMap<String, Value>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_get() {
        let ctx = EvalContext::new()
            .with("iteration", Value::Number(3.0))
            .with("inputs", object([("x", Value::Number(1.0))]));
        assert_eq!(ctx.get("iteration"), Some(&Value::Number(3.0)));
        assert!(ctx.contains("inputs"));
        assert!(ctx.get("nope").is_none());
    }
}
