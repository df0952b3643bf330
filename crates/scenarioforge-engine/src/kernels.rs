//! Node kernels: the per-type compute functions, an object-safe trait, and
//! the global registry custom kernels plug into.
//!
//! Dispatch is by the node's type tag first, then by `compute_function`.
//! SUBGRAPH nodes are scheduled by the executor directly because their
//! kernel needs to recurse into it.

use crate::context::EvalContext;
use crate::distribution::DistributionConfig;
use crate::graph::model::Node;
use crate::interpreter::Interpreter;
use crate::rng::SharedRng;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use scenarioforge_expr::Expr;
use std::collections::BTreeMap;
use std::sync::{Arc, Once};

/// Output (and gathered input) values of one node, keyed by port name.
/// Ordered so serialized results are deterministic.
pub type PortValues = BTreeMap<String, Value>;

/// Per-invocation state a kernel may use: the `$`-binding table already
/// populated by the executor, and the run's RNG stream.
pub struct KernelContext<'a> {
    pub eval: &'a EvalContext,
    pub rng: &'a SharedRng,
}

impl KernelContext<'_> {
    /// Parse and evaluate an expression in this kernel's context.
    pub fn evaluate(&self, source: &str) -> Result<Value, EngineError> {
        let ast = parse_expression(source)?;
        Interpreter::new(self.eval, self.rng).evaluate(&ast)
    }
}

pub(crate) fn parse_expression(source: &str) -> Result<Expr, EngineError> {
    scenarioforge_expr::parse(source).map_err(|err| {
        EngineError::new(EngineErrorKind::Parse)
            .with_message(format!("{} (at {})", err.message, err.position))
    })
}

/// A node compute function: pure in the graph sense; it reads its inputs,
/// its node configuration and the context, and produces output port values.
pub trait Kernel: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn compute(
        &self,
        inputs: &PortValues,
        node: &Node,
        ctx: &KernelContext,
    ) -> Result<PortValues, EngineError>;
}

static REG: Lazy<DashMap<String, Arc<dyn Kernel>>> = Lazy::new(DashMap::new);

/// Register a kernel under its name. Process-wide; a node whose type tag or
/// `compute_function` matches dispatches to it.
pub fn register_kernel(kernel: Arc<dyn Kernel>) {
    REG.insert(kernel.name().to_string(), kernel);
}

pub fn get_kernel(name: &str) -> Option<Arc<dyn Kernel>> {
    REG.get(name).map(|k| Arc::clone(k.value()))
}

/// Resolve the kernel for a node: type tag first, then `compute_function`.
pub(crate) fn kernel_for(node: &Node) -> Result<Arc<dyn Kernel>, EngineError> {
    if let Some(kernel) = get_kernel(node.kind.tag()) {
        return Ok(kernel);
    }
    if let Some(name) = &node.compute_function {
        if let Some(kernel) = get_kernel(name) {
            return Ok(kernel);
        }
    }
    Err(EngineError::new(EngineErrorKind::Runtime)
        .with_message(format!("no kernel for node type '{}'", node.kind.tag()))
        .with_node(&node.id))
}

/// Register the builtin kernels. Idempotent.
pub fn load_kernels() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_kernel(Arc::new(ConstantKernel));
        register_kernel(Arc::new(ParameterKernel));
        register_kernel(Arc::new(DistributionKernel));
        register_kernel(Arc::new(TransformerKernel));
        register_kernel(Arc::new(AggregatorKernel));
        register_kernel(Arc::new(DecisionKernel));
        register_kernel(Arc::new(ConstraintKernel));
        register_kernel(Arc::new(OutputKernel));
    });
}

fn one(key: &str, value: Value) -> PortValues {
    let mut out = PortValues::new();
    out.insert(key.to_string(), value);
    out
}

/* ===================  CONSTANT / PARAMETER  =================== */

/// Emits `{output: data.value}` unchanged.
#[derive(Debug)]
pub struct ConstantKernel;

impl Kernel for ConstantKernel {
    fn name(&self) -> &'static str {
        "CONSTANT"
    }

    fn compute(
        &self,
        _inputs: &PortValues,
        node: &Node,
        _ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let value = node.data_value("value").cloned().unwrap_or(Value::Null);
        Ok(one("output", value))
    }
}

/// Emits `{value: data.value}`; min/max/step/default are metadata only.
#[derive(Debug)]
pub struct ParameterKernel;

impl Kernel for ParameterKernel {
    fn name(&self) -> &'static str {
        "PARAMETER"
    }

    fn compute(
        &self,
        _inputs: &PortValues,
        node: &Node,
        _ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let value = node
            .data_value("value")
            .or_else(|| node.data_value("default"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(one("value", value))
    }
}

/* ===================  DISTRIBUTION  =================== */

/// Build a sampler config from a DISTRIBUTION node's inline data. Numeric
/// entries become named parameters; `values`/`probabilities` arrays feed
/// discrete distributions.
pub(crate) fn distribution_config_from(node: &Node) -> Option<DistributionConfig> {
    let kind = node
        .data_text("distributionType")
        .or_else(|| node.data_text("type"))?;
    let mut config = DistributionConfig::new(kind);
    for (key, value) in &node.data {
        if let Value::Number(n) = value {
            config.parameters.insert(key.clone(), *n);
        }
    }
    let numbers = |v: &Value| -> Option<Vec<f64>> {
        v.as_array()
            .map(|items| items.iter().map(Value::to_number).collect())
    };
    config.values = node.data_value("values").and_then(numbers);
    config.probabilities = node.data_value("probabilities").and_then(numbers);
    Some(config)
}

/// Samples the configured distribution with the run's RNG, emitting
/// `{sample}`.
#[derive(Debug)]
pub struct DistributionKernel;

impl Kernel for DistributionKernel {
    fn name(&self) -> &'static str {
        "DISTRIBUTION"
    }

    fn compute(
        &self,
        _inputs: &PortValues,
        node: &Node,
        ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let config = distribution_config_from(node).ok_or_else(|| {
            EngineError::new(EngineErrorKind::Runtime)
                .with_message("distribution node has no distributionType")
                .with_node(&node.id)
        })?;
        let sample = crate::distribution::sample_with(&config, ctx.rng)
            .map_err(|e| e.with_node(&node.id))?;
        Ok(one("sample", Value::Number(sample)))
    }
}

/* ===================  TRANSFORMER  =================== */

/// Evaluates `data.expression` with `$inputs.<name>` bound to each input
/// port value and emits `{result}`. Expression failures fail the node.
#[derive(Debug)]
pub struct TransformerKernel;

impl Kernel for TransformerKernel {
    fn name(&self) -> &'static str {
        "TRANSFORMER"
    }

    fn compute(
        &self,
        _inputs: &PortValues,
        node: &Node,
        ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let source = node.data_text("expression").ok_or_else(|| {
            EngineError::new(EngineErrorKind::Runtime)
                .with_message("transformer node has no expression")
                .with_node(&node.id)
        })?;
        let value = ctx.evaluate(source).map_err(|e| e.with_node(&node.id))?;
        Ok(one("result", value))
    }
}

/* ===================  AGGREGATOR  =================== */

/// Reduces all non-null inputs, in port order, with the configured method.
/// Array-valued ports (fan-in) are splatted into the collection.
#[derive(Debug)]
pub struct AggregatorKernel;

impl Kernel for AggregatorKernel {
    fn name(&self) -> &'static str {
        "AGGREGATOR"
    }

    fn compute(
        &self,
        inputs: &PortValues,
        node: &Node,
        _ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let mut values: Vec<Value> = Vec::new();
        for port in &node.input_ports {
            match inputs.get(&port.name) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    values.extend(items.iter().filter(|v| !v.is_null()).cloned())
                }
                Some(v) => values.push(v.clone()),
            }
        }

        let method = node.data_text("method").unwrap_or("sum");
        let numbers = || values.iter().map(Value::to_number);
        let result = match method {
            "sum" => Value::Number(numbers().sum()),
            "mean" => Value::Number(numbers().sum::<f64>() / values.len() as f64),
            "min" => values
                .iter()
                .min_by(|a, b| {
                    a.to_number()
                        .partial_cmp(&b.to_number())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned()
                .unwrap_or(Value::Null),
            "max" => values
                .iter()
                .max_by(|a, b| {
                    a.to_number()
                        .partial_cmp(&b.to_number())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned()
                .unwrap_or(Value::Null),
            "product" => Value::Number(numbers().product()),
            "count" => Value::Number(values.len() as f64),
            "first" => values.first().cloned().unwrap_or(Value::Null),
            "last" => values.last().cloned().unwrap_or(Value::Null),
            other => {
                return Err(EngineError::new(EngineErrorKind::Runtime)
                    .with_message(format!("unknown aggregation method '{other}'"))
                    .with_node(&node.id));
            }
        };
        Ok(one("result", result))
    }
}

/* ===================  DECISION / CONSTRAINT  =================== */

/// Evaluates `data.condition`; emits `data.trueValue` when truthy, else
/// `data.falseValue`.
#[derive(Debug)]
pub struct DecisionKernel;

impl Kernel for DecisionKernel {
    fn name(&self) -> &'static str {
        "DECISION"
    }

    fn compute(
        &self,
        _inputs: &PortValues,
        node: &Node,
        ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let source = node.data_text("condition").ok_or_else(|| {
            EngineError::new(EngineErrorKind::Runtime)
                .with_message("decision node has no condition")
                .with_node(&node.id)
        })?;
        let verdict = ctx.evaluate(source).map_err(|e| e.with_node(&node.id))?;
        let value = if verdict.is_truthy() {
            node.data_value("trueValue")
                .cloned()
                .unwrap_or(Value::Boolean(true))
        } else {
            node.data_value("falseValue")
                .cloned()
                .unwrap_or(Value::Boolean(false))
        };
        Ok(one("result", value))
    }
}

/// Checks a value against `data.min`/`data.max`. A breach is a data-plane
/// signal, never a run failure: emits `{satisfied, violation, value}`.
#[derive(Debug)]
pub struct ConstraintKernel;

impl Kernel for ConstraintKernel {
    fn name(&self) -> &'static str {
        "CONSTRAINT"
    }

    fn compute(
        &self,
        inputs: &PortValues,
        node: &Node,
        ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let value = match node.data_text("expression") {
            Some(source) => ctx
                .evaluate(source)
                .map_err(|e| e.with_node(&node.id))?
                .to_number(),
            None => inputs
                .get("value")
                .map(Value::to_number)
                .unwrap_or(f64::NAN),
        };

        let min = node.data_number("min");
        let max = node.data_number("max");
        let mut violation = 0.0f64;
        if let Some(min) = min {
            if value < min {
                violation = min - value;
            }
        }
        if let Some(max) = max {
            if value > max {
                violation = violation.max(value - max);
            }
        }

        let mut out = PortValues::new();
        out.insert("satisfied".into(), Value::Boolean(violation == 0.0));
        out.insert("violation".into(), Value::Number(violation));
        out.insert("value".into(), Value::Number(value));
        Ok(out)
    }
}

/* ===================  OUTPUT  =================== */

/// Takes its single input and emits it under `data.label` (default
/// `result`). These are the values the executor captures for callers.
#[derive(Debug)]
pub struct OutputKernel;

impl Kernel for OutputKernel {
    fn name(&self) -> &'static str {
        "OUTPUT"
    }

    fn compute(
        &self,
        inputs: &PortValues,
        node: &Node,
        _ctx: &KernelContext,
    ) -> Result<PortValues, EngineError> {
        let label = node.data_text("label").unwrap_or("result").to_string();
        let value = node
            .input_ports
            .first()
            .and_then(|p| inputs.get(&p.name))
            .or_else(|| inputs.get("value"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(one(&label, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::object;
    use crate::graph::model::{DataType, NodeKind, NodeVisual, Port};

    fn node(kind: NodeKind, data: &[(&str, Value)]) -> Node {
        Node {
            id: "n1".into(),
            kind,
            name: "n1".into(),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            input_ports: vec![Port::new("value", DataType::Any)],
            output_ports: vec![],
            compute_function: None,
            locked: false,
            visual: NodeVisual::default(),
            created_at: 0,
        }
    }

    fn run(kernel: &dyn Kernel, node: &Node, inputs: PortValues) -> PortValues {
        crate::builtins::load_builtins();
        let rng = SharedRng::seeded(1);
        let eval = EvalContext::new().with("inputs", object(inputs.clone()));
        kernel
            .compute(&inputs, node, &KernelContext { eval: &eval, rng: &rng })
            .unwrap()
    }

    #[test]
    fn constant_emits_its_value() {
        let n = node(NodeKind::Constant, &[("value", Value::Number(10.0))]);
        let out = run(&ConstantKernel, &n, PortValues::new());
        assert_eq!(out["output"], Value::Number(10.0));
    }

    #[test]
    fn parameter_falls_back_to_default() {
        let n = node(NodeKind::Parameter, &[("default", Value::Number(3.0))]);
        let out = run(&ParameterKernel, &n, PortValues::new());
        assert_eq!(out["value"], Value::Number(3.0));
    }

    #[test]
    fn transformer_binds_inputs() {
        let n = node(
            NodeKind::Transformer,
            &[("expression", Value::Text("$inputs.value * 2".into()))],
        );
        let mut inputs = PortValues::new();
        inputs.insert("value".into(), Value::Number(21.0));
        let out = run(&TransformerKernel, &n, inputs);
        assert_eq!(out["result"], Value::Number(42.0));
    }

    #[test]
    fn transformer_parse_error_carries_the_node() {
        let n = node(
            NodeKind::Transformer,
            &[("expression", Value::Text("1 +".into()))],
        );
        let rng = SharedRng::seeded(1);
        let eval = EvalContext::new();
        let err = TransformerKernel
            .compute(&PortValues::new(), &n, &KernelContext { eval: &eval, rng: &rng })
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Parse);
        assert_eq!(err.node.as_deref(), Some("n1"));
    }

    #[test]
    fn aggregator_skips_nulls_and_splats_arrays() {
        let mut n = node(NodeKind::Aggregator, &[("method", Value::Text("sum".into()))]);
        n.input_ports = vec![
            Port::new("a", DataType::Any),
            Port::new("b", DataType::Any).multiple(),
            Port::new("c", DataType::Any),
        ];
        let mut inputs = PortValues::new();
        inputs.insert("a".into(), Value::Number(1.0));
        inputs.insert(
            "b".into(),
            Value::Array(vec![Value::Number(2.0), Value::Null, Value::Number(3.0)]),
        );
        inputs.insert("c".into(), Value::Null);
        let out = run(&AggregatorKernel, &n, inputs);
        assert_eq!(out["result"], Value::Number(6.0));
    }

    #[test]
    fn aggregator_first_and_last_respect_port_order() {
        let mut n = node(NodeKind::Aggregator, &[("method", Value::Text("first".into()))]);
        n.input_ports = vec![Port::new("x", DataType::Any), Port::new("y", DataType::Any)];
        let mut inputs = PortValues::new();
        inputs.insert("y".into(), Value::Number(2.0));
        inputs.insert("x".into(), Value::Number(1.0));
        let out = run(&AggregatorKernel, &n, inputs.clone());
        assert_eq!(out["result"], Value::Number(1.0));

        n.data.insert("method".into(), Value::Text("last".into()));
        let out = run(&AggregatorKernel, &n, inputs);
        assert_eq!(out["result"], Value::Number(2.0));
    }

    #[test]
    fn decision_picks_branch_values() {
        let n = node(
            NodeKind::Decision,
            &[
                ("condition", Value::Text("$inputs.value > 10".into())),
                ("trueValue", Value::Text("high".into())),
                ("falseValue", Value::Text("low".into())),
            ],
        );
        let mut inputs = PortValues::new();
        inputs.insert("value".into(), Value::Number(20.0));
        assert_eq!(run(&DecisionKernel, &n, inputs)["result"], Value::Text("high".into()));
        let mut inputs = PortValues::new();
        inputs.insert("value".into(), Value::Number(5.0));
        assert_eq!(run(&DecisionKernel, &n, inputs)["result"], Value::Text("low".into()));
    }

    #[test]
    fn constraint_reports_breach_magnitude_without_failing() {
        let n = node(
            NodeKind::Constraint,
            &[("min", Value::Number(0.0)), ("max", Value::Number(10.0))],
        );
        let mut inputs = PortValues::new();
        inputs.insert("value".into(), Value::Number(13.0));
        let out = run(&ConstraintKernel, &n, inputs);
        assert_eq!(out["satisfied"], Value::Boolean(false));
        assert_eq!(out["violation"], Value::Number(3.0));
        assert_eq!(out["value"], Value::Number(13.0));

        let mut inputs = PortValues::new();
        inputs.insert("value".into(), Value::Number(5.0));
        let out = run(&ConstraintKernel, &n, inputs);
        assert_eq!(out["satisfied"], Value::Boolean(true));
        assert_eq!(out["violation"], Value::Number(0.0));
    }

    #[test]
    fn output_uses_label_with_result_default() {
        let n = node(NodeKind::Output, &[]);
        let mut inputs = PortValues::new();
        inputs.insert("value".into(), Value::Number(7.0));
        let out = run(&OutputKernel, &n, inputs.clone());
        assert_eq!(out["result"], Value::Number(7.0));

        let n = node(NodeKind::Output, &[("label", Value::Text("revenue".into()))]);
        let out = run(&OutputKernel, &n, inputs);
        assert_eq!(out["revenue"], Value::Number(7.0));
    }

    #[test]
    fn dispatch_prefers_type_tag_then_compute_function() {
        load_kernels();

        #[derive(Debug)]
        struct Doubler;
        impl Kernel for Doubler {
            fn name(&self) -> &'static str {
                "doubler"
            }
            fn compute(
                &self,
                inputs: &PortValues,
                _node: &Node,
                _ctx: &KernelContext,
            ) -> Result<PortValues, EngineError> {
                let x = inputs.get("value").map(Value::to_number).unwrap_or(0.0);
                Ok(one("result", Value::Number(x * 2.0)))
            }
        }
        register_kernel(Arc::new(Doubler));

        let custom = node(NodeKind::Custom("doubler".into()), &[]);
        assert_eq!(kernel_for(&custom).unwrap().name(), "doubler");

        let mut generic = node(NodeKind::Custom("GENERIC".into()), &[]);
        generic.compute_function = Some("doubler".into());
        assert_eq!(kernel_for(&generic).unwrap().name(), "doubler");

        let unknown = node(NodeKind::Custom("NOPE".into()), &[]);
        assert!(kernel_for(&unknown).is_err());
    }
}
