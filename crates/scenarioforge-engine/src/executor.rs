//! The graph executor: one deterministic pass over the tie-broken
//! topological order, gathering port values along edges and invoking each
//! node's kernel. Monte Carlo and sensitivity drivers sit on top of the
//! same pass (see `monte_carlo` and `sensitivity`).

use crate::context::{EvalContext, object};
use crate::feedback::{ConvergenceConfig, FeedbackEngine, FeedbackLoop, Injections, LoopReport};
use crate::graph::model::{Graph, Node, NodeKind};
use crate::graph::topo::sort_indices;
use crate::graph::validate::validate;
use crate::interpreter::Interpreter;
use crate::kernels::{KernelContext, PortValues, kernel_for, load_kernels, parse_expression};
use crate::rng::SharedRng;
use crate::subgraph::{NoSubgraphs, SubgraphRegistry};
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/* ===================  cancellation  =================== */

/// Cooperative cancel signal, checked between iterations and between node
/// invocations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/* ===================  results  =================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputNodeResult {
    pub node_id: String,
    pub node_name: String,
    pub outputs: PortValues,
}

/// Result of one deterministic run. On failure the outputs computed before
/// the failing node are still present for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    /// All computed port values, node id → port name → value.
    pub outputs: BTreeMap<String, PortValues>,
    /// The OUTPUT nodes' emissions, in schedule order.
    pub output_nodes: Vec<OutputNodeResult>,
    pub execution_time_ms: f64,
    pub error: Option<EngineError>,
}

impl ExecutionResult {
    fn failure(error: EngineError, started: Instant) -> Self {
        ExecutionResult {
            success: false,
            outputs: BTreeMap::new(),
            output_nodes: Vec::new(),
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackOptions {
    pub max_iterations: usize,
    /// Default convergence tolerance for loops that declare none
    /// (absolute metric over a window of 3).
    pub tolerance: Option<f64>,
}

impl Default for FeedbackOptions {
    fn default() -> Self {
        FeedbackOptions {
            max_iterations: 100,
            tolerance: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackExecutionResult {
    pub result: ExecutionResult,
    pub iterations_run: usize,
    pub converged: bool,
    pub loops: BTreeMap<String, LoopReport>,
}

/* ===================  plan & scope  =================== */

/// A validated graph plus its tie-broken schedule.
pub(crate) struct ExecutionPlan<'g> {
    pub graph: &'g Graph,
    pub order: Vec<usize>,
}

impl<'g> ExecutionPlan<'g> {
    pub(crate) fn prepare(graph: &'g Graph) -> Result<Self, EngineError> {
        let v = validate(graph);
        if let Some(first) = v.errors.first() {
            return Err(EngineError::new(EngineErrorKind::Validation)
                .with_message(format!("{first} ({} error(s) total)", v.errors.len())));
        }
        let order = sort_indices(graph).ok_or_else(|| {
            EngineError::new(EngineErrorKind::Validation).with_message("graph contains a cycle")
        })?;
        Ok(ExecutionPlan { graph, order })
    }
}

/// Per-pass ambient state: parameters, iteration clock, feedback
/// injections, and the hierarchical bindings for subgraph execution.
pub(crate) struct PassScope<'a> {
    pub params: &'a BTreeMap<String, Value>,
    pub iteration: u64,
    pub time: f64,
    pub injections: Option<&'a Injections>,
    pub depth: usize,
    pub path: &'a [String],
    pub parent: Option<&'a Value>,
    pub root_params: &'a BTreeMap<String, Value>,
    pub cancel: Option<&'a CancelToken>,
    pub feedback: Option<&'a Value>,
    pub feedback_history: Option<&'a Value>,
}

impl<'a> PassScope<'a> {
    pub(crate) fn root(params: &'a BTreeMap<String, Value>) -> Self {
        PassScope {
            params,
            iteration: 0,
            time: 0.0,
            injections: None,
            depth: 0,
            path: &[],
            parent: None,
            root_params: params,
            cancel: None,
            feedback: None,
            feedback_history: None,
        }
    }
}

pub(crate) struct PassOutcome {
    pub outputs: Vec<Option<PortValues>>,
    pub error: Option<EngineError>,
}

/* ===================  the executor  =================== */

#[derive(Clone)]
pub struct Executor {
    pub(crate) rng: SharedRng,
    pub(crate) subgraphs: Arc<dyn SubgraphRegistry>,
}

impl Default for Executor {
    fn default() -> Self {
        Executor {
            rng: SharedRng::from_entropy(),
            subgraphs: Arc::new(NoSubgraphs),
        }
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Executor {
            rng: SharedRng::seeded(seed),
            ..self
        }
    }

    pub fn with_rng(self, rng: SharedRng) -> Self {
        Executor { rng, ..self }
    }

    pub fn with_subgraphs(self, registry: Arc<dyn SubgraphRegistry>) -> Self {
        Executor {
            subgraphs: registry,
            ..self
        }
    }

    /// One-shot deterministic run with `$iteration = 0`, `$time = 0`.
    pub fn execute(
        &self,
        graph: &Graph,
        params: Option<&BTreeMap<String, Value>>,
    ) -> ExecutionResult {
        crate::builtins::load_builtins();
        load_kernels();
        let started = Instant::now();

        let merged = merge_params(graph, params);
        let plan = match ExecutionPlan::prepare(graph) {
            Ok(plan) => plan,
            Err(err) => return ExecutionResult::failure(err, started),
        };
        let scope = PassScope::root(&merged);
        let outcome = self.run_pass(&plan, &scope);
        finish(graph, outcome, started)
    }

    /// Fixed-point helper: repeatedly run the deterministic pipeline,
    /// applying feedback transforms between iterations, until every loop
    /// with convergence enabled has converged or the cap is reached.
    pub fn execute_with_feedback(
        &self,
        graph: &Graph,
        params: Option<&BTreeMap<String, Value>>,
        opts: &FeedbackOptions,
    ) -> FeedbackExecutionResult {
        crate::builtins::load_builtins();
        load_kernels();
        let started = Instant::now();
        let merged = merge_params(graph, params);

        let plan = match ExecutionPlan::prepare(graph) {
            Ok(plan) => plan,
            Err(err) => {
                return FeedbackExecutionResult {
                    result: ExecutionResult::failure(err, started),
                    iterations_run: 0,
                    converged: false,
                    loops: BTreeMap::new(),
                };
            }
        };

        let loops = effective_loops(graph, opts);
        let mut engine = FeedbackEngine::new(&loops);
        let mut iterations_run = 0usize;
        let mut converged = false;
        let mut last: Option<PassOutcome> = None;

        for i in 0..opts.max_iterations.max(1) {
            let injections = engine.injections(&loops);
            let feedback = feedback_binding(&engine, &loops);
            let feedback_history = feedback_history_binding(&engine, &loops);
            let scope = PassScope {
                iteration: i as u64,
                time: i as f64,
                injections: Some(&injections),
                feedback: Some(&feedback),
                feedback_history: Some(&feedback_history),
                ..PassScope::root(&merged)
            };
            let outcome = self.run_pass(&plan, &scope);
            iterations_run = i + 1;

            let failed = outcome.error.is_some();
            if !failed {
                if let Err(err) =
                    self.observe_loops(&plan, &loops, &mut engine, &outcome, i as u64, &merged)
                {
                    last = Some(PassOutcome {
                        outputs: outcome.outputs,
                        error: Some(err),
                    });
                    break;
                }
            }
            last = Some(outcome);
            if failed {
                break;
            }

            if engine.all_converged(&loops) {
                converged = true;
                break;
            }
        }

        let outcome = last.unwrap_or(PassOutcome {
            outputs: Vec::new(),
            error: None,
        });
        FeedbackExecutionResult {
            result: finish(graph, outcome, started),
            iterations_run,
            converged,
            loops: engine.reports(),
        }
    }

    /// Read each loop's source port from the pass outputs and feed it to the
    /// feedback engine.
    pub(crate) fn observe_loops(
        &self,
        plan: &ExecutionPlan,
        loops: &[FeedbackLoop],
        engine: &mut FeedbackEngine,
        outcome: &PassOutcome,
        iteration: u64,
        params: &BTreeMap<String, Value>,
    ) -> Result<(), EngineError> {
        for lp in loops.iter().filter(|l| l.enabled) {
            let Some(observed) =
                read_port_value(plan.graph, &outcome.outputs, &lp.source.node_id, &lp.source.port_id)
            else {
                continue;
            };
            let observed = match &lp.source.field {
                Some(path) => field_path(&observed, path).to_number(),
                None => observed.to_number(),
            };
            let rng = &self.rng;
            let custom = |source: &str, x: f64| -> Result<f64, EngineError> {
                let ctx = EvalContext::new()
                    .with("feedbackValue", Value::Number(x))
                    .with("params", Value::Object(params.clone()));
                let ast = parse_expression(source)?;
                Ok(Interpreter::new(&ctx, rng).evaluate(&ast)?.to_number())
            };
            engine.observe(lp, observed, iteration, &custom)?;
        }
        Ok(())
    }

    /* ===================  one pass  =================== */

    pub(crate) fn run_pass(&self, plan: &ExecutionPlan, scope: &PassScope) -> PassOutcome {
        let graph = plan.graph;
        let mut outputs: Vec<Option<PortValues>> = vec![None; graph.nodes.len()];

        // `$nodes` index, enriched with outputs as the pass progresses
        let mut nodes_snapshot: BTreeMap<String, Value> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), node_binding(n, None)))
            .collect();

        for &idx in &plan.order {
            if let Some(cancel) = scope.cancel {
                if cancel.is_cancelled() {
                    return PassOutcome {
                        outputs,
                        error: Some(
                            EngineError::new(EngineErrorKind::Cancelled)
                                .with_message("run cancelled"),
                        ),
                    };
                }
            }

            let node = &graph.nodes[idx];
            let inputs = match self.gather_inputs(plan, scope, node, &outputs) {
                Ok(inputs) => inputs,
                Err(err) => {
                    return PassOutcome {
                        outputs,
                        error: Some(err.with_node(&node.id)),
                    };
                }
            };

            let computed = if node.kind == NodeKind::Subgraph {
                crate::subgraph::execute_subgraph_node(self, graph, node, &inputs, scope, &outputs)
            } else {
                match kernel_for(node) {
                    Ok(kernel) => {
                        let eval = self.eval_context_for(scope, node, &inputs, &nodes_snapshot);
                        kernel.compute(
                            &inputs,
                            node,
                            &KernelContext {
                                eval: &eval,
                                rng: &self.rng,
                            },
                        )
                    }
                    Err(err) => Err(err),
                }
            };

            match computed {
                Ok(values) => {
                    nodes_snapshot.insert(node.id.clone(), node_binding(node, Some(&values)));
                    outputs[idx] = Some(values);
                }
                Err(err) => {
                    return PassOutcome {
                        outputs,
                        error: Some(err.with_node(&node.id)),
                    };
                }
            }
        }

        PassOutcome {
            outputs,
            error: None,
        }
    }

    /// Resolve one node's input ports against the output buffer: fan-in
    /// policy, conditional edges, in-flight transforms, then feedback
    /// injections on top.
    fn gather_inputs(
        &self,
        plan: &ExecutionPlan,
        scope: &PassScope,
        node: &Node,
        outputs: &[Option<PortValues>],
    ) -> Result<PortValues, EngineError> {
        let graph = plan.graph;
        let mut inputs = PortValues::new();

        for port in &node.input_ports {
            // edge-creation order: created_at, then id (ids are monotonic)
            let mut incoming: SmallVec<[&crate::graph::model::Edge; 4]> = graph
                .incoming_edges(&node.id)
                .filter(|edge| {
                    let targets_port = node
                        .input_port(&edge.target.port_id)
                        .is_some_and(|p| p.id == port.id);
                    // DEPENDENCY edges order the schedule but carry no data
                    let carries_data = matches!(
                        edge.kind,
                        crate::graph::model::EdgeKind::DataFlow
                            | crate::graph::model::EdgeKind::Conditional
                    );
                    targets_port && carries_data
                })
                .collect();
            incoming.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

            let mut values: SmallVec<[Value; 4]> = SmallVec::new();
            for edge in incoming {
                let Some(src_idx) = graph.node_index(&edge.source.node_id) else {
                    continue;
                };
                let Some(src_outputs) = &outputs[src_idx] else {
                    continue;
                };
                let src_node = &graph.nodes[src_idx];
                let key = src_node
                    .output_port(&edge.source.port_id)
                    .map(|p| p.name.as_str())
                    .unwrap_or(edge.source.port_id.as_str());
                let Some(value) = src_outputs.get(key) else {
                    continue;
                };
                let mut value = value.clone();

                if let Some(condition) = &edge.condition {
                    let ctx = self.edge_context(scope, &value);
                    let ast = parse_expression(condition)?;
                    let verdict = Interpreter::new(&ctx, &self.rng).evaluate(&ast)?;
                    if !verdict.is_truthy() {
                        continue;
                    }
                }
                if let Some(transform) = &edge.transform {
                    let ctx = self.edge_context(scope, &value);
                    let ast = parse_expression(transform)?;
                    value = Interpreter::new(&ctx, &self.rng).evaluate(&ast)?;
                }
                values.push(value);
            }

            if port.multiple {
                if values.is_empty() {
                    if let Some(default) = &port.default_value {
                        inputs.insert(port.name.clone(), default.clone());
                    } else {
                        inputs.insert(port.name.clone(), Value::Array(Vec::new()));
                    }
                } else {
                    inputs.insert(port.name.clone(), Value::Array(values.into_vec()));
                }
            } else if let Some(last) = values.into_iter().next_back() {
                // fan-in on a single-valued port: last edge wins
                inputs.insert(port.name.clone(), last);
            } else if let Some(default) = &port.default_value {
                inputs.insert(port.name.clone(), default.clone());
            }
        }

        if let Some(injections) = scope.injections {
            if let Some(entries) = injections.get(&node.id) {
                for (port_id, field, value) in entries {
                    let name = node
                        .input_port(port_id)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| port_id.clone());
                    match field {
                        None => {
                            inputs.insert(name, value.clone());
                        }
                        Some(path) => {
                            let current = inputs.remove(&name).unwrap_or(Value::Null);
                            inputs.insert(name, set_field_path(current, path, value.clone()));
                        }
                    }
                }
            }
        }

        Ok(inputs)
    }

    /// The `$`-binding table for one kernel invocation.
    fn eval_context_for(
        &self,
        scope: &PassScope,
        node: &Node,
        inputs: &PortValues,
        nodes_snapshot: &BTreeMap<String, Value>,
    ) -> EvalContext {
        let mut ctx = EvalContext::new()
            .with("node", node_binding(node, None))
            .with("inputs", Value::Object(inputs.clone()))
            .with("params", Value::Object(scope.params.clone()))
            .with("nodes", Value::Object(nodes_snapshot.clone()))
            .with("time", Value::Number(scope.time))
            .with("iteration", Value::Number(scope.iteration as f64))
            .with("depth", Value::Number(scope.depth as f64))
            .with(
                "path",
                Value::Array(scope.path.iter().map(|p| Value::Text(p.clone())).collect()),
            );

        if let Some(parent) = scope.parent {
            ctx.bind("parent", parent.clone());
        }
        ctx.bind(
            "root",
            object([("params", Value::Object(scope.root_params.clone()))]),
        );
        ctx.bind(
            "graphs",
            Value::Object(
                scope
                    .path
                    .iter()
                    .enumerate()
                    .map(|(i, id)| (id.clone(), Value::Number(i as f64)))
                    .collect(),
            ),
        );
        if let Some(feedback) = scope.feedback {
            ctx.bind("feedback", feedback.clone());
        }
        if let Some(history) = scope.feedback_history {
            ctx.bind("feedbackHistory", history.clone());
        }
        ctx
    }

    /// Minimal context for edge condition/transform expressions: the
    /// in-flight value plus the ambient clock and parameters.
    fn edge_context(&self, scope: &PassScope, value: &Value) -> EvalContext {
        EvalContext::new()
            .with("value", value.clone())
            .with("params", Value::Object(scope.params.clone()))
            .with("time", Value::Number(scope.time))
            .with("iteration", Value::Number(scope.iteration as f64))
    }
}

/* ===================  helpers  =================== */

pub(crate) fn merge_params(
    graph: &Graph,
    params: Option<&BTreeMap<String, Value>>,
) -> BTreeMap<String, Value> {
    let mut merged = graph.params.clone();
    if let Some(overrides) = params {
        for (k, v) in overrides {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

fn node_binding(node: &Node, outputs: Option<&PortValues>) -> Value {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Value::Text(node.id.clone()));
    map.insert("name".to_string(), Value::Text(node.name.clone()));
    map.insert("type".to_string(), Value::Text(node.kind.tag().to_string()));
    map.insert("data".to_string(), Value::Object(node.data.clone()));
    if let Some(outputs) = outputs {
        map.insert("outputs".to_string(), Value::Object(outputs.clone()));
    }
    Value::Object(map)
}

/// Look up a node's output by port id (or name), from a pass's buffer.
pub(crate) fn read_port_value(
    graph: &Graph,
    outputs: &[Option<PortValues>],
    node_id: &str,
    port_id: &str,
) -> Option<Value> {
    let idx = graph.node_index(node_id)?;
    let node = &graph.nodes[idx];
    let values = outputs[idx].as_ref()?;
    let key = node
        .output_port(port_id)
        .map(|p| p.name.as_str())
        .unwrap_or(port_id);
    values.get(key).or_else(|| values.get(port_id)).cloned()
}

/// Descend a dot-separated path into a structured value.
pub(crate) fn field_path(value: &Value, path: &str) -> Value {
    let mut current = value.clone();
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

/// Set a dot-separated path inside a value, creating objects along the way.
fn set_field_path(base: Value, path: &str, value: Value) -> Value {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.is_empty() {
        return value;
    }
    let head = segments.remove(0);
    let mut map = match base {
        Value::Object(map) => map,
        _ => BTreeMap::new(),
    };
    let inner = if segments.is_empty() {
        value
    } else {
        let existing = map.remove(head).unwrap_or(Value::Null);
        set_field_path(existing, &segments.join("."), value)
    };
    map.insert(head.to_string(), inner);
    Value::Object(map)
}

pub(crate) fn finish(graph: &Graph, outcome: PassOutcome, started: Instant) -> ExecutionResult {
    let mut outputs = BTreeMap::new();
    for (idx, values) in outcome.outputs.iter().enumerate() {
        if let Some(values) = values {
            outputs.insert(graph.nodes[idx].id.clone(), values.clone());
        }
    }

    let mut output_nodes = Vec::new();
    for (idx, node) in graph.nodes.iter().enumerate() {
        if node.kind == NodeKind::Output {
            if let Some(values) = outcome.outputs.get(idx).and_then(|v| v.as_ref()) {
                output_nodes.push(OutputNodeResult {
                    node_id: node.id.clone(),
                    node_name: node.name.clone(),
                    outputs: values.clone(),
                });
            }
        }
    }

    ExecutionResult {
        success: outcome.error.is_none(),
        outputs,
        output_nodes,
        execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        error: outcome.error,
    }
}

fn effective_loops(graph: &Graph, opts: &FeedbackOptions) -> Vec<FeedbackLoop> {
    graph
        .feedback_loops
        .iter()
        .cloned()
        .map(|mut lp| {
            if lp.convergence.is_none() {
                if let Some(tolerance) = opts.tolerance {
                    lp.convergence = Some(ConvergenceConfig {
                        tolerance,
                        window_size: 3,
                        ..ConvergenceConfig::default()
                    });
                }
            }
            lp
        })
        .collect()
}

pub(crate) fn feedback_binding(engine: &FeedbackEngine, loops: &[FeedbackLoop]) -> Value {
    Value::Object(
        loops
            .iter()
            .filter_map(|lp| {
                engine
                    .state(&lp.id)
                    .map(|s| (lp.id.clone(), Value::Number(s.current_value)))
            })
            .collect(),
    )
}

pub(crate) fn feedback_history_binding(engine: &FeedbackEngine, loops: &[FeedbackLoop]) -> Value {
    Value::Object(
        loops
            .iter()
            .filter_map(|lp| {
                engine.state(&lp.id).map(|s| {
                    (
                        lp.id.clone(),
                        Value::Array(
                            s.history
                                .iter()
                                .map(|e| Value::Number(e.value))
                                .collect(),
                        ),
                    )
                })
            })
            .collect(),
    )
}
