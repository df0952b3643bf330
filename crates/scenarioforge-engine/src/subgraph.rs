//! Subgraph execution: resolving referenced graphs through an injected
//! registry, mapping external ports onto the child's exposed ports, and
//! running the child with a scoped context (`$depth`, `$path`, `$parent`,
//! `$root`).

use crate::executor::{Executor, PassScope, read_port_value};
use crate::graph::model::{AggregationKind, ExposedPort, Graph, Node, NodeKind};
use crate::interpreter::Interpreter;
use crate::kernels::{PortValues, parse_expression};
use dashmap::DashMap;
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hierarchy depth cap; exceeding it is a validation (or runtime) error.
pub const MAX_SUBGRAPH_DEPTH: usize = 100;

/* ===================  registry  =================== */

/// Resolves graph references for SUBGRAPH nodes. Hosts provide their own
/// (database-backed, versioned, ...); the engine ships an in-memory one.
pub trait SubgraphRegistry: Send + Sync {
    fn resolve(&self, id: &str, version: Option<u64>) -> Option<Arc<Graph>>;
}

/// Registry that resolves nothing; the default for executors without
/// subgraphs.
#[derive(Debug, Default)]
pub struct NoSubgraphs;

impl SubgraphRegistry for NoSubgraphs {
    fn resolve(&self, _id: &str, _version: Option<u64>) -> Option<Arc<Graph>> {
        None
    }
}

#[derive(Debug, Default)]
pub struct InMemorySubgraphRegistry {
    graphs: DashMap<String, Arc<Graph>>,
}

impl InMemorySubgraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, graph: Graph) {
        self.graphs.insert(graph.id.clone(), Arc::new(graph));
    }
}

impl SubgraphRegistry for InMemorySubgraphRegistry {
    fn resolve(&self, id: &str, _version: Option<u64>) -> Option<Arc<Graph>> {
        self.graphs.get(id).map(|g| Arc::clone(g.value()))
    }
}

/* ===================  node configuration  =================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Inline,
    Isolated,
    Parallel,
    Lazy,
}

impl ExecutionMode {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "isolated" => ExecutionMode::Isolated,
            "parallel" => ExecutionMode::Parallel,
            "lazy" => ExecutionMode::Lazy,
            _ => ExecutionMode::Inline,
        }
    }
}

#[derive(Debug, Clone)]
struct PortMapping {
    external: String,
    internal: String,
    transform: Option<String>,
}

#[derive(Debug, Clone)]
struct SubgraphSpec {
    subgraph_id: String,
    version: Option<u64>,
    mode: ExecutionMode,
    bubble_errors: bool,
    instance_params: BTreeMap<String, Value>,
    mappings: Vec<PortMapping>,
}

fn spec_from(node: &Node) -> Result<SubgraphSpec, EngineError> {
    let subgraph_id = node
        .data_text("subgraphId")
        .ok_or_else(|| {
            EngineError::new(EngineErrorKind::Subgraph)
                .with_message("subgraph node has no subgraphId")
                .with_node(&node.id)
        })?
        .to_string();

    let mut mappings = Vec::new();
    if let Some(Value::Array(items)) = node.data_value("portMappings") {
        for item in items {
            let Some(map) = item.as_object() else {
                continue;
            };
            let external = map
                .get("externalPortId")
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string();
            let internal = map
                .get("internalPortId")
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string();
            let transform = map
                .get("transform")
                .and_then(Value::as_text)
                .map(str::to_string);
            mappings.push(PortMapping {
                external,
                internal,
                transform,
            });
        }
    }

    Ok(SubgraphSpec {
        subgraph_id,
        version: node.data_number("subgraphVersion").map(|v| v as u64),
        mode: ExecutionMode::from_tag(node.data_text("executionMode").unwrap_or("inline")),
        bubble_errors: node.data_bool("bubbleErrors").unwrap_or(true),
        instance_params: node
            .data_value("instanceParams")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        mappings,
    })
}

/* ===================  execution  =================== */

pub(crate) fn execute_subgraph_node(
    executor: &Executor,
    graph: &Graph,
    node: &Node,
    inputs: &PortValues,
    scope: &PassScope,
    outputs_so_far: &[Option<PortValues>],
) -> Result<PortValues, EngineError> {
    let spec = spec_from(node)?;

    // lazy mode: skip entirely unless an OUTPUT node sits downstream
    if spec.mode == ExecutionMode::Lazy && !has_downstream_output(graph, &node.id) {
        return Ok(PortValues::new());
    }

    if scope.depth + 1 > MAX_SUBGRAPH_DEPTH {
        return Err(EngineError::new(EngineErrorKind::Subgraph)
            .with_message(format!("subgraph nesting exceeds {MAX_SUBGRAPH_DEPTH}"))
            .with_node(&node.id));
    }

    let child = executor
        .subgraphs
        .resolve(&spec.subgraph_id, spec.version)
        .ok_or_else(|| {
            EngineError::new(EngineErrorKind::Subgraph)
                .with_message(format!("unresolved subgraph '{}'", spec.subgraph_id))
                .with_node(&node.id)
        })?;

    let child_plan = crate::executor::ExecutionPlan::prepare(&child).map_err(|err| {
        EngineError::new(EngineErrorKind::Subgraph)
            .with_message(format!("subgraph '{}' invalid: {err}", spec.subgraph_id))
            .with_node(&node.id)
    })?;

    // inherited parameters plus per-instance overrides
    let mut child_params = scope.params.clone();
    for (k, v) in &spec.instance_params {
        child_params.insert(k.clone(), v.clone());
    }

    // external inputs → internal input ports, via the exposure table
    let mut injections: crate::feedback::Injections = Default::default();
    for mapping in &spec.mappings {
        let Some(exposed) = find_exposed(&child.exposed_input_ports, &mapping.internal) else {
            continue; // output-side mapping, handled below
        };
        let external_name = node
            .input_port(&mapping.external)
            .map(|p| p.name.as_str())
            .unwrap_or(mapping.external.as_str());
        let Some(value) = inputs.get(external_name) else {
            continue;
        };
        let value = apply_transform(executor, scope, mapping.transform.as_deref(), value.clone())?;
        injections
            .entry(exposed.node_id.clone())
            .or_default()
            .push((exposed.port_id.clone(), None, value));
    }

    let parent_binding = parent_binding(graph, scope, outputs_so_far);
    let mut child_path: Vec<String> = scope.path.to_vec();
    child_path.push(spec.subgraph_id.clone());

    let child_scope = PassScope {
        params: &child_params,
        iteration: scope.iteration,
        time: scope.time,
        injections: Some(&injections),
        depth: scope.depth + 1,
        path: &child_path,
        parent: Some(&parent_binding),
        root_params: scope.root_params,
        cancel: scope.cancel,
        feedback: scope.feedback,
        feedback_history: scope.feedback_history,
    };

    let outcome = executor.run_pass(&child_plan, &child_scope);
    if let Some(err) = outcome.error {
        if spec.bubble_errors {
            return Err(EngineError::new(EngineErrorKind::Subgraph)
                .with_message(format!("subgraph '{}' failed: {err}", spec.subgraph_id))
                .with_node(&node.id));
        }
        let mut out = PortValues::new();
        out.insert("error".into(), Value::Text(err.to_string()));
        return Ok(out);
    }

    // internal outputs → external output ports
    let mut result = PortValues::new();
    for mapping in &spec.mappings {
        let Some(exposed) = find_exposed(&child.exposed_output_ports, &mapping.internal) else {
            continue;
        };
        let value = if exposed.is_aggregated() {
            aggregate_sources(&child, &outcome.outputs, exposed)
        } else {
            read_port_value(&child, &outcome.outputs, &exposed.node_id, &exposed.port_id)
                .unwrap_or(Value::Null)
        };
        let value = apply_transform(executor, scope, mapping.transform.as_deref(), value)?;
        let external_name = node
            .output_port(&mapping.external)
            .map(|p| p.name.as_str())
            .unwrap_or(mapping.external.as_str());
        result.insert(external_name.to_string(), value);
    }

    Ok(result)
}

fn find_exposed<'a>(exposed: &'a [ExposedPort], id: &str) -> Option<&'a ExposedPort> {
    exposed.iter().find(|p| p.id == id)
}

/// The `$parent` object a child context sees: the parent's parameters and
/// whatever the parent pass has computed so far.
fn parent_binding(graph: &Graph, scope: &PassScope, outputs: &[Option<PortValues>]) -> Value {
    let computed: BTreeMap<String, Value> = graph
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(i, n)| {
            outputs
                .get(i)
                .and_then(|o| o.as_ref())
                .map(|o| (n.id.clone(), Value::Object(o.clone())))
        })
        .collect();
    let mut map = BTreeMap::new();
    map.insert("params".to_string(), Value::Object(scope.params.clone()));
    map.insert("outputs".to_string(), Value::Object(computed));
    Value::Object(map)
}

fn apply_transform(
    executor: &Executor,
    scope: &PassScope,
    transform: Option<&str>,
    value: Value,
) -> Result<Value, EngineError> {
    let Some(source) = transform else {
        return Ok(value);
    };
    let ctx = crate::context::EvalContext::new()
        .with("value", value)
        .with("params", Value::Object(scope.params.clone()));
    let ast = parse_expression(source)?;
    Interpreter::new(&ctx, &executor.rng).evaluate(&ast)
}

/// Reduce the configured internal sources of an aggregated exposed port.
fn aggregate_sources(
    child: &Graph,
    outputs: &[Option<PortValues>],
    exposed: &ExposedPort,
) -> Value {
    let values: Vec<Value> = exposed
        .sources
        .iter()
        .filter_map(|s| read_port_value(child, outputs, &s.node_id, &s.port_id))
        .collect();

    match exposed.aggregation.unwrap_or(AggregationKind::Sum) {
        AggregationKind::Sum => Value::Number(values.iter().map(Value::to_number).sum()),
        AggregationKind::Mean => {
            Value::Number(values.iter().map(Value::to_number).sum::<f64>() / values.len() as f64)
        }
        AggregationKind::Min => Value::Number(
            values
                .iter()
                .map(Value::to_number)
                .fold(f64::INFINITY, f64::min),
        ),
        AggregationKind::Max => Value::Number(
            values
                .iter()
                .map(Value::to_number)
                .fold(f64::NEG_INFINITY, f64::max),
        ),
        AggregationKind::Concat => {
            let mut out = Vec::new();
            for value in values {
                match value {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Value::Array(out)
        }
        AggregationKind::Merge => {
            let mut out = BTreeMap::new();
            for value in values {
                if let Value::Object(map) = value {
                    out.extend(map);
                }
            }
            Value::Object(out)
        }
    }
}

/// Whether any OUTPUT node is reachable downstream of `node_id` along
/// schedule-ordering edges.
fn has_downstream_output(graph: &Graph, node_id: &str) -> bool {
    let mut stack = vec![node_id.to_string()];
    let mut seen = std::collections::BTreeSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        for edge in graph.outgoing_edges(&current) {
            if !edge.kind.affects_order() {
                continue;
            }
            if let Some(target) = graph.node(&edge.target.node_id) {
                if target.kind == NodeKind::Output {
                    return true;
                }
                stack.push(target.id.clone());
            }
        }
    }
    false
}

/* ===================  static hierarchy checks  =================== */

/// Validate including subgraph resolution and recursion depth; the plain
/// `validate` cannot see through graph references without a registry.
pub fn validate_with_registry(
    graph: &Graph,
    registry: &dyn SubgraphRegistry,
) -> crate::graph::validate::Validation {
    use crate::graph::validate::ValidationIssue;

    let mut v = crate::graph::validate::validate(graph);

    for node in &graph.nodes {
        if node.kind != NodeKind::Subgraph {
            continue;
        }
        match spec_from(node) {
            Err(err) => {
                v.errors.push(
                    ValidationIssue::new("subgraph", err.to_string()).on_node(&node.id),
                );
            }
            Ok(spec) => {
                if registry.resolve(&spec.subgraph_id, spec.version).is_none() {
                    v.errors.push(
                        ValidationIssue::new(
                            "subgraph",
                            format!("unresolved subgraph '{}'", spec.subgraph_id),
                        )
                        .on_node(&node.id),
                    );
                }
            }
        }
    }

    let mut stack = Vec::new();
    if let Err(err) = hierarchy_depth(graph, registry, &mut stack) {
        v.errors
            .push(ValidationIssue::new("subgraph", err.to_string()));
    }

    v
}

/// Depth of the subgraph hierarchy rooted at `graph` (0 for a flat graph).
/// Reference cycles and depths beyond the cap are errors.
pub fn hierarchy_depth(
    graph: &Graph,
    registry: &dyn SubgraphRegistry,
    stack: &mut Vec<String>,
) -> Result<usize, EngineError> {
    if stack.len() > MAX_SUBGRAPH_DEPTH {
        return Err(EngineError::new(EngineErrorKind::Subgraph)
            .with_message(format!("subgraph nesting exceeds {MAX_SUBGRAPH_DEPTH}")));
    }

    let mut depth = 0usize;
    for node in &graph.nodes {
        if node.kind != NodeKind::Subgraph {
            continue;
        }
        let Ok(spec) = spec_from(node) else {
            continue;
        };
        if stack.iter().any(|id| id == &spec.subgraph_id) {
            return Err(EngineError::new(EngineErrorKind::Subgraph)
                .with_message(format!("subgraph reference cycle through '{}'", spec.subgraph_id)));
        }
        let Some(child) = registry.resolve(&spec.subgraph_id, spec.version) else {
            continue;
        };
        stack.push(spec.subgraph_id.clone());
        let child_depth = hierarchy_depth(&child, registry, stack)?;
        stack.pop();
        depth = depth.max(1 + child_depth);
    }
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{DataType, Port};
    use crate::graph::mutate::{GraphInit, NodeInit, add_node, create_graph};

    fn leaf_graph(id: &str) -> Graph {
        let mut g = create_graph(GraphInit {
            id: Some(id.to_string()),
            name: id.to_string(),
            ..GraphInit::default()
        });
        add_node(
            &mut g,
            NodeInit::new(NodeKind::Constant, "c")
                .with_output(Port::new("output", DataType::Number)),
        )
        .unwrap();
        g
    }

    fn subgraph_node_init(child_id: &str) -> NodeInit {
        NodeInit::new(NodeKind::Subgraph, "sub")
            .with_data("subgraphId", Value::Text(child_id.into()))
    }

    #[test]
    fn in_memory_registry_resolves_by_id() {
        let registry = InMemorySubgraphRegistry::new();
        registry.insert(leaf_graph("child"));
        assert!(registry.resolve("child", None).is_some());
        assert!(registry.resolve("other", None).is_none());
    }

    #[test]
    fn validate_with_registry_flags_unresolved_references() {
        let registry = InMemorySubgraphRegistry::new();
        let mut g = leaf_graph("parent");
        add_node(&mut g, subgraph_node_init("missing")).unwrap();
        let v = validate_with_registry(&g, &registry);
        assert!(v.errors.iter().any(|i| i.code == "subgraph"));
    }

    #[test]
    fn hierarchy_depth_counts_nesting() {
        let registry = InMemorySubgraphRegistry::new();
        let mut mid = leaf_graph("mid");
        add_node(&mut mid, subgraph_node_init("leaf")).unwrap();
        registry.insert(leaf_graph("leaf"));
        registry.insert(mid);

        let mut top = leaf_graph("top");
        add_node(&mut top, subgraph_node_init("mid")).unwrap();

        let mut stack = Vec::new();
        assert_eq!(hierarchy_depth(&top, &registry, &mut stack).unwrap(), 2);
    }

    #[test]
    fn reference_cycles_are_errors() {
        let registry = InMemorySubgraphRegistry::new();
        let mut a = leaf_graph("a");
        add_node(&mut a, subgraph_node_init("b")).unwrap();
        let mut b = leaf_graph("b");
        add_node(&mut b, subgraph_node_init("a")).unwrap();
        registry.insert(a.clone());
        registry.insert(b);

        let mut stack = Vec::new();
        let err = hierarchy_depth(&a, &registry, &mut stack).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Subgraph);
        assert!(err.message.unwrap().contains("cycle"));
    }

    #[test]
    fn execution_mode_tags() {
        assert_eq!(ExecutionMode::from_tag("isolated"), ExecutionMode::Isolated);
        assert_eq!(ExecutionMode::from_tag("lazy"), ExecutionMode::Lazy);
        assert_eq!(ExecutionMode::from_tag("anything"), ExecutionMode::Inline);
    }
}
