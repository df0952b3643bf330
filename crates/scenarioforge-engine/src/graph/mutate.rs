//! Graph construction and mutation. Every structural change bumps the
//! graph's version; identity checks happen here so a graph built through
//! this API always satisfies the structural invariants.

use super::model::{
    Edge, EdgeId, EdgeKind, Endpoint, Graph, Node, NodeId, NodeKind, NodeVisual, Port,
};
use chrono::Utc;
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

// fixed-width so lexicographic id order matches creation order
fn fresh_id(prefix: &str) -> String {
    format!("{prefix}-{:08x}", ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

fn unique_id(prefix: &str, taken: impl Fn(&str) -> bool) -> String {
    loop {
        let candidate = fresh_id(prefix);
        if !taken(&candidate) {
            return candidate;
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/* ===================  create  =================== */

#[derive(Debug, Clone, Default)]
pub struct GraphInit {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub params: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
}

impl GraphInit {
    pub fn named(name: impl Into<String>) -> Self {
        GraphInit {
            name: name.into(),
            ..GraphInit::default()
        }
    }
}

pub fn create_graph(init: GraphInit) -> Graph {
    Graph {
        id: init.id.unwrap_or_else(|| fresh_id("graph")),
        name: init.name,
        description: init.description,
        nodes: Vec::new(),
        edges: Vec::new(),
        feedback_loops: Vec::new(),
        exposed_input_ports: Vec::new(),
        exposed_output_ports: Vec::new(),
        metadata: init.metadata,
        params: init.params,
        version: 1,
    }
}

/* ===================  nodes  =================== */

#[derive(Debug, Clone)]
pub struct NodeInit {
    pub id: Option<NodeId>,
    pub kind: NodeKind,
    pub name: String,
    pub data: BTreeMap<String, Value>,
    pub input_ports: Vec<Port>,
    pub output_ports: Vec<Port>,
    pub compute_function: Option<String>,
    pub visual: NodeVisual,
}

impl NodeInit {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        NodeInit {
            id: None,
            kind,
            name: name.into(),
            data: BTreeMap::new(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            compute_function: None,
            visual: NodeVisual::default(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_input(mut self, port: Port) -> Self {
        self.input_ports.push(port);
        self
    }

    pub fn with_output(mut self, port: Port) -> Self {
        self.output_ports.push(port);
        self
    }
}

pub fn add_node(graph: &mut Graph, init: NodeInit) -> Result<NodeId, EngineError> {
    let id = match init.id {
        Some(id) => {
            if graph.node(&id).is_some() {
                return Err(EngineError::new(EngineErrorKind::Validation)
                    .with_message(format!("duplicate node id '{id}'")));
            }
            id
        }
        None => unique_id("node", |c| graph.node(c).is_some()),
    };

    graph.nodes.push(Node {
        id: id.clone(),
        kind: init.kind,
        name: init.name,
        data: init.data,
        input_ports: init.input_ports,
        output_ports: init.output_ports,
        compute_function: init.compute_function,
        locked: false,
        visual: init.visual,
        created_at: now_ms(),
    });
    graph.version += 1;
    Ok(id)
}

#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub data: Option<BTreeMap<String, Value>>,
    pub compute_function: Option<String>,
    pub visual: Option<NodeVisual>,
    pub locked: Option<bool>,
}

pub fn update_node(graph: &mut Graph, id: &str, patch: NodePatch) -> Result<(), EngineError> {
    let node = graph.node_mut(id).ok_or_else(|| {
        EngineError::new(EngineErrorKind::Validation).with_message(format!("no node '{id}'"))
    })?;

    if node.locked && patch.locked != Some(false) {
        return Err(EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("node '{id}' is locked"))
            .with_node(id));
    }

    if let Some(name) = patch.name {
        node.name = name;
    }
    if let Some(data) = patch.data {
        node.data = data;
    }
    if let Some(compute_function) = patch.compute_function {
        node.compute_function = Some(compute_function);
    }
    if let Some(visual) = patch.visual {
        node.visual = visual;
    }
    if let Some(locked) = patch.locked {
        node.locked = locked;
    }
    graph.version += 1;
    Ok(())
}

/// Removes the node and every edge touching it; feedback loops anchored on
/// the node go with it.
pub fn remove_node(graph: &mut Graph, id: &str) -> Result<(), EngineError> {
    if graph.node(id).is_none() {
        return Err(EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("no node '{id}'")));
    }
    graph.nodes.retain(|n| n.id != id);
    graph
        .edges
        .retain(|e| e.source.node_id != id && e.target.node_id != id);
    graph
        .feedback_loops
        .retain(|l| l.source.node_id != id && l.target.node_id != id);
    graph.version += 1;
    Ok(())
}

/* ===================  edges  =================== */

#[derive(Debug, Clone)]
pub struct EdgeInit {
    pub id: Option<EdgeId>,
    pub source: Endpoint,
    pub target: Endpoint,
    pub kind: EdgeKind,
    pub weight: Option<f64>,
    pub delay: Option<f64>,
    pub condition: Option<String>,
    pub transform: Option<String>,
    pub label: Option<String>,
}

impl EdgeInit {
    pub fn new(source: Endpoint, target: Endpoint) -> Self {
        EdgeInit {
            id: None,
            source,
            target,
            kind: EdgeKind::DataFlow,
            weight: None,
            delay: None,
            condition: None,
            transform: None,
            label: None,
        }
    }

    pub fn kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn condition(mut self, expr: impl Into<String>) -> Self {
        self.condition = Some(expr.into());
        self
    }

    pub fn transform(mut self, expr: impl Into<String>) -> Self {
        self.transform = Some(expr.into());
        self
    }
}

pub fn add_edge(graph: &mut Graph, init: EdgeInit) -> Result<EdgeId, EngineError> {
    let source_node = graph.node(&init.source.node_id).ok_or_else(|| {
        EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("edge source node '{}' not found", init.source.node_id))
    })?;
    if source_node.output_port(&init.source.port_id).is_none() {
        return Err(EngineError::new(EngineErrorKind::Validation).with_message(format!(
            "node '{}' has no output port '{}'",
            init.source.node_id, init.source.port_id
        )));
    }
    let target_node = graph.node(&init.target.node_id).ok_or_else(|| {
        EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("edge target node '{}' not found", init.target.node_id))
    })?;
    if target_node.input_port(&init.target.port_id).is_none() {
        return Err(EngineError::new(EngineErrorKind::Validation).with_message(format!(
            "node '{}' has no input port '{}'",
            init.target.node_id, init.target.port_id
        )));
    }

    let id = match init.id {
        Some(id) => {
            if graph.edge(&id).is_some() {
                return Err(EngineError::new(EngineErrorKind::Validation)
                    .with_message(format!("duplicate edge id '{id}'")));
            }
            id
        }
        None => unique_id("edge", |c| graph.edge(c).is_some()),
    };

    graph.edges.push(Edge {
        id: id.clone(),
        source: init.source,
        target: init.target,
        kind: init.kind,
        weight: init.weight,
        delay: init.delay,
        condition: init.condition,
        transform: init.transform,
        label: init.label,
        animated: false,
        created_at: now_ms(),
    });
    graph.version += 1;
    Ok(id)
}

#[derive(Debug, Clone, Default)]
pub struct EdgePatch {
    pub kind: Option<EdgeKind>,
    pub weight: Option<f64>,
    pub delay: Option<f64>,
    pub condition: Option<String>,
    pub transform: Option<String>,
    pub label: Option<String>,
    pub animated: Option<bool>,
}

pub fn update_edge(graph: &mut Graph, id: &str, patch: EdgePatch) -> Result<(), EngineError> {
    let edge = graph.edge_mut(id).ok_or_else(|| {
        EngineError::new(EngineErrorKind::Validation).with_message(format!("no edge '{id}'"))
    })?;

    if let Some(kind) = patch.kind {
        edge.kind = kind;
    }
    if let Some(weight) = patch.weight {
        edge.weight = Some(weight);
    }
    if let Some(delay) = patch.delay {
        edge.delay = Some(delay);
    }
    if let Some(condition) = patch.condition {
        edge.condition = Some(condition);
    }
    if let Some(transform) = patch.transform {
        edge.transform = Some(transform);
    }
    if let Some(label) = patch.label {
        edge.label = Some(label);
    }
    if let Some(animated) = patch.animated {
        edge.animated = animated;
    }
    graph.version += 1;
    Ok(())
}

pub fn remove_edge(graph: &mut Graph, id: &str) -> Result<(), EngineError> {
    if graph.edge(id).is_none() {
        return Err(EngineError::new(EngineErrorKind::Validation)
            .with_message(format!("no edge '{id}'")));
    }
    graph.edges.retain(|e| e.id != id);
    graph.version += 1;
    Ok(())
}

/* ===================  graph-level update & clone  =================== */

#[derive(Debug, Clone, Default)]
pub struct GraphPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<BTreeMap<String, Value>>,
    pub params: Option<BTreeMap<String, Value>>,
}

pub fn update_graph(graph: &mut Graph, patch: GraphPatch) {
    if let Some(name) = patch.name {
        graph.name = name;
    }
    if let Some(description) = patch.description {
        graph.description = description;
    }
    if let Some(metadata) = patch.metadata {
        graph.metadata = metadata;
    }
    if let Some(params) = patch.params {
        graph.params = params;
    }
    graph.version += 1;
}

/// Deep clone with fresh node/edge/loop ids. Topology, data and creation
/// stamps are preserved, so the clone schedules identically.
pub fn clone_graph(graph: &Graph) -> Graph {
    let mut clone = graph.clone();
    clone.id = fresh_id("graph");
    clone.version = 1;

    let node_ids: BTreeMap<NodeId, NodeId> = graph
        .nodes
        .iter()
        .map(|n| (n.id.clone(), fresh_id("node")))
        .collect();
    // dangling references (possible on imported graphs) keep their old id
    let remap = |id: &str| node_ids.get(id).cloned().unwrap_or_else(|| id.to_string());

    for node in &mut clone.nodes {
        node.id = remap(&node.id);
    }
    for edge in &mut clone.edges {
        edge.id = fresh_id("edge");
        edge.source.node_id = remap(&edge.source.node_id);
        edge.target.node_id = remap(&edge.target.node_id);
    }
    for feedback in &mut clone.feedback_loops {
        feedback.id = fresh_id("loop");
        feedback.source.node_id = remap(&feedback.source.node_id);
        feedback.target.node_id = remap(&feedback.target.node_id);
    }
    for exposed in clone
        .exposed_input_ports
        .iter_mut()
        .chain(clone.exposed_output_ports.iter_mut())
    {
        exposed.node_id = remap(&exposed.node_id);
        for source in &mut exposed.sources {
            source.node_id = remap(&source.node_id);
        }
    }

    clone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::DataType;

    fn two_node_graph() -> (Graph, NodeId, NodeId) {
        let mut g = create_graph(GraphInit::named("test"));
        let a = add_node(
            &mut g,
            NodeInit::new(NodeKind::Constant, "a")
                .with_output(Port::new("output", DataType::Number)),
        )
        .unwrap();
        let b = add_node(
            &mut g,
            NodeInit::new(NodeKind::Output, "b").with_input(Port::new("value", DataType::Any)),
        )
        .unwrap();
        (g, a, b)
    }

    #[test]
    fn version_bumps_on_every_mutation() {
        let (mut g, a, b) = two_node_graph();
        let v = g.version;
        let e = add_edge(&mut g, EdgeInit::new(Endpoint::new(&a, "output"), Endpoint::new(&b, "value")))
            .unwrap();
        assert_eq!(g.version, v + 1);
        update_edge(&mut g, &e, EdgePatch { label: Some("x".into()), ..Default::default() }).unwrap();
        assert_eq!(g.version, v + 2);
        remove_edge(&mut g, &e).unwrap();
        assert_eq!(g.version, v + 3);
    }

    #[test]
    fn add_edge_rejects_dangling_endpoints() {
        let (mut g, a, _) = two_node_graph();
        let err = add_edge(
            &mut g,
            EdgeInit::new(Endpoint::new(&a, "output"), Endpoint::new("ghost", "value")),
        )
        .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Validation);

        let err = add_edge(
            &mut g,
            EdgeInit::new(Endpoint::new(&a, "nope"), Endpoint::new(&a, "output")),
        )
        .unwrap_err();
        assert!(err.message.unwrap().contains("no output port"));
    }

    #[test]
    fn remove_node_removes_incident_edges() {
        let (mut g, a, b) = two_node_graph();
        add_edge(&mut g, EdgeInit::new(Endpoint::new(&a, "output"), Endpoint::new(&b, "value")))
            .unwrap();
        remove_node(&mut g, &a).unwrap();
        assert!(g.edges.is_empty());
        assert!(g.node(&a).is_none());
    }

    #[test]
    fn locked_node_refuses_updates() {
        let (mut g, a, _) = two_node_graph();
        update_node(&mut g, &a, NodePatch { locked: Some(true), ..Default::default() }).unwrap();
        let err = update_node(&mut g, &a, NodePatch { name: Some("x".into()), ..Default::default() })
            .unwrap_err();
        assert!(err.message.unwrap().contains("locked"));
        // unlocking is allowed
        update_node(&mut g, &a, NodePatch { locked: Some(false), ..Default::default() }).unwrap();
    }

    #[test]
    fn clone_gets_fresh_ids_and_same_topology() {
        let (mut g, a, b) = two_node_graph();
        add_edge(&mut g, EdgeInit::new(Endpoint::new(&a, "output"), Endpoint::new(&b, "value")))
            .unwrap();
        let c = clone_graph(&g);
        assert_ne!(c.id, g.id);
        assert_eq!(c.nodes.len(), 2);
        assert_eq!(c.edges.len(), 1);
        assert!(c.node(&a).is_none(), "clone must not reuse node ids");
        // topology: the clone's edge connects the clone's two nodes
        let edge = &c.edges[0];
        assert_eq!(edge.source.node_id, c.nodes[0].id);
        assert_eq!(edge.target.node_id, c.nodes[1].id);
        // data preserved
        assert_eq!(c.nodes[0].name, "a");
    }
}
