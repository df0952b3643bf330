//! The graph data model: typed nodes, ports, edges, and the graph that owns
//! them. Wire names are camelCase and kind tags are the upper-snake strings
//! of the persisted format, so an exported tree round-trips losslessly.

use crate::feedback::FeedbackLoop;
use scenarioforge_common::Value;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub type GraphId = String;
pub type NodeId = String;
pub type EdgeId = String;
pub type PortId = String;

/* ===================  data types  =================== */

/// The declared type of a port. `Any` is compatible with everything;
/// mismatches elsewhere are validation warnings, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "string")]
    Text,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "array")]
    Array,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "distribution")]
    Distribution,
    #[serde(rename = "expression")]
    Expression,
    #[serde(rename = "time-series")]
    TimeSeries,
}

impl DataType {
    pub fn compatible(self, other: DataType) -> bool {
        self == DataType::Any || other == DataType::Any || self == other
    }
}

/* ===================  node & edge kinds  =================== */

/// Node type tag. The fixed set selects a builtin kernel; `Custom` carries
/// the raw tag through to the pluggable kernel registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Constant,
    Parameter,
    Distribution,
    Transformer,
    Aggregator,
    Decision,
    Constraint,
    Output,
    Subgraph,
    Custom(String),
}

impl NodeKind {
    pub fn tag(&self) -> &str {
        match self {
            NodeKind::Constant => "CONSTANT",
            NodeKind::Parameter => "PARAMETER",
            NodeKind::Distribution => "DISTRIBUTION",
            NodeKind::Transformer => "TRANSFORMER",
            NodeKind::Aggregator => "AGGREGATOR",
            NodeKind::Decision => "DECISION",
            NodeKind::Constraint => "CONSTRAINT",
            NodeKind::Output => "OUTPUT",
            NodeKind::Subgraph => "SUBGRAPH",
            NodeKind::Custom(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> NodeKind {
        match tag {
            "CONSTANT" => NodeKind::Constant,
            "PARAMETER" => NodeKind::Parameter,
            "DISTRIBUTION" => NodeKind::Distribution,
            "TRANSFORMER" => NodeKind::Transformer,
            "AGGREGATOR" => NodeKind::Aggregator,
            "DECISION" => NodeKind::Decision,
            "CONSTRAINT" => NodeKind::Constraint,
            "OUTPUT" => NodeKind::Output,
            "SUBGRAPH" => NodeKind::Subgraph,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(D::Error::custom("empty node type tag"));
        }
        Ok(NodeKind::from_tag(&tag))
    }
}

/// Edge type tag. Only DATA_FLOW / DEPENDENCY / CONDITIONAL participate in
/// topological ordering; FEEDBACK edges are the declared loops.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    DataFlow,
    Dependency,
    Conditional,
    Feedback,
    Temporal,
    Extended(String),
}

impl Default for EdgeKind {
    fn default() -> Self {
        EdgeKind::DataFlow
    }
}

impl EdgeKind {
    pub fn tag(&self) -> &str {
        match self {
            EdgeKind::DataFlow => "DATA_FLOW",
            EdgeKind::Dependency => "DEPENDENCY",
            EdgeKind::Conditional => "CONDITIONAL",
            EdgeKind::Feedback => "FEEDBACK",
            EdgeKind::Temporal => "TEMPORAL",
            EdgeKind::Extended(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> EdgeKind {
        match tag {
            "DATA_FLOW" => EdgeKind::DataFlow,
            "DEPENDENCY" => EdgeKind::Dependency,
            "CONDITIONAL" => EdgeKind::Conditional,
            "FEEDBACK" => EdgeKind::Feedback,
            "TEMPORAL" => EdgeKind::Temporal,
            other => EdgeKind::Extended(other.to_string()),
        }
    }

    /// Whether edges of this kind constrain the schedule.
    pub fn affects_order(&self) -> bool {
        matches!(
            self,
            EdgeKind::DataFlow | EdgeKind::Dependency | EdgeKind::Conditional
        )
    }
}

impl Serialize for EdgeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for EdgeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(EdgeKind::from_tag(&tag))
    }
}

/* ===================  ports  =================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub data_type: DataType,
    /// Optional JSON-schema fragment, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default)]
    pub required: bool,
    /// Whether several incoming edges may fan into this port. When set, the
    /// port always presents its value as an array of upstream values.
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl Port {
    pub fn new(id: impl Into<String>, data_type: DataType) -> Self {
        let id = id.into();
        Port {
            name: id.clone(),
            id,
            data_type,
            schema: None,
            required: false,
            multiple: false,
            default_value: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/* ===================  nodes  =================== */

/// Visual hints for editors. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVisual {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl NodeVisual {
    pub fn is_empty(&self) -> bool {
        self == &NodeVisual::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    /// Open key/value map the node's kernel reads its configuration from.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_ports: Vec<Port>,
    /// Selects a registered kernel when the node's type tag has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_function: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "NodeVisual::is_empty")]
    pub visual: NodeVisual,
    /// Creation stamp in epoch milliseconds; first scheduling tie-break.
    pub created_at: i64,
}

impl Node {
    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data_text(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_text)
    }

    pub fn data_number(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_number)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        match self.data.get(key) {
            Some(Value::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Look up an input port by id, falling back to name.
    pub fn input_port(&self, key: &str) -> Option<&Port> {
        self.input_ports
            .iter()
            .find(|p| p.id == key)
            .or_else(|| self.input_ports.iter().find(|p| p.name == key))
    }

    pub fn output_port(&self, key: &str) -> Option<&Port> {
        self.output_ports
            .iter()
            .find(|p| p.id == key)
            .or_else(|| self.output_ports.iter().find(|p| p.name == key))
    }
}

/* ===================  edges  =================== */

/// One end of an edge: a node and one of its ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub node_id: NodeId,
    pub port_id: PortId,
}

impl Endpoint {
    pub fn new(node_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Endpoint {
            node_id: node_id.into(),
            port_id: port_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    /// The edge contributes its value only while this expression is truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Maps the in-flight value; `$value` binds to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub animated: bool,
    pub created_at: i64,
}

/* ===================  subgraph exposure  =================== */

/// Reduction applied by an aggregated exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    Sum,
    Mean,
    Min,
    Max,
    Concat,
    Merge,
}

/// A port a graph exposes for use as a subgraph: a stable external id bound
/// to one internal node port, or (`aggregated`) to several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    pub id: PortId,
    pub node_id: NodeId,
    pub port_id: PortId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationKind>,
}

impl ExposedPort {
    pub fn passthrough(
        id: impl Into<String>,
        node_id: impl Into<String>,
        port_id: impl Into<String>,
    ) -> Self {
        ExposedPort {
            id: id.into(),
            node_id: node_id.into(),
            port_id: port_id.into(),
            mapping_type: None,
            sources: Vec::new(),
            aggregation: None,
        }
    }

    pub fn is_aggregated(&self) -> bool {
        self.mapping_type.as_deref() == Some("aggregated")
    }
}

/* ===================  graph  =================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub id: GraphId,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback_loops: Vec<FeedbackLoop>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_input_ports: Vec<ExposedPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_output_ports: Vec<ExposedPort>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Global parameter defaults; callers may override per run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    /// Increments on every structural mutation through the public API.
    pub version: u64,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    pub fn output_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Output)
    }

    /// Edges targeting the given node, in creation order.
    pub fn incoming_edges(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target.node_id == node_id)
    }

    pub fn outgoing_edges(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source.node_id == node_id)
    }
}
