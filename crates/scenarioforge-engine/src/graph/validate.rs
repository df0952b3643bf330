//! Structural validation. Errors block execution; warnings are advisory
//! (type mismatches, suspicious expressions, fan-in into single ports).

use super::model::{Graph, NodeKind};
use super::topo::topological_sort;
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Stable machine-readable code: `dangling-edge`, `missing-port`,
    /// `cycle`, `unconnected-node`, `type-mismatch`, `bad-expression`,
    /// `fan-in`, `subgraph`.
    pub code: &'static str,
    pub message: String,
    pub node: Option<String>,
    pub edge: Option<String>,
}

impl ValidationIssue {
    pub(crate) fn new(code: &'static str, message: String) -> Self {
        ValidationIssue {
            code,
            message,
            node: None,
            edge: None,
        }
    }

    pub(crate) fn on_node(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub(crate) fn on_edge(mut self, edge: &str) -> Self {
        self.edge = Some(edge.to_string());
        self
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validation {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate(graph: &Graph) -> Validation {
    let mut v = Validation::default();

    check_edges(graph, &mut v);
    check_cycles(graph, &mut v);
    check_connectivity(graph, &mut v);
    check_expressions(graph, &mut v);

    v
}

fn check_edges(graph: &Graph, v: &mut Validation) {
    for edge in &graph.edges {
        let source_node = graph.node(&edge.source.node_id);
        let target_node = graph.node(&edge.target.node_id);

        if source_node.is_none() {
            v.errors.push(
                ValidationIssue::new(
                    "dangling-edge",
                    format!("edge '{}' references missing node '{}'", edge.id, edge.source.node_id),
                )
                .on_edge(&edge.id),
            );
        }
        if target_node.is_none() {
            v.errors.push(
                ValidationIssue::new(
                    "dangling-edge",
                    format!("edge '{}' references missing node '{}'", edge.id, edge.target.node_id),
                )
                .on_edge(&edge.id),
            );
        }

        let source_port = source_node.and_then(|n| n.output_port(&edge.source.port_id));
        if source_node.is_some() && source_port.is_none() {
            v.errors.push(
                ValidationIssue::new(
                    "missing-port",
                    format!(
                        "edge '{}' references missing output port '{}' on node '{}'",
                        edge.id, edge.source.port_id, edge.source.node_id
                    ),
                )
                .on_edge(&edge.id),
            );
        }
        let target_port = target_node.and_then(|n| n.input_port(&edge.target.port_id));
        if target_node.is_some() && target_port.is_none() {
            v.errors.push(
                ValidationIssue::new(
                    "missing-port",
                    format!(
                        "edge '{}' references missing input port '{}' on node '{}'",
                        edge.id, edge.target.port_id, edge.target.node_id
                    ),
                )
                .on_edge(&edge.id),
            );
        }

        // data-type compatibility on DATA_FLOW is warn-only
        if let (Some(sp), Some(tp)) = (source_port, target_port) {
            if edge.kind == super::model::EdgeKind::DataFlow
                && !sp.data_type.compatible(tp.data_type)
            {
                v.warnings.push(
                    ValidationIssue::new(
                        "type-mismatch",
                        format!(
                            "edge '{}' connects {:?} output to {:?} input",
                            edge.id, sp.data_type, tp.data_type
                        ),
                    )
                    .on_edge(&edge.id),
                );
            }
        }
    }

    // fan-in >1 into a non-multiple port resolves last-wins; warn about it
    for node in &graph.nodes {
        for port in &node.input_ports {
            if port.multiple {
                continue;
            }
            let fan_in = graph
                .incoming_edges(&node.id)
                .filter(|e| {
                    node.input_port(&e.target.port_id)
                        .is_some_and(|p| p.id == port.id)
                })
                .count();
            if fan_in > 1 {
                v.warnings.push(
                    ValidationIssue::new(
                        "fan-in",
                        format!(
                            "{fan_in} edges feed single-valued port '{}' on node '{}'; last edge wins",
                            port.id, node.id
                        ),
                    )
                    .on_node(&node.id),
                );
            }
        }
    }
}

fn check_cycles(graph: &Graph, v: &mut Validation) {
    if topological_sort(graph).is_none() {
        v.errors.push(ValidationIssue::new(
            "cycle",
            "graph contains a cycle outside FEEDBACK edges".to_string(),
        ));
    }
}

fn check_connectivity(graph: &Graph, v: &mut Validation) {
    for node in &graph.nodes {
        if node.kind == NodeKind::Output {
            continue;
        }
        if !node.output_ports.is_empty() && graph.outgoing_edges(&node.id).next().is_none() {
            v.warnings.push(
                ValidationIssue::new(
                    "unconnected-node",
                    format!("node '{}' ({}) feeds nothing", node.id, node.name),
                )
                .on_node(&node.id),
            );
        }
    }
}

/// Parse every expression the graph carries; syntax problems surface as
/// warnings so the editor can flag them before a run fails.
fn check_expressions(graph: &Graph, v: &mut Validation) {
    let mut check = |source: &str, what: &str, node: Option<&str>, edge: Option<&str>| {
        if let Err(err) = scenarioforge_expr::validate(source) {
            let mut issue =
                ValidationIssue::new("bad-expression", format!("{what}: {}", err.message));
            if let Some(n) = node {
                issue = issue.on_node(n);
            }
            if let Some(e) = edge {
                issue = issue.on_edge(e);
            }
            v.warnings.push(issue);
        }
    };

    for node in &graph.nodes {
        let keys = match node.kind {
            NodeKind::Transformer => &["expression"][..],
            NodeKind::Decision => &["condition"][..],
            NodeKind::Constraint => &["expression"][..],
            _ => &[][..],
        };
        for key in keys {
            if let Some(src) = node.data_text(key) {
                check(src, &format!("node '{}' {key}", node.id), Some(&node.id), None);
            }
        }
    }
    for edge in &graph.edges {
        if let Some(src) = &edge.condition {
            check(src, &format!("edge '{}' condition", edge.id), None, Some(&edge.id));
        }
        if let Some(src) = &edge.transform {
            check(src, &format!("edge '{}' transform", edge.id), None, Some(&edge.id));
        }
    }

    // DISTRIBUTION nodes with malformed discrete configs fail at run time;
    // surface them early as warnings too
    for node in &graph.nodes {
        if node.kind == NodeKind::Distribution {
            if let Some(config) = crate::kernels::distribution_config_from(node) {
                if let Err(err) = config.validate() {
                    v.warnings.push(
                        ValidationIssue::new(
                            "bad-expression",
                            format!("node '{}' distribution: {err}", node.id),
                        )
                        .on_node(&node.id),
                    );
                }
            }
        }
    }
}
