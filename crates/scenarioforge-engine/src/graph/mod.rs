pub mod io;
pub mod model;
pub mod mutate;
pub mod topo;
pub mod validate;

pub use io::{FORMAT_VERSION, export, export_at, import};
pub use model::{
    AggregationKind, DataType, Edge, EdgeId, EdgeKind, Endpoint, ExposedPort, Graph, GraphId,
    Node, NodeId, NodeKind, NodeVisual, Port, PortId,
};
pub use mutate::{
    EdgeInit, EdgePatch, GraphInit, GraphPatch, NodeInit, NodePatch, add_edge, add_node,
    clone_graph, create_graph, remove_edge, remove_node, update_edge, update_graph, update_node,
};
pub use topo::topological_sort;
pub use validate::{Validation, ValidationIssue, validate};
