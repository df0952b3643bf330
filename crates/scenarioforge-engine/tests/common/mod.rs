//! Shared graph builders for the integration suite.
#![allow(dead_code)]

use scenarioforge_engine::{
    DataType, EdgeInit, Endpoint, ExecutionResult, Graph, GraphInit, NodeInit, NodeKind, Port,
    Value, add_edge, add_node, create_graph,
};

pub fn graph(name: &str) -> Graph {
    create_graph(GraphInit::named(name))
}

pub fn constant(g: &mut Graph, name: &str, value: f64) -> String {
    add_node(
        g,
        NodeInit::new(NodeKind::Constant, name)
            .with_data("value", Value::Number(value))
            .with_output(Port::new("output", DataType::Number)),
    )
    .unwrap()
}

pub fn parameter(g: &mut Graph, name: &str, value: f64) -> String {
    add_node(
        g,
        NodeInit::new(NodeKind::Parameter, name)
            .with_data("value", Value::Number(value))
            .with_data("min", Value::Number(0.0))
            .with_data("max", Value::Number(100.0))
            .with_output(Port::new("value", DataType::Number)),
    )
    .unwrap()
}

pub fn transformer(g: &mut Graph, name: &str, expression: &str) -> String {
    add_node(
        g,
        NodeInit::new(NodeKind::Transformer, name)
            .with_data("expression", Value::Text(expression.into()))
            .with_input(Port::new("value", DataType::Any))
            .with_output(Port::new("result", DataType::Any)),
    )
    .unwrap()
}

pub fn aggregator(g: &mut Graph, name: &str, method: &str) -> String {
    add_node(
        g,
        NodeInit::new(NodeKind::Aggregator, name)
            .with_data("method", Value::Text(method.into()))
            .with_input(Port::new("values", DataType::Any).multiple())
            .with_output(Port::new("result", DataType::Number)),
    )
    .unwrap()
}

pub fn distribution(g: &mut Graph, name: &str, kind: &str, params: &[(&str, f64)]) -> String {
    let mut init = NodeInit::new(NodeKind::Distribution, name)
        .with_data("distributionType", Value::Text(kind.into()))
        .with_output(Port::new("sample", DataType::Number));
    for (key, value) in params {
        init = init.with_data(*key, Value::Number(*value));
    }
    add_node(g, init).unwrap()
}

pub fn output(g: &mut Graph, name: &str) -> String {
    add_node(
        g,
        NodeInit::new(NodeKind::Output, name).with_input(Port::new("value", DataType::Any)),
    )
    .unwrap()
}

pub fn wire(g: &mut Graph, from: (&str, &str), to: (&str, &str)) -> String {
    add_edge(
        g,
        EdgeInit::new(Endpoint::new(from.0, from.1), Endpoint::new(to.0, to.1)),
    )
    .unwrap()
}

/// Read a numeric value out of an execution result.
pub fn number_at(result: &ExecutionResult, node: &str, key: &str) -> f64 {
    match result
        .outputs
        .get(node)
        .and_then(|values| values.get(key))
    {
        Some(Value::Number(n)) => *n,
        other => panic!("expected number at {node}.{key}, got {other:?}"),
    }
}
