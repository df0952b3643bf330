//! Hierarchical execution: port mapping, scoped contexts, error bubbling.

mod common;

use common::*;
use scenarioforge_engine::{
    AggregationKind, DataType, Endpoint, Executor, ExposedPort, Graph, GraphInit, InMemorySubgraphRegistry,
    NodeInit, NodeKind, Port, Value, add_node, create_graph, validate_with_registry,
};
use std::sync::Arc;

/// A child graph `in → (*2) → out` exposed as ports `in` / `out`.
fn doubler_child(id: &str) -> Graph {
    let mut g = create_graph(GraphInit {
        id: Some(id.to_string()),
        name: "doubler".into(),
        ..GraphInit::default()
    });
    let t = transformer(&mut g, "double", "$inputs.value * 2");
    g.exposed_input_ports
        .push(ExposedPort::passthrough("in", &t, "value"));
    g.exposed_output_ports
        .push(ExposedPort::passthrough("out", &t, "result"));
    g
}

/// A SUBGRAPH node wired for the doubler child.
fn subgraph_node(g: &mut Graph, child_id: &str) -> String {
    add_node(
        g,
        NodeInit::new(NodeKind::Subgraph, "sub")
            .with_data("subgraphId", Value::Text(child_id.into()))
            .with_data(
                "portMappings",
                Value::Array(vec![
                    mapping("in", "in"),
                    mapping("out", "out"),
                ]),
            )
            .with_input(Port::new("in", DataType::Number))
            .with_output(Port::new("out", DataType::Number)),
    )
    .unwrap()
}

fn mapping(external: &str, internal: &str) -> Value {
    let mut map = std::collections::BTreeMap::new();
    map.insert("externalPortId".to_string(), Value::Text(external.into()));
    map.insert("internalPortId".to_string(), Value::Text(internal.into()));
    Value::Object(map)
}

fn executor_with(child: Graph) -> Executor {
    let registry = InMemorySubgraphRegistry::new();
    registry.insert(child);
    Executor::new().with_subgraphs(Arc::new(registry))
}

#[test]
fn passthrough_subgraph_matches_the_inline_body() {
    // parent: CONSTANT(21) → SUBGRAPH(doubler) → OUTPUT
    let mut parent = graph("parent");
    let c = constant(&mut parent, "c", 21.0);
    let sub = subgraph_node(&mut parent, "doubler");
    let o = output(&mut parent, "o");
    wire(&mut parent, (&c, "output"), (&sub, "in"));
    wire(&mut parent, (&sub, "out"), (&o, "value"));

    let result = executor_with(doubler_child("doubler")).execute(&parent, None);
    assert!(result.success, "{:?}", result.error);
    let nested = number_at(&result, &o, "result");

    // the same body inlined
    let mut flat = graph("flat");
    let c = constant(&mut flat, "c", 21.0);
    let t = transformer(&mut flat, "double", "$inputs.value * 2");
    let o = output(&mut flat, "o");
    wire(&mut flat, (&c, "output"), (&t, "value"));
    wire(&mut flat, (&t, "result"), (&o, "value"));
    let inline = number_at(&Executor::new().execute(&flat, None), &o, "result");

    assert_eq!(nested, inline);
    assert_eq!(nested, 42.0);
}

#[test]
fn child_context_sees_depth_and_path() {
    let mut child = create_graph(GraphInit {
        id: Some("probe".into()),
        name: "probe".into(),
        ..GraphInit::default()
    });
    let t = transformer(&mut child, "ctx", "$depth * 1000 + length($path)");
    child
        .exposed_output_ports
        .push(ExposedPort::passthrough("out", &t, "result"));

    let mut parent = graph("parent");
    let sub = add_node(
        &mut parent,
        NodeInit::new(NodeKind::Subgraph, "sub")
            .with_data("subgraphId", Value::Text("probe".into()))
            .with_data("portMappings", Value::Array(vec![mapping("out", "out")]))
            .with_output(Port::new("out", DataType::Number)),
    )
    .unwrap();
    let o = output(&mut parent, "o");
    wire(&mut parent, (&sub, "out"), (&o, "value"));

    let result = executor_with(child).execute(&parent, None);
    assert!(result.success, "{:?}", result.error);
    // depth 1, path ["probe"]
    assert_eq!(number_at(&result, &o, "result"), 1001.0);
}

#[test]
fn instance_params_override_inherited_ones() {
    let mut child = create_graph(GraphInit {
        id: Some("rates".into()),
        name: "rates".into(),
        ..GraphInit::default()
    });
    let t = transformer(&mut child, "r", "$params.rate");
    child
        .exposed_output_ports
        .push(ExposedPort::passthrough("out", &t, "result"));

    let mut parent = graph("parent");
    parent.params.insert("rate".into(), Value::Number(0.05));
    let mut instance = std::collections::BTreeMap::new();
    instance.insert("rate".to_string(), Value::Number(0.2));
    let sub = add_node(
        &mut parent,
        NodeInit::new(NodeKind::Subgraph, "sub")
            .with_data("subgraphId", Value::Text("rates".into()))
            .with_data("instanceParams", Value::Object(instance))
            .with_data("portMappings", Value::Array(vec![mapping("out", "out")]))
            .with_output(Port::new("out", DataType::Number)),
    )
    .unwrap();
    let o = output(&mut parent, "o");
    wire(&mut parent, (&sub, "out"), (&o, "value"));

    let result = executor_with(child).execute(&parent, None);
    assert_eq!(number_at(&result, &o, "result"), 0.2);
}

#[test]
fn aggregated_exposed_port_reduces_its_sources() {
    let mut child = create_graph(GraphInit {
        id: Some("multi".into()),
        name: "multi".into(),
        ..GraphInit::default()
    });
    let a = constant(&mut child, "a", 10.0);
    let b = constant(&mut child, "b", 32.0);
    child.exposed_output_ports.push(ExposedPort {
        id: "out".into(),
        node_id: a.clone(),
        port_id: "output".into(),
        mapping_type: Some("aggregated".into()),
        sources: vec![Endpoint::new(&a, "output"), Endpoint::new(&b, "output")],
        aggregation: Some(AggregationKind::Sum),
    });

    let mut parent = graph("parent");
    let sub = add_node(
        &mut parent,
        NodeInit::new(NodeKind::Subgraph, "sub")
            .with_data("subgraphId", Value::Text("multi".into()))
            .with_data("portMappings", Value::Array(vec![mapping("out", "out")]))
            .with_output(Port::new("out", DataType::Number)),
    )
    .unwrap();
    let o = output(&mut parent, "o");
    wire(&mut parent, (&sub, "out"), (&o, "value"));

    let result = executor_with(child).execute(&parent, None);
    assert_eq!(number_at(&result, &o, "result"), 42.0);
}

#[test]
fn child_failure_bubbles_by_default_and_softens_when_asked() {
    let mut child = create_graph(GraphInit {
        id: Some("broken".into()),
        name: "broken".into(),
        ..GraphInit::default()
    });
    let t = transformer(&mut child, "bad", "$definitely_not_bound");
    child
        .exposed_output_ports
        .push(ExposedPort::passthrough("out", &t, "result"));

    let build_parent = |bubble: bool| {
        let mut parent = graph("parent");
        let mut init = NodeInit::new(NodeKind::Subgraph, "sub")
            .with_data("subgraphId", Value::Text("broken".into()))
            .with_data("portMappings", Value::Array(vec![mapping("out", "out")]))
            .with_output(Port::new("out", DataType::Any));
        if !bubble {
            init = init.with_data("bubbleErrors", Value::Boolean(false));
        }
        let sub = add_node(&mut parent, init).unwrap();
        let o = output(&mut parent, "o");
        wire(&mut parent, (&sub, "out"), (&o, "value"));
        (parent, sub)
    };

    let (strict, sub) = build_parent(true);
    let result = executor_with(child.clone()).execute(&strict, None);
    assert!(!result.success);
    assert_eq!(result.error.unwrap().node.as_deref(), Some(sub.as_str()));

    let (soft, sub) = build_parent(false);
    let result = executor_with(child).execute(&soft, None);
    assert!(result.success, "{:?}", result.error);
    match result.outputs.get(&sub).and_then(|v| v.get("error")) {
        Some(Value::Text(msg)) => assert!(msg.contains("unknown variable")),
        other => panic!("expected error text, got {other:?}"),
    }
}

#[test]
fn unresolved_subgraph_fails_at_run_time_and_validation() {
    let mut parent = graph("parent");
    let sub = subgraph_node(&mut parent, "ghost");
    let o = output(&mut parent, "o");
    wire(&mut parent, (&sub, "out"), (&o, "value"));

    let registry = InMemorySubgraphRegistry::new();
    let v = validate_with_registry(&parent, &registry);
    assert!(v.errors.iter().any(|i| i.code == "subgraph"));

    let result = Executor::new()
        .with_subgraphs(Arc::new(registry))
        .execute(&parent, None);
    assert!(!result.success);
}

#[test]
fn self_referencing_hierarchy_is_rejected_statically() {
    let mut recursive = create_graph(GraphInit {
        id: Some("ouroboros".into()),
        name: "ouroboros".into(),
        ..GraphInit::default()
    });
    let t = transformer(&mut recursive, "t", "1");
    recursive
        .exposed_output_ports
        .push(ExposedPort::passthrough("out", &t, "result"));
    add_node(
        &mut recursive,
        NodeInit::new(NodeKind::Subgraph, "me-again")
            .with_data("subgraphId", Value::Text("ouroboros".into())),
    )
    .unwrap();

    let registry = InMemorySubgraphRegistry::new();
    registry.insert(recursive.clone());
    let v = validate_with_registry(&recursive, &registry);
    assert!(
        v.errors
            .iter()
            .any(|i| i.code == "subgraph" && i.message.contains("cycle"))
    );
}
