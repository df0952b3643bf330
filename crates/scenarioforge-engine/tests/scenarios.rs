//! End-to-end scenarios over small concrete graphs.

mod common;

use common::*;
use scenarioforge_engine::{
    ConvergenceConfig, Executor, FeedbackLoop, FeedbackOptions, LoopEndpoint, SensitivityRequest,
    SimulationConfig, TransformConfig, TransformKind, Value, topological_sort,
};

#[test]
fn linear_chain_doubles_a_constant() {
    // CONSTANT(10) → TRANSFORMER($inputs.value * 2) → OUTPUT
    let mut g = graph("linear");
    let c = constant(&mut g, "ten", 10.0);
    let t = transformer(&mut g, "double", "$inputs.value * 2");
    let o = output(&mut g, "result");
    wire(&mut g, (&c, "output"), (&t, "value"));
    wire(&mut g, (&t, "result"), (&o, "value"));

    let result = Executor::new().execute(&g, None);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output_nodes.len(), 1);
    assert_eq!(result.output_nodes[0].outputs["result"], Value::Number(20.0));
}

#[test]
fn diamond_fans_out_and_aggregates() {
    // A=100 fans to B (+10) and C (*2); both feed D = sum
    let mut g = graph("diamond");
    let a = constant(&mut g, "a", 100.0);
    let b = transformer(&mut g, "b", "$inputs.value + 10");
    let c = transformer(&mut g, "c", "$inputs.value * 2");
    let d = aggregator(&mut g, "d", "sum");
    let o = output(&mut g, "out");
    wire(&mut g, (&a, "output"), (&b, "value"));
    wire(&mut g, (&a, "output"), (&c, "value"));
    wire(&mut g, (&b, "result"), (&d, "values"));
    wire(&mut g, (&c, "result"), (&d, "values"));
    wire(&mut g, (&d, "result"), (&o, "value"));

    let order = topological_sort(&g).unwrap();
    assert_eq!(order.first(), Some(&a));
    let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
    assert!(pos(&d) > pos(&b) && pos(&d) > pos(&c));

    let result = Executor::new().execute(&g, None);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(number_at(&result, &d, "result"), 310.0);
}

#[test]
fn monte_carlo_normal_matches_moments_and_replays() {
    // DISTRIBUTION(normal, mean=100, stddev=10) → OUTPUT
    let mut g = graph("mc-normal");
    let d = distribution(&mut g, "n", "normal", &[("mean", 100.0), ("stddev", 10.0)]);
    let o = output(&mut g, "out");
    wire(&mut g, (&d, "sample"), (&o, "value"));

    let config = SimulationConfig::monte_carlo(10_000, 42);
    let run = Executor::new().run_monte_carlo(&g, &config, None, None);
    assert_eq!(run.iterations_run, 10_000);
    assert_eq!(run.failed_iterations, 0);

    let samples = &run.samples[&o]["result"];
    assert_eq!(samples.len(), 10_000);
    let metrics = &run.aggregated[&o]["result"];
    assert!((metrics.mean - 100.0).abs() < 0.5, "mean {}", metrics.mean);
    assert!(
        (metrics.standard_deviation - 10.0).abs() < 0.3,
        "std {}",
        metrics.standard_deviation
    );
    assert!(
        (115.0..=118.0).contains(&metrics.percentiles.p95),
        "p95 {}",
        metrics.percentiles.p95
    );

    // same seed, bit-identical raw samples
    let replay = Executor::new().run_monte_carlo(&g, &config, None, None);
    assert_eq!(replay.samples[&o]["result"], *samples);
}

#[test]
fn pid_loop_settles_on_its_setpoint() {
    // plant: TRANSFORMER($inputs.value); loop drives it toward 100
    let mut g = graph("pid");
    let plant = transformer(&mut g, "plant", "$inputs.value");
    let o = output(&mut g, "out");
    wire(&mut g, (&plant, "result"), (&o, "value"));

    let mut lp = FeedbackLoop::new(
        "control",
        LoopEndpoint::new(&plant, "result"),
        LoopEndpoint::new(&plant, "value"),
    );
    lp.transform = TransformKind::Pid;
    lp.config = TransformConfig {
        kp: 1.0,
        ki: 0.5,
        kd: 0.2,
        setpoint: 100.0,
        ..TransformConfig::default()
    };
    lp.initial_value = 80.0;
    lp.convergence = Some(ConvergenceConfig {
        tolerance: 0.01,
        window_size: 5,
        ..ConvergenceConfig::default()
    });
    g.feedback_loops.push(lp);

    let run = Executor::new().execute_with_feedback(
        &g,
        None,
        &FeedbackOptions {
            max_iterations: 200,
            tolerance: None,
        },
    );
    assert!(run.result.success, "{:?}", run.result.error);
    assert!(run.converged, "no convergence in {} iterations", run.iterations_run);
    let report = &run.loops["control"];
    assert!(report.converged);
    assert!(
        (report.final_value - 100.0).abs() < 0.1,
        "settled at {}",
        report.final_value
    );
}

#[test]
fn sensitivity_recovers_a_linear_slope() {
    // PARAMETER(50) → TRANSFORMER($inputs.value * 2) → OUTPUT
    let mut g = graph("sweep");
    let p = parameter(&mut g, "p", 50.0);
    let t = transformer(&mut g, "t", "$inputs.value * 2");
    let o = output(&mut g, "out");
    wire(&mut g, (&p, "value"), (&t, "value"));
    wire(&mut g, (&t, "result"), (&o, "value"));

    let result = Executor::new()
        .run_sensitivity(
            &g,
            &SensitivityRequest {
                parameter_node_id: p,
                parameter_field: "value".into(),
                output_node_id: o,
                output_key: "result".into(),
                range: (0.0, 100.0),
                steps: 10,
            },
        )
        .unwrap();

    assert_eq!(result.data_points.len(), 10);
    assert!((result.slope - 2.0).abs() < 1e-6, "slope {}", result.slope);
    assert!((result.r_squared - 1.0).abs() < 1e-12);
    assert!((result.elasticity - 1.0).abs() < 1e-9);
}
