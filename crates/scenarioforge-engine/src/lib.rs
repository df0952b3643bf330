//! ScenarioForge engine: a dataflow graph of typed nodes executed
//! deterministically or as a seeded Monte Carlo simulation, with a
//! sandboxed expression DSL, feedback loops, subgraphs, and risk metrics.
//!
//! The crate is a pure library. Every public run API returns a result the
//! caller inspects; nothing panics past this boundary.

pub mod builtins;
pub mod context;
pub mod distribution;
pub mod executor;
pub mod feedback;
pub mod function;
pub mod function_registry;
pub mod graph;
pub mod interpreter;
pub mod kernels;
pub mod metrics;
pub mod monte_carlo;
pub mod rng;
pub mod sensitivity;
pub mod subgraph;

pub use context::EvalContext;
pub use distribution::{DistributionConfig, sample_distribution, sample_with};
pub use executor::{
    CancelToken, ExecutionResult, Executor, FeedbackExecutionResult, FeedbackOptions,
    OutputNodeResult,
};
pub use feedback::{
    ConvergenceConfig, ConvergenceMetric, FeedbackEngine, FeedbackLoop, HistoryEntry,
    LoopEndpoint, LoopReport, ThresholdDirection, TransformConfig, TransformKind, TriggerKind,
};
pub use function::{FnCaps, Function, FunctionContext};
pub use function_registry::register_function;
pub use graph::{
    AggregationKind, DataType, Edge, EdgeInit, EdgeKind, EdgePatch, Endpoint, ExposedPort, Graph,
    GraphInit, GraphPatch, Node, NodeInit, NodeKind, NodePatch, NodeVisual, Port, Validation,
    ValidationIssue, add_edge, add_node, clone_graph, create_graph, export, export_at, import,
    remove_edge, remove_node, topological_sort, update_edge, update_graph, update_node, validate,
};
pub use interpreter::{Interpreter, evaluate};
pub use kernels::{Kernel, KernelContext, PortValues, register_kernel};
pub use metrics::{RiskMetrics, percentile_of_sorted, risk_metrics};
pub use monte_carlo::{
    MonteCarloResult, ProgressUpdate, RunStatus, SampleMap, SimulationConfig, SimulationMode,
    TimeConfig,
};
pub use rng::{Lcg, SharedRng, derive_seed, set_seed};
pub use sensitivity::{SensitivityPoint, SensitivityRequest, SensitivityResult};
pub use subgraph::{
    InMemorySubgraphRegistry, MAX_SUBGRAPH_DEPTH, SubgraphRegistry, validate_with_registry,
};

// Re-export the shared foundations
pub use scenarioforge_common::{EngineError, EngineErrorKind, Value};
pub use scenarioforge_expr::{Expr, ExprKind, ParseError, parse, validate as validate_expression};

use std::collections::BTreeMap;

/// One-shot deterministic run with a default executor (entropy-seeded RNG,
/// no subgraph registry). Build an [`Executor`] for seeded or hierarchical
/// runs.
pub fn execute(graph: &Graph, params: Option<&BTreeMap<String, Value>>) -> ExecutionResult {
    Executor::new().execute(graph, params)
}

/// Fixed-point run: see [`Executor::execute_with_feedback`].
pub fn execute_with_feedback(
    graph: &Graph,
    params: Option<&BTreeMap<String, Value>>,
    opts: &FeedbackOptions,
) -> FeedbackExecutionResult {
    Executor::new().execute_with_feedback(graph, params, opts)
}

/// Sequential Monte Carlo run: see [`Executor::run_monte_carlo`].
pub fn run_monte_carlo(
    graph: &Graph,
    config: &SimulationConfig,
    progress: Option<&mut dyn FnMut(ProgressUpdate)>,
    cancel: Option<&CancelToken>,
) -> MonteCarloResult {
    Executor::new().run_monte_carlo(graph, config, progress, cancel)
}

/// One-variable sweep: see [`Executor::run_sensitivity`].
pub fn run_sensitivity(
    graph: &Graph,
    request: &SensitivityRequest,
) -> Result<SensitivityResult, EngineError> {
    Executor::new().run_sensitivity(graph, request)
}
