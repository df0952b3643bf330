//! Meta crate that re-exports the ScenarioForge building blocks with
//! sensible defaults. Downstream users can depend on this crate and opt
//! into specific layers via feature flags while keeping access to the
//! underlying crates when deeper integration is required.

#[cfg(feature = "common")]
pub use scenarioforge_common as common;

#[cfg(feature = "expr")]
pub use scenarioforge_expr as expr;

#[cfg(feature = "engine")]
pub use scenarioforge_engine as engine;

#[cfg(feature = "engine")]
pub use scenarioforge_engine::{
    CancelToken, DistributionConfig, EngineError, EngineErrorKind, ExecutionResult, Executor,
    FeedbackLoop, FeedbackOptions, Graph, MonteCarloResult, RiskMetrics, SimulationConfig, Value,
    execute, execute_with_feedback, risk_metrics, run_monte_carlo, run_sensitivity,
};
