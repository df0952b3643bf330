//! Monte Carlo drivers: the canonical sequential loop (bit-reproducible
//! from its seed) and an opt-in rayon driver with deterministically derived
//! per-iteration streams.

use crate::executor::{
    CancelToken, ExecutionPlan, Executor, PassOutcome, PassScope, feedback_binding,
    feedback_history_binding, merge_params,
};
use crate::feedback::FeedbackEngine;
use crate::graph::model::{Graph, NodeKind};
use crate::kernels::PortValues;
use crate::metrics::{RiskMetrics, risk_metrics};
use crate::rng::{SharedRng, derive_seed};
use rayon::prelude::*;
use scenarioforge_common::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/* ===================  configuration  =================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    Deterministic,
    #[default]
    MonteCarlo,
    Sensitivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeConfig {
    pub start: f64,
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationConfig {
    pub graph_id: Option<String>,
    pub mode: SimulationMode,
    pub iterations: usize,
    pub seed: Option<u64>,
    pub time: Option<TimeConfig>,
    pub max_execution_time_ms: Option<u64>,
    /// Worker hint for the parallel driver; `None` leaves it to rayon.
    pub parallelism: Option<usize>,
    /// Restrict capture to these OUTPUT nodes; `None` captures all.
    pub output_node_ids: Option<Vec<String>>,
    pub capture_intermediates: bool,
    /// Exit early once every feedback loop with convergence enabled has
    /// converged.
    pub stop_on_convergence: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            graph_id: None,
            mode: SimulationMode::default(),
            iterations: 1000,
            seed: None,
            time: None,
            max_execution_time_ms: None,
            parallelism: None,
            output_node_ids: None,
            capture_intermediates: false,
            stop_on_convergence: false,
        }
    }
}

impl SimulationConfig {
    pub fn monte_carlo(iterations: usize, seed: u64) -> Self {
        SimulationConfig {
            iterations,
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Percent complete in `[0, 100]`.
    pub progress: f64,
    pub iterations_done: usize,
    pub estimated_ms_remaining: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Raw samples, node id → output key → values in iteration order.
pub type SampleMap = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

#[derive(Debug, Clone)]
pub struct MonteCarloResult {
    pub status: RunStatus,
    pub iterations_run: usize,
    pub failed_iterations: usize,
    pub samples: SampleMap,
    pub aggregated: BTreeMap<String, BTreeMap<String, RiskMetrics>>,
    /// Per-iteration node outputs, only when `capture_intermediates`.
    pub intermediates: Option<Vec<BTreeMap<String, PortValues>>>,
    pub execution_time_ms: f64,
    /// Set when the run never started (validation or cycle failure).
    pub error: Option<EngineError>,
}

impl MonteCarloResult {
    fn failed(error: EngineError, started: Instant) -> Self {
        MonteCarloResult {
            status: RunStatus::Failed,
            iterations_run: 0,
            failed_iterations: 0,
            samples: SampleMap::new(),
            aggregated: BTreeMap::new(),
            intermediates: None,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: Some(error),
        }
    }
}

fn entropy_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}

fn iteration_time(config: &SimulationConfig, i: usize) -> f64 {
    match &config.time {
        Some(t) => t.start + i as f64 * t.step,
        None => i as f64,
    }
}

fn capture_samples(
    graph: &Graph,
    outcome: &PassOutcome,
    filter: Option<&Vec<String>>,
    samples: &mut SampleMap,
) {
    for (idx, node) in graph.nodes.iter().enumerate() {
        if node.kind != NodeKind::Output {
            continue;
        }
        if let Some(filter) = filter {
            if !filter.iter().any(|id| id == &node.id) {
                continue;
            }
        }
        let Some(values) = outcome.outputs.get(idx).and_then(|v| v.as_ref()) else {
            continue;
        };
        for (key, value) in values {
            if let Some(n) = value.as_number() {
                samples
                    .entry(node.id.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .push(n);
            }
        }
    }
}

fn aggregate(samples: &SampleMap) -> BTreeMap<String, BTreeMap<String, RiskMetrics>> {
    samples
        .iter()
        .map(|(node, buffers)| {
            (
                node.clone(),
                buffers
                    .iter()
                    .map(|(key, xs)| (key.clone(), risk_metrics(xs)))
                    .collect(),
            )
        })
        .collect()
}

fn intermediates_entry(graph: &Graph, outcome: &PassOutcome) -> BTreeMap<String, PortValues> {
    graph
        .nodes
        .iter()
        .enumerate()
        .filter_map(|(idx, node)| {
            outcome
                .outputs
                .get(idx)
                .and_then(|v| v.as_ref())
                .map(|values| (node.id.clone(), values.clone()))
        })
        .collect()
}

/* ===================  drivers  =================== */

impl Executor {
    /// Sequential Monte Carlo. For a given `(graph, params, seed,
    /// iterations)` the raw samples and aggregates are identical on every
    /// run: all randomness flows through one freshly seeded stream and
    /// the schedule is fixed by the tie-broken topological order.
    pub fn run_monte_carlo(
        &self,
        graph: &Graph,
        config: &SimulationConfig,
        mut progress: Option<&mut dyn FnMut(ProgressUpdate)>,
        cancel: Option<&CancelToken>,
    ) -> MonteCarloResult {
        crate::builtins::load_builtins();
        crate::kernels::load_kernels();
        let started = Instant::now();

        let plan = match ExecutionPlan::prepare(graph) {
            Ok(plan) => plan,
            Err(err) => return MonteCarloResult::failed(err, started),
        };

        let master = config.seed.unwrap_or_else(entropy_seed);
        let run = self.clone().with_rng(SharedRng::seeded(master));
        let merged = merge_params(graph, None);
        let deadline = config
            .max_execution_time_ms
            .map(|ms| started + Duration::from_millis(ms));

        let loops = graph.feedback_loops.clone();
        let mut engine = FeedbackEngine::new(&loops);
        let has_loops = !loops.is_empty();

        let total = config.iterations.max(1);
        let stride = (total / 100).max(1);
        let mut samples = SampleMap::new();
        let mut intermediates = config.capture_intermediates.then(Vec::new);
        let mut status = RunStatus::Completed;
        let mut iterations_run = 0usize;
        let mut failed_iterations = 0usize;

        for i in 0..total {
            if cancel.is_some_and(CancelToken::is_cancelled)
                || deadline.is_some_and(|d| Instant::now() >= d)
            {
                status = RunStatus::Cancelled;
                break;
            }

            let injections = has_loops.then(|| engine.injections(&loops));
            let feedback = has_loops.then(|| feedback_binding(&engine, &loops));
            let feedback_history = has_loops.then(|| feedback_history_binding(&engine, &loops));
            let scope = PassScope {
                iteration: i as u64,
                time: iteration_time(config, i),
                injections: injections.as_ref(),
                feedback: feedback.as_ref(),
                feedback_history: feedback_history.as_ref(),
                cancel,
                ..PassScope::root(&merged)
            };

            let outcome = run.run_pass(&plan, &scope);
            iterations_run = i + 1;

            match &outcome.error {
                Some(err) if err.is_cancelled() => {
                    status = RunStatus::Cancelled;
                    break;
                }
                Some(err) => {
                    tracing::debug!(iteration = i, error = %err, "iteration failed");
                    failed_iterations += 1;
                }
                None => {
                    capture_samples(graph, &outcome, config.output_node_ids.as_ref(), &mut samples);
                    if let Some(acc) = intermediates.as_mut() {
                        acc.push(intermediates_entry(graph, &outcome));
                    }
                    if has_loops {
                        if run
                            .observe_loops(&plan, &loops, &mut engine, &outcome, i as u64, &merged)
                            .is_err()
                        {
                            failed_iterations += 1;
                        }
                    }
                }
            }

            if config.stop_on_convergence && has_loops && engine.all_converged(&loops) {
                break;
            }

            if let Some(callback) = progress.as_mut() {
                let done = i + 1;
                if done % stride == 0 || done == total {
                    let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                    let per_iteration = elapsed / done as f64;
                    callback(ProgressUpdate {
                        progress: done as f64 / total as f64 * 100.0,
                        iterations_done: done,
                        estimated_ms_remaining: per_iteration * (total - done) as f64,
                    });
                }
            }
        }

        MonteCarloResult {
            status,
            iterations_run,
            failed_iterations,
            aggregated: aggregate(&samples),
            samples,
            intermediates,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: None,
        }
    }

    /// Parallel Monte Carlo: iteration `i` runs on its own stream seeded
    /// `derive_seed(master, i)`, and samples are reassembled in iteration
    /// order, so the driver is reproducible against itself (its streams
    /// differ from the sequential driver's single stream by construction).
    /// Graphs with feedback loops are iteration-dependent and fall back to
    /// the sequential driver.
    pub fn run_monte_carlo_parallel(
        &self,
        graph: &Graph,
        config: &SimulationConfig,
        cancel: Option<&CancelToken>,
    ) -> MonteCarloResult {
        if !graph.feedback_loops.is_empty() {
            return self.run_monte_carlo(graph, config, None, cancel);
        }

        crate::builtins::load_builtins();
        crate::kernels::load_kernels();
        let started = Instant::now();

        let plan = match ExecutionPlan::prepare(graph) {
            Ok(plan) => plan,
            Err(err) => return MonteCarloResult::failed(err, started),
        };

        let master = config.seed.unwrap_or_else(entropy_seed);
        let merged = merge_params(graph, None);
        let deadline = config
            .max_execution_time_ms
            .map(|ms| started + Duration::from_millis(ms));
        let total = config.iterations.max(1);

        enum IterationResult {
            Skipped,
            Failed,
            Done(PassOutcome),
        }

        let worker_results: Vec<IterationResult> = (0..total)
            .into_par_iter()
            .map(|i| {
                if cancel.is_some_and(CancelToken::is_cancelled)
                    || deadline.is_some_and(|d| Instant::now() >= d)
                {
                    return IterationResult::Skipped;
                }
                let worker = Executor {
                    rng: SharedRng::seeded(derive_seed(master, i as u64)),
                    subgraphs: self.subgraphs.clone(),
                };
                let scope = PassScope {
                    iteration: i as u64,
                    time: iteration_time(config, i),
                    cancel,
                    ..PassScope::root(&merged)
                };
                let outcome = worker.run_pass(&plan, &scope);
                if outcome.error.is_some() {
                    IterationResult::Failed
                } else {
                    IterationResult::Done(outcome)
                }
            })
            .collect();

        let mut samples = SampleMap::new();
        let mut intermediates = config.capture_intermediates.then(Vec::new);
        let mut iterations_run = 0usize;
        let mut failed_iterations = 0usize;
        let mut cancelled = false;

        for result in &worker_results {
            match result {
                IterationResult::Skipped => cancelled = true,
                IterationResult::Failed => {
                    iterations_run += 1;
                    failed_iterations += 1;
                }
                IterationResult::Done(outcome) => {
                    iterations_run += 1;
                    capture_samples(graph, outcome, config.output_node_ids.as_ref(), &mut samples);
                    if let Some(acc) = intermediates.as_mut() {
                        acc.push(intermediates_entry(graph, outcome));
                    }
                }
            }
        }

        MonteCarloResult {
            status: if cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            },
            iterations_run,
            failed_iterations,
            aggregated: aggregate(&samples),
            samples,
            intermediates,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            error: None,
        }
    }
}
