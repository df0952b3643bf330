//! Feedback loops: declared source→target couplings applied between
//! iterations, with transforms, triggers, and convergence detection.
//!
//! The engine owns one [`FeedbackState`] per enabled loop for the duration
//! of a run. Before each iteration it produces the injection map the
//! executor merges into target inputs; after each iteration it observes the
//! source values, applies the transforms and updates convergence.

use chrono::Utc;
use rustc_hash::FxHashMap;
use scenarioforge_common::{EngineError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/* ===================  loop declaration  =================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopEndpoint {
    pub node_id: String,
    pub port_id: String,
    /// Optional path into a structured port value, dot-separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl LoopEndpoint {
    pub fn new(node_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        LoopEndpoint {
            node_id: node_id.into(),
            port_id: port_id.into(),
            field: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Iteration,
    TimeStep,
    Convergence,
    Threshold,
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    #[default]
    Direct,
    Delta,
    MovingAvg,
    Exponential,
    Pid,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    Rising,
    Falling,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformConfig {
    pub window_size: usize,
    pub alpha: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    pub threshold: f64,
    pub direction: ThresholdDirection,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            window_size: 5,
            alpha: 0.5,
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            threshold: 0.0,
            direction: ThresholdDirection::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceMetric {
    #[default]
    Absolute,
    Relative,
    Oscillation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvergenceConfig {
    pub enabled: bool,
    pub metric: ConvergenceMetric,
    pub tolerance: f64,
    pub window_size: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        ConvergenceConfig {
            enabled: true,
            metric: ConvergenceMetric::Absolute,
            tolerance: 1e-6,
            window_size: 5,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_state_history() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackLoop {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: LoopEndpoint,
    pub target: LoopEndpoint,
    /// Iterations the injection lags behind; while the history is shorter
    /// than this, the initial value is injected.
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub trigger: TriggerKind,
    #[serde(default)]
    pub transform: TransformKind,
    #[serde(default)]
    pub config: TransformConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_expression: Option<String>,
    #[serde(default)]
    pub initial_value: f64,
    /// Bound on the retained history length.
    #[serde(default = "default_state_history")]
    pub state_history: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceConfig>,
}

impl FeedbackLoop {
    pub fn new(id: impl Into<String>, source: LoopEndpoint, target: LoopEndpoint) -> Self {
        FeedbackLoop {
            id: id.into(),
            enabled: true,
            source,
            target,
            delay: 0,
            trigger: TriggerKind::default(),
            transform: TransformKind::default(),
            config: TransformConfig::default(),
            custom_expression: None,
            initial_value: 0.0,
            state_history: default_state_history(),
            convergence: None,
        }
    }
}

/* ===================  per-run state  =================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub iteration: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    pub integral: f64,
    pub previous_error: f64,
}

#[derive(Debug, Clone)]
pub struct FeedbackState {
    pub history: VecDeque<HistoryEntry>,
    pub current_value: f64,
    pub converged: bool,
    pub convergence_iteration: Option<u64>,
    pub pid: PidState,
    smoothed: Option<f64>,
    last_observed: Option<f64>,
}

impl FeedbackState {
    fn new(initial_value: f64) -> Self {
        FeedbackState {
            history: VecDeque::new(),
            current_value: initial_value,
            converged: false,
            convergence_iteration: None,
            pid: PidState::default(),
            smoothed: None,
            last_observed: None,
        }
    }
}

/// Per-loop summary handed back from `execute_with_feedback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopReport {
    pub converged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence_iteration: Option<u64>,
    pub final_value: f64,
    pub history: Vec<HistoryEntry>,
}

/// Injection map: target node id → (port id, optional field path, value).
pub type Injections = FxHashMap<String, Vec<(String, Option<String>, Value)>>;

/* ===================  the engine  =================== */

#[derive(Debug, Clone)]
pub struct FeedbackEngine {
    states: BTreeMap<String, FeedbackState>,
}

impl FeedbackEngine {
    pub fn new(loops: &[FeedbackLoop]) -> Self {
        let states = loops
            .iter()
            .filter(|l| l.enabled)
            .map(|l| (l.id.clone(), FeedbackState::new(l.initial_value)))
            .collect();
        FeedbackEngine { states }
    }

    pub fn state(&self, loop_id: &str) -> Option<&FeedbackState> {
        self.states.get(loop_id)
    }

    /// Values to merge into target inputs before the next pass. A loop
    /// whose history is still shorter than its delay injects its initial
    /// value.
    pub fn injections(&self, loops: &[FeedbackLoop]) -> Injections {
        let mut out: Injections = FxHashMap::default();
        for lp in loops.iter().filter(|l| l.enabled) {
            let Some(state) = self.states.get(&lp.id) else {
                continue;
            };
            let value = if state.history.len() < lp.delay as usize {
                lp.initial_value
            } else {
                state.current_value
            };
            out.entry(lp.target.node_id.clone()).or_default().push((
                lp.target.port_id.clone(),
                lp.target.field.clone(),
                Value::Number(value),
            ));
        }
        out
    }

    /// Record the post-pass source reading for one loop: check the trigger,
    /// apply the transform, push history, update convergence. `custom`
    /// evaluates a custom transform expression against the observed value.
    pub fn observe(
        &mut self,
        lp: &FeedbackLoop,
        observed: f64,
        iteration: u64,
        custom: &dyn Fn(&str, f64) -> Result<f64, EngineError>,
    ) -> Result<(), EngineError> {
        let Some(state) = self.states.get_mut(&lp.id) else {
            return Ok(());
        };

        if !trigger_fires(lp, state, observed) {
            state.last_observed = Some(observed);
            return Ok(());
        }

        let transformed = match lp.transform {
            TransformKind::Direct => observed,
            TransformKind::Delta => observed - state.last_observed.unwrap_or(observed),
            TransformKind::MovingAvg => {
                // window over the history as it stands plus the new reading
                let window = lp.config.window_size.max(1);
                let prior = state
                    .history
                    .iter()
                    .rev()
                    .take(window - 1)
                    .map(|e| e.value);
                let mut sum = observed;
                let mut count = 1usize;
                for v in prior {
                    sum += v;
                    count += 1;
                }
                sum / count as f64
            }
            TransformKind::Exponential => {
                let prev = state.smoothed.unwrap_or(observed);
                let s = lp.config.alpha * observed + (1.0 - lp.config.alpha) * prev;
                state.smoothed = Some(s);
                s
            }
            TransformKind::Pid => {
                let dt = 1.0;
                let error = lp.config.setpoint - observed;
                state.pid.integral += error * dt;
                let derivative = (error - state.pid.previous_error) / dt;
                state.pid.previous_error = error;
                let correction = lp.config.kp * error
                    + lp.config.ki * state.pid.integral
                    + lp.config.kd * derivative;
                // the correction steers the observed value toward the setpoint
                observed + correction
            }
            TransformKind::Custom => match &lp.custom_expression {
                Some(src) => custom(src, observed)?,
                None => observed,
            },
        };

        let delta = state.history.back().map(|e| transformed - e.value);
        state.history.push_back(HistoryEntry {
            iteration,
            value: transformed,
            delta,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        while state.history.len() > lp.state_history.max(1) {
            state.history.pop_front();
        }

        state.current_value = transformed;
        state.last_observed = Some(observed);

        if let Some(convergence) = &lp.convergence {
            if convergence.enabled && !state.converged && is_converged(state, convergence) {
                state.converged = true;
                state.convergence_iteration = Some(iteration);
            }
        }

        Ok(())
    }

    /// Global convergence: every enabled loop with enabled convergence has
    /// converged, and there is at least one such loop.
    pub fn all_converged(&self, loops: &[FeedbackLoop]) -> bool {
        let mut any = false;
        for lp in loops.iter().filter(|l| l.enabled) {
            if lp.convergence.is_some_and(|c| c.enabled) {
                any = true;
                if !self.states.get(&lp.id).is_some_and(|s| s.converged) {
                    return false;
                }
            }
        }
        any
    }

    pub fn reports(&self) -> BTreeMap<String, LoopReport> {
        self.states
            .iter()
            .map(|(id, state)| {
                (
                    id.clone(),
                    LoopReport {
                        converged: state.converged,
                        convergence_iteration: state.convergence_iteration,
                        final_value: state.current_value,
                        history: state.history.iter().cloned().collect(),
                    },
                )
            })
            .collect()
    }
}

fn trigger_fires(lp: &FeedbackLoop, state: &FeedbackState, observed: f64) -> bool {
    match lp.trigger {
        TriggerKind::Iteration | TriggerKind::TimeStep | TriggerKind::Schedule => true,
        TriggerKind::Convergence => !state.converged,
        TriggerKind::Threshold => {
            let Some(prev) = state.last_observed else {
                return false;
            };
            let t = lp.config.threshold;
            let rising = prev < t && observed >= t;
            let falling = prev > t && observed <= t;
            match lp.config.direction {
                ThresholdDirection::Rising => rising,
                ThresholdDirection::Falling => falling,
                ThresholdDirection::Both => rising || falling,
            }
        }
    }
}

fn is_converged(state: &FeedbackState, config: &ConvergenceConfig) -> bool {
    let window = config.window_size.max(2);
    if state.history.len() < window {
        return false;
    }
    let values: Vec<f64> = state
        .history
        .iter()
        .rev()
        .take(window)
        .map(|e| e.value)
        .collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;

    match config.metric {
        ConvergenceMetric::Absolute => values
            .iter()
            .all(|v| (v - mean).abs() <= config.tolerance),
        ConvergenceMetric::Relative => {
            if mean == 0.0 {
                values.iter().all(|v| *v == 0.0)
            } else {
                values
                    .iter()
                    .all(|v| ((v - mean) / mean).abs() <= config.tolerance)
            }
        }
        ConvergenceMetric::Oscillation => {
            let diffs: Vec<f64> = values.windows(2).map(|w| w[0] - w[1]).collect();
            let sign_changes = diffs
                .windows(2)
                .filter(|w| w[0].signum() != w[1].signum() && w[0] != 0.0 && w[1] != 0.0)
                .count();
            sign_changes <= 1
                && (values.first().unwrap() - values.last().unwrap()).abs() <= config.tolerance
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_custom(_: &str, x: f64) -> Result<f64, EngineError> {
        Ok(x)
    }

    fn simple_loop(transform: TransformKind) -> FeedbackLoop {
        let mut lp = FeedbackLoop::new(
            "l1",
            LoopEndpoint::new("src", "out"),
            LoopEndpoint::new("dst", "in"),
        );
        lp.transform = transform;
        lp
    }

    #[test]
    fn direct_transform_passes_values_through() {
        let lp = simple_loop(TransformKind::Direct);
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        engine.observe(&lp, 7.0, 0, &no_custom).unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 7.0);
    }

    #[test]
    fn delta_transform_is_zero_first_then_differences() {
        let lp = simple_loop(TransformKind::Delta);
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        engine.observe(&lp, 10.0, 0, &no_custom).unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 0.0);
        engine.observe(&lp, 13.0, 1, &no_custom).unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 3.0);
    }

    #[test]
    fn moving_average_windows_over_history() {
        let mut lp = simple_loop(TransformKind::MovingAvg);
        lp.config.window_size = 2;
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        engine.observe(&lp, 2.0, 0, &no_custom).unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 2.0);
        engine.observe(&lp, 4.0, 1, &no_custom).unwrap();
        // mean of previous transformed (2) and new reading (4)
        assert_eq!(engine.state("l1").unwrap().current_value, 3.0);
    }

    #[test]
    fn exponential_smoothing_starts_at_first_value() {
        let mut lp = simple_loop(TransformKind::Exponential);
        lp.config.alpha = 0.5;
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        engine.observe(&lp, 10.0, 0, &no_custom).unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 10.0);
        engine.observe(&lp, 20.0, 1, &no_custom).unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 15.0);
    }

    #[test]
    fn pid_accumulates_integral_and_tracks_error() {
        let mut lp = simple_loop(TransformKind::Pid);
        lp.config = TransformConfig {
            kp: 1.0,
            ki: 0.5,
            kd: 0.2,
            setpoint: 100.0,
            ..TransformConfig::default()
        };
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        // error = 20; integral = 20; derivative = (20 - 0)/1 = 20
        engine.observe(&lp, 80.0, 0, &no_custom).unwrap();
        let expected = 80.0 + (1.0 * 20.0 + 0.5 * 20.0 + 0.2 * 20.0);
        assert_eq!(engine.state("l1").unwrap().current_value, expected);
        // error = 10; integral = 30; derivative = (10 - 20)/1 = -10
        engine.observe(&lp, 90.0, 1, &no_custom).unwrap();
        let expected = 90.0 + (1.0 * 10.0 + 0.5 * 30.0 + 0.2 * (-10.0));
        assert!((engine.state("l1").unwrap().current_value - expected).abs() < 1e-12);
    }

    #[test]
    fn custom_transform_goes_through_the_callback() {
        let mut lp = simple_loop(TransformKind::Custom);
        lp.custom_expression = Some("$feedbackValue * 2".into());
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        engine
            .observe(&lp, 5.0, 0, &|_, x| Ok(x * 2.0))
            .unwrap();
        assert_eq!(engine.state("l1").unwrap().current_value, 10.0);
    }

    #[test]
    fn delay_injects_initial_value_until_history_catches_up() {
        let mut lp = simple_loop(TransformKind::Direct);
        lp.delay = 2;
        lp.initial_value = -1.0;
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        let loops = [lp.clone()];

        let value_of = |inj: &Injections| match &inj["dst"][0].2 {
            Value::Number(n) => *n,
            other => panic!("expected number, got {other:?}"),
        };

        assert_eq!(value_of(&engine.injections(&loops)), -1.0);
        engine.observe(&lp, 5.0, 0, &no_custom).unwrap();
        assert_eq!(value_of(&engine.injections(&loops)), -1.0);
        engine.observe(&lp, 6.0, 1, &no_custom).unwrap();
        assert_eq!(value_of(&engine.injections(&loops)), 6.0);
    }

    #[test]
    fn threshold_trigger_fires_on_crossing_only() {
        let mut lp = simple_loop(TransformKind::Direct);
        lp.trigger = TriggerKind::Threshold;
        lp.config.threshold = 10.0;
        lp.config.direction = ThresholdDirection::Rising;
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));

        engine.observe(&lp, 5.0, 0, &no_custom).unwrap(); // no previous: no fire
        assert!(engine.state("l1").unwrap().history.is_empty());
        engine.observe(&lp, 12.0, 1, &no_custom).unwrap(); // crossed rising
        assert_eq!(engine.state("l1").unwrap().history.len(), 1);
        engine.observe(&lp, 13.0, 2, &no_custom).unwrap(); // stayed above: no fire
        assert_eq!(engine.state("l1").unwrap().history.len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut lp = simple_loop(TransformKind::Direct);
        lp.state_history = 3;
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        for i in 0..10 {
            engine.observe(&lp, i as f64, i, &no_custom).unwrap();
        }
        let state = engine.state("l1").unwrap();
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history.front().unwrap().value, 7.0);
    }

    #[test]
    fn absolute_convergence_detects_a_settled_series() {
        let mut lp = simple_loop(TransformKind::Direct);
        lp.convergence = Some(ConvergenceConfig {
            tolerance: 0.01,
            window_size: 3,
            ..ConvergenceConfig::default()
        });
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        for (i, v) in [10.0, 5.0, 5.001, 5.002, 5.001].iter().enumerate() {
            engine.observe(&lp, *v, i as u64, &no_custom).unwrap();
        }
        let state = engine.state("l1").unwrap();
        assert!(state.converged);
        assert_eq!(state.convergence_iteration, Some(3));
        assert!(engine.all_converged(&[lp]));
    }

    #[test]
    fn relative_convergence_with_zero_mean_requires_zeros() {
        let mut lp = simple_loop(TransformKind::Direct);
        lp.convergence = Some(ConvergenceConfig {
            metric: ConvergenceMetric::Relative,
            tolerance: 0.01,
            window_size: 2,
            ..ConvergenceConfig::default()
        });
        let mut engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        engine.observe(&lp, 1.0, 0, &no_custom).unwrap();
        engine.observe(&lp, -1.0, 1, &no_custom).unwrap();
        assert!(!engine.state("l1").unwrap().converged);
        engine.observe(&lp, 0.0, 2, &no_custom).unwrap();
        // window is [-1, 0]: mean -0.5, relative spread too large
        assert!(!engine.state("l1").unwrap().converged);
    }

    #[test]
    fn no_convergence_configured_means_no_global_convergence() {
        let lp = simple_loop(TransformKind::Direct);
        let engine = FeedbackEngine::new(std::slice::from_ref(&lp));
        assert!(!engine.all_converged(std::slice::from_ref(&lp)));
    }
}
