//! One-variable sensitivity sweep: step a parameter across a range, run the
//! deterministic pipeline at each step, and fit a least-squares line through
//! the `(input, output)` points.

use crate::executor::Executor;
use crate::graph::model::Graph;
use scenarioforge_common::{EngineError, EngineErrorKind, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityRequest {
    pub parameter_node_id: String,
    /// The `data` key being swept (usually `value`).
    pub parameter_field: String,
    pub output_node_id: String,
    pub output_key: String,
    pub range: (f64, f64),
    pub steps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityPoint {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityResult {
    pub data_points: Vec<SensitivityPoint>,
    /// Least-squares slope: the sensitivity of the output to the input.
    pub slope: f64,
    pub r_squared: f64,
    /// slope · mean(input) / mean(output)
    pub elasticity: f64,
}

impl Executor {
    pub fn run_sensitivity(
        &self,
        graph: &Graph,
        request: &SensitivityRequest,
    ) -> Result<SensitivityResult, EngineError> {
        if request.steps == 0 {
            return Err(EngineError::new(EngineErrorKind::Validation)
                .with_message("sensitivity sweep needs at least one step"));
        }
        if graph.node(&request.parameter_node_id).is_none() {
            return Err(EngineError::new(EngineErrorKind::Validation)
                .with_message(format!("no node '{}'", request.parameter_node_id)));
        }

        let (lo, hi) = request.range;
        let mut scratch = graph.clone();
        let scratch_node_id = request.parameter_node_id.clone();
        let mut data_points = Vec::with_capacity(request.steps);

        for k in 0..request.steps {
            let input = if request.steps == 1 {
                lo
            } else {
                lo + k as f64 * (hi - lo) / (request.steps - 1) as f64
            };

            scratch
                .node_mut(&scratch_node_id)
                .expect("checked above")
                .data
                .insert(request.parameter_field.clone(), Value::Number(input));

            let result = self.execute(&scratch, None);
            if let Some(err) = result.error {
                return Err(err);
            }
            let output = result
                .outputs
                .get(&request.output_node_id)
                .and_then(|values| values.get(&request.output_key))
                .ok_or_else(|| {
                    EngineError::new(EngineErrorKind::Runtime).with_message(format!(
                        "output '{}' not found on node '{}'",
                        request.output_key, request.output_node_id
                    ))
                })?
                .to_number();

            data_points.push(SensitivityPoint { input, output });
        }

        let (slope, r_squared) = linear_fit(&data_points);
        let mean_input =
            data_points.iter().map(|p| p.input).sum::<f64>() / data_points.len() as f64;
        let mean_output =
            data_points.iter().map(|p| p.output).sum::<f64>() / data_points.len() as f64;
        let elasticity = if mean_output == 0.0 {
            0.0
        } else {
            slope * mean_input / mean_output
        };

        Ok(SensitivityResult {
            data_points,
            slope,
            r_squared,
            elasticity,
        })
    }
}

/// Ordinary least squares; returns `(slope, r²)`. A degenerate sweep (one
/// point, or zero input variance) fits a flat line exactly.
fn linear_fit(points: &[SensitivityPoint]) -> (f64, f64) {
    let n = points.len() as f64;
    if points.len() < 2 {
        return (0.0, 1.0);
    }
    let mean_x = points.iter().map(|p| p.input).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.output).sum::<f64>() / n;
    let ss_xx: f64 = points.iter().map(|p| (p.input - mean_x).powi(2)).sum();
    let ss_xy: f64 = points
        .iter()
        .map(|p| (p.input - mean_x) * (p.output - mean_y))
        .sum();
    if ss_xx == 0.0 {
        return (0.0, 1.0);
    }
    let slope = ss_xy / ss_xx;
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = points.iter().map(|p| (p.output - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|p| (p.output - (intercept + slope * p.input)).powi(2))
        .sum();
    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    (slope, r_squared)
}
