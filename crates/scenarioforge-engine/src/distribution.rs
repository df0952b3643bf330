//! Distribution configuration and the seeded samplers.
//!
//! Samplers read named parameters from the config; unknown parameter names
//! are ignored and missing ones take the documented defaults. An unknown
//! distribution tag logs one warning per process and falls back to a
//! uniform draw instead of failing the run.

use crate::rng::{SharedRng, default_rng};
use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;
use scenarioforge_common::{EngineError, EngineErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionConfig {
    /// Distribution family tag: `normal`, `uniform`, `uniformInt`,
    /// `bernoulli`, `triangular`, `beta`, `truncatedNormal`, `lognormal`,
    /// `exponential`, `poisson`, `discrete`, `compound`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Outcomes of a discrete distribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
    /// Matching probabilities; must sum to 1 within 1e-9.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<f64>>,
}

impl DistributionConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        DistributionConfig {
            kind: kind.into(),
            parameters: BTreeMap::new(),
            values: None,
            probabilities: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_discrete(mut self, values: Vec<f64>, probabilities: Vec<f64>) -> Self {
        self.values = Some(values);
        self.probabilities = Some(probabilities);
        self
    }

    /// First matching alias wins, then the default.
    fn param(&self, names: &[&str], default: f64) -> f64 {
        names
            .iter()
            .find_map(|n| self.parameters.get(*n))
            .copied()
            .unwrap_or(default)
    }

    /// Structural validation, used by graph validation for DISTRIBUTION
    /// nodes. Sampling itself only enforces the discrete-array rules.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.kind == "discrete" {
            let (values, probabilities) = self.discrete_arrays()?;
            if values.len() != probabilities.len() {
                return Err(EngineError::new(EngineErrorKind::Validation).with_message(format!(
                    "discrete distribution has {} values but {} probabilities",
                    values.len(),
                    probabilities.len()
                )));
            }
            let total: f64 = probabilities.iter().sum();
            if (total - 1.0).abs() > 1e-9 {
                return Err(EngineError::new(EngineErrorKind::Validation)
                    .with_message(format!("discrete probabilities sum to {total}, expected 1")));
            }
        }
        Ok(())
    }

    fn discrete_arrays(&self) -> Result<(&[f64], &[f64]), EngineError> {
        match (&self.values, &self.probabilities) {
            (Some(v), Some(p)) => Ok((v, p)),
            _ => Err(EngineError::new(EngineErrorKind::Validation)
                .with_message("discrete distribution requires values and probabilities")),
        }
    }
}

static WARNED_TAGS: Lazy<Mutex<FxHashSet<String>>> = Lazy::new(|| Mutex::new(FxHashSet::default()));

/// Draw one sample from the configured distribution using the given RNG
/// stream. Only a malformed `discrete` config is an error; an unknown tag
/// warns once and degrades to uniform.
pub fn sample_with(config: &DistributionConfig, rng: &SharedRng) -> Result<f64, EngineError> {
    match config.kind.as_str() {
        "normal" => Ok(sample_normal(
            config.param(&["mean"], 0.0),
            config.param(&["stddev", "std", "stdDev"], 1.0),
            rng,
        )),
        "uniform" => {
            let min = config.param(&["min"], 0.0);
            let max = config.param(&["max"], 1.0);
            Ok(min + rng.next_f64() * (max - min))
        }
        "uniformInt" => {
            let min = config.param(&["min"], 0.0);
            let max = config.param(&["max"], 10.0);
            Ok((min + rng.next_f64() * (max - min + 1.0)).floor())
        }
        "bernoulli" => {
            let p = config.param(&["p"], 0.5);
            Ok(if rng.next_f64() < p { 1.0 } else { 0.0 })
        }
        "triangular" => {
            let min = config.param(&["min"], 0.0);
            let max = config.param(&["max"], 1.0);
            let mode = config.param(&["mode"], (min + max) / 2.0);
            Ok(sample_triangular(min, max, mode, rng))
        }
        "beta" => Ok(sample_beta(
            config.param(&["alpha"], 2.0),
            config.param(&["beta"], 2.0),
            rng,
        )),
        "truncatedNormal" => Ok(sample_truncated_normal(
            config.param(&["mean"], 0.0),
            config.param(&["stddev", "std", "stdDev"], 1.0),
            config.param(&["min"], f64::NEG_INFINITY),
            config.param(&["max"], f64::INFINITY),
            rng,
        )),
        "lognormal" | "compound" => {
            let mu = config.param(&["mu", "mean"], 0.0);
            let sigma = config.param(&["sigma", "stdDev", "stddev"], 1.0);
            Ok((mu + sigma * standard_normal(rng)).exp())
        }
        "exponential" => {
            let rate = config.param(&["rate"], 1.0);
            Ok(-(1.0 - rng.next_f64()).ln() / rate)
        }
        "poisson" => Ok(sample_poisson(config.param(&["lambda"], 1.0), rng)),
        "discrete" => {
            let (values, probabilities) = config.discrete_arrays()?;
            Ok(sample_discrete(values, probabilities, rng))
        }
        other => {
            let mut warned = WARNED_TAGS.lock().expect("warned-tags lock poisoned");
            if warned.insert(other.to_string()) {
                tracing::warn!(
                    distribution = other,
                    "unknown distribution type, sampling uniform [0, 1)"
                );
            }
            Ok(rng.next_f64())
        }
    }
}

/// Draw from the process-wide default RNG stream (see `rng::set_seed`).
pub fn sample_distribution(config: &DistributionConfig) -> Result<f64, EngineError> {
    sample_with(config, &default_rng())
}

/* ===================  samplers  =================== */

/// Box-Muller, cosine branch. `u1` is clamped away from zero so the log
/// stays finite.
fn standard_normal(rng: &SharedRng) -> f64 {
    let u1 = rng.next_f64().max(f64::MIN_POSITIVE);
    let u2 = rng.next_f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn sample_normal(mean: f64, stddev: f64, rng: &SharedRng) -> f64 {
    mean + stddev * standard_normal(rng)
}

/// Inverse CDF of the triangular distribution.
fn sample_triangular(min: f64, max: f64, mode: f64, rng: &SharedRng) -> f64 {
    let u = rng.next_f64();
    let span = max - min;
    if span <= 0.0 {
        return min;
    }
    let cut = (mode - min) / span;
    if u < cut {
        min + (u * span * (mode - min)).sqrt()
    } else {
        max - ((1.0 - u) * span * (max - mode)).sqrt()
    }
}

/// Joehnk's rejection method.
fn sample_beta(alpha: f64, beta: f64, rng: &SharedRng) -> f64 {
    for _ in 0..1000 {
        let x = rng.next_f64().powf(1.0 / alpha);
        let y = rng.next_f64().powf(1.0 / beta);
        if x + y <= 1.0 && x + y > 0.0 {
            return x / (x + y);
        }
    }
    // pathological shape parameters; fall back to the distribution mean
    alpha / (alpha + beta)
}

fn sample_truncated_normal(mean: f64, stddev: f64, min: f64, max: f64, rng: &SharedRng) -> f64 {
    for _ in 0..1000 {
        let x = sample_normal(mean, stddev, rng);
        if x >= min && x <= max {
            return x;
        }
    }
    mean.clamp(min, max)
}

/// Knuth's multiplicative algorithm.
fn sample_poisson(lambda: f64, rng: &SharedRng) -> f64 {
    if lambda <= 0.0 {
        return 0.0;
    }
    let limit = (-lambda).exp();
    let mut k = 0u64;
    let mut p = 1.0;
    loop {
        k += 1;
        p *= rng.next_f64();
        if p <= limit {
            return (k - 1) as f64;
        }
    }
}

/// Inverse CDF over the discrete outcomes.
fn sample_discrete(values: &[f64], probabilities: &[f64], rng: &SharedRng) -> f64 {
    let u = rng.next_f64();
    let mut cumulative = 0.0;
    for (value, p) in values.iter().zip(probabilities) {
        cumulative += p;
        if u < cumulative {
            return *value;
        }
    }
    values.last().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(config: &DistributionConfig, n: usize, seed: u64) -> (f64, f64) {
        let rng = SharedRng::seeded(seed);
        let samples: Vec<f64> = (0..n).map(|_| sample_with(config, &rng).unwrap()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        (mean, var.sqrt())
    }

    #[test]
    fn normal_moments() {
        let config = DistributionConfig::new("normal")
            .with_parameter("mean", 100.0)
            .with_parameter("stddev", 10.0);
        let (mean, std) = stats(&config, 20_000, 42);
        assert!((mean - 100.0).abs() < 0.5, "mean {mean}");
        assert!((std - 10.0).abs() < 0.3, "std {std}");
    }

    #[test]
    fn uniform_respects_bounds() {
        let config = DistributionConfig::new("uniform")
            .with_parameter("min", 5.0)
            .with_parameter("max", 7.0);
        let rng = SharedRng::seeded(1);
        for _ in 0..5000 {
            let x = sample_with(&config, &rng).unwrap();
            assert!((5.0..7.0).contains(&x));
        }
    }

    #[test]
    fn uniform_int_is_integral_and_inclusive() {
        let config = DistributionConfig::new("uniformInt")
            .with_parameter("min", 1.0)
            .with_parameter("max", 3.0);
        let rng = SharedRng::seeded(2);
        let mut seen = [false; 3];
        for _ in 0..1000 {
            let x = sample_with(&config, &rng).unwrap();
            assert_eq!(x, x.trunc());
            assert!((1.0..=3.0).contains(&x));
            seen[(x as usize) - 1] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn bernoulli_frequency_tracks_p() {
        let config = DistributionConfig::new("bernoulli").with_parameter("p", 0.3);
        let rng = SharedRng::seeded(3);
        let hits: f64 = (0..20_000)
            .map(|_| sample_with(&config, &rng).unwrap())
            .sum();
        assert!((hits / 20_000.0 - 0.3).abs() < 0.02);
    }

    #[test]
    fn triangular_stays_in_range_and_peaks_at_mode() {
        let config = DistributionConfig::new("triangular")
            .with_parameter("min", 0.0)
            .with_parameter("max", 10.0)
            .with_parameter("mode", 2.0);
        let (mean, _) = stats(&config, 20_000, 4);
        // analytic mean = (min + max + mode) / 3 = 4
        assert!((mean - 4.0).abs() < 0.1, "mean {mean}");
    }

    #[test]
    fn beta_mean_matches_alpha_over_sum() {
        let config = DistributionConfig::new("beta")
            .with_parameter("alpha", 2.0)
            .with_parameter("beta", 6.0);
        let (mean, _) = stats(&config, 20_000, 5);
        assert!((mean - 0.25).abs() < 0.02, "mean {mean}");
    }

    #[test]
    fn truncated_normal_respects_bounds() {
        let config = DistributionConfig::new("truncatedNormal")
            .with_parameter("mean", 0.0)
            .with_parameter("stddev", 5.0)
            .with_parameter("min", -1.0)
            .with_parameter("max", 1.0);
        let rng = SharedRng::seeded(6);
        for _ in 0..2000 {
            let x = sample_with(&config, &rng).unwrap();
            assert!((-1.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn exponential_mean_is_inverse_rate() {
        let config = DistributionConfig::new("exponential").with_parameter("rate", 2.0);
        let (mean, _) = stats(&config, 20_000, 7);
        assert!((mean - 0.5).abs() < 0.02, "mean {mean}");
    }

    #[test]
    fn poisson_mean_tracks_lambda() {
        let config = DistributionConfig::new("poisson").with_parameter("lambda", 4.0);
        let (mean, _) = stats(&config, 20_000, 8);
        assert!((mean - 4.0).abs() < 0.1, "mean {mean}");
    }

    #[test]
    fn discrete_requires_arrays() {
        let config = DistributionConfig::new("discrete");
        let rng = SharedRng::seeded(9);
        assert!(sample_with(&config, &rng).is_err());
    }

    #[test]
    fn discrete_matches_probabilities() {
        let config = DistributionConfig::new("discrete")
            .with_discrete(vec![10.0, 20.0, 30.0], vec![0.2, 0.5, 0.3]);
        config.validate().unwrap();
        let rng = SharedRng::seeded(10);
        let mut counts = std::collections::BTreeMap::new();
        for _ in 0..20_000 {
            let x = sample_with(&config, &rng).unwrap() as i64;
            *counts.entry(x).or_insert(0usize) += 1;
        }
        assert!((counts[&20] as f64 / 20_000.0 - 0.5).abs() < 0.02);
    }

    #[test]
    fn discrete_validation_checks_lengths_and_sum() {
        let bad_len = DistributionConfig::new("discrete")
            .with_discrete(vec![1.0, 2.0], vec![1.0]);
        assert!(bad_len.validate().is_err());
        let bad_sum = DistributionConfig::new("discrete")
            .with_discrete(vec![1.0, 2.0], vec![0.5, 0.6]);
        assert!(bad_sum.validate().is_err());
    }

    #[test]
    fn unknown_tag_falls_back_to_uniform() {
        let config = DistributionConfig::new("weibull-ish");
        let rng = SharedRng::seeded(11);
        for _ in 0..100 {
            let x = sample_with(&config, &rng).unwrap();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn compound_falls_back_to_lognormal() {
        let compound = DistributionConfig::new("compound");
        let lognormal = DistributionConfig::new("lognormal");
        let a = SharedRng::seeded(12);
        let b = SharedRng::seeded(12);
        assert_eq!(
            sample_with(&compound, &a).unwrap(),
            sample_with(&lognormal, &b).unwrap()
        );
    }

    #[test]
    fn same_seed_same_samples() {
        let config = DistributionConfig::new("normal");
        let a = SharedRng::seeded(99);
        let b = SharedRng::seeded(99);
        for _ in 0..100 {
            assert_eq!(
                sample_with(&config, &a).unwrap(),
                sample_with(&config, &b).unwrap()
            );
        }
    }
}
