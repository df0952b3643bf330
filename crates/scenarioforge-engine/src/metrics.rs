//! Descriptive statistics and tail-risk measures over sample vectors.
//!
//! All formulas are population formulas. An empty sample set produces the
//! documented defaults (`min = +inf`, `max = -inf`, everything else NaN)
//! rather than an error, so aggregation over a fully-failed Monte Carlo run
//! still yields a well-formed result.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentiles {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Lower-tail convention: VaR95 is the 5th percentile. Callers working with
/// losses-as-positives re-sign on their side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueAtRisk {
    pub var95: f64,
    pub var99: f64,
    pub var999: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalValueAtRisk {
    pub cvar95: f64,
    pub cvar99: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub mean: f64,
    pub median: f64,
    pub standard_deviation: f64,
    pub variance: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: Percentiles,
    pub value_at_risk: ValueAtRisk,
    pub conditional_value_at_risk: ConditionalValueAtRisk,
}

/// Linear interpolation between order statistics: for sorted `xs` and
/// `p ∈ [0, 100]`, the rank is `(p/100)·(n-1)` and the result interpolates
/// between the two bracketing elements.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

pub(crate) fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

pub(crate) fn population_variance(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n == 0 {
        return f64::NAN;
    }
    let mean = xs.iter().sum::<f64>() / n as f64;
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64
}

/// Mean of the samples at or below `threshold` (the expected shortfall of
/// the tail that VaR cuts off).
fn tail_mean(sorted: &[f64], threshold: f64) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &x in sorted {
        if x > threshold {
            break;
        }
        sum += x;
        count += 1;
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

pub fn risk_metrics(samples: &[f64]) -> RiskMetrics {
    let n = samples.len();
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean = if n == 0 {
        f64::NAN
    } else {
        samples.iter().sum::<f64>() / n as f64
    };
    let variance = population_variance(samples);
    let std_dev = variance.sqrt();

    let (skewness, kurtosis) = if n == 0 || std_dev == 0.0 {
        (f64::NAN, f64::NAN)
    } else {
        let m3 = samples.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / n as f64;
        let m4 = samples.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / n as f64;
        (m3 / std_dev.powi(3), m4 / variance.powi(2))
    };

    let pct = |p: f64| percentile_of_sorted(&sorted, p);
    let percentiles = Percentiles {
        p5: pct(5.0),
        p10: pct(10.0),
        p25: pct(25.0),
        p50: pct(50.0),
        p75: pct(75.0),
        p90: pct(90.0),
        p95: pct(95.0),
        p99: pct(99.0),
    };
    let value_at_risk = ValueAtRisk {
        var95: pct(5.0),
        var99: pct(1.0),
        var999: pct(0.1),
    };
    let conditional_value_at_risk = ConditionalValueAtRisk {
        cvar95: tail_mean(&sorted, value_at_risk.var95),
        cvar99: tail_mean(&sorted, value_at_risk.var99),
    };

    RiskMetrics {
        mean,
        median: median_of_sorted(&sorted),
        standard_deviation: std_dev,
        variance,
        skewness,
        kurtosis,
        min: sorted.first().copied().unwrap_or(f64::INFINITY),
        max: sorted.last().copied().unwrap_or(f64::NEG_INFINITY),
        percentiles,
        value_at_risk,
        conditional_value_at_risk,
    }
}
