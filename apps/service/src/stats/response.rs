//! Response-time distribution.

use serde::Serialize;

use crate::models::Observation;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Median absolute deviation from the median
    pub mad: f64,
}

/// Value at quantile `p` (0.0..=1.0) of sorted data
///
/// Interpolates linearly between the two closest ranks at `p * (n - 1)`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

impl ResponseStats {
    /// Statistics over the measured (non-zero) response times
    pub fn from_observations(observations: &[Observation]) -> Option<Self> {
        Self::from_values(
            observations
                .iter()
                .filter(|o| o.response_time_ms > 0)
                .map(|o| o.response_time_ms as f64)
                .collect(),
        )
    }

    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let median = percentile(&values, 0.5);

        let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
        deviations.sort_by(f64::total_cmp);

        Some(Self {
            count,
            min: values[0],
            max: values[count - 1],
            mean,
            p50: median,
            p90: percentile(&values, 0.90),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
            std_dev: variance.sqrt(),
            mad: percentile(&deviations, 0.5),
        })
    }
}
