use serde::Serialize;

use super::{Metric, MetricName};

/// Minimum number of samples before a trend is reported.
const MIN_SAMPLES: usize = 3;

/// Size of the leading and trailing windows that are compared.
const WINDOW: usize = 3;

/// Relative change (percent) below which a metric counts as stable.
const STABLE_BAND_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

/// Trend summary for one metric name. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResult {
    pub trend: TrendDirection,
    /// Signed percent change of the recent window against the oldest one.
    pub change: f64,
    pub average: f64,
    pub percentile95: f64,
}

impl TrendResult {
    /// Neutral result used when there is not enough history.
    pub fn stable() -> Self {
        Self {
            trend: TrendDirection::Stable,
            change: 0.0,
            average: 0.0,
            percentile95: 0.0,
        }
    }
}

/// Compares the oldest samples of a metric against the newest ones.
///
/// Every core metric is "lower is better", so a rising value is reported as
/// degrading. Only the first and last three samples take part in the
/// direction; the middle of the history affects `average` and
/// `percentile95` only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendAnalyzer;

impl TrendAnalyzer {
    pub fn analyze(&self, metrics: &[Metric], name: &MetricName) -> TrendResult {
        let mut matching: Vec<&Metric> =
            metrics.iter().filter(|m| &m.name == name).collect();

        if matching.len() < MIN_SAMPLES {
            return TrendResult::stable();
        }

        // Stable sort keeps capture order for equal timestamps
        matching.sort_by_key(|m| m.timestamp);
        let values: Vec<f64> = matching.iter().map(|m| m.value).collect();

        let average = mean(&values);
        let percentile95 = percentile(&values, 95.0);

        let older = mean(&values[..WINDOW]);
        let recent = mean(&values[values.len() - WINDOW..]);

        // A zero baseline has no meaningful relative change
        let change = if older == 0.0 {
            0.0
        } else {
            (recent - older) / older * 100.0
        };

        let trend = if change.abs() > STABLE_BAND_PCT {
            if change > 0.0 {
                TrendDirection::Degrading
            } else {
                TrendDirection::Improving
            }
        } else {
            TrendDirection::Stable
        };

        TrendResult {
            trend,
            change,
            average,
            percentile95,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Nearest-rank percentile: index `ceil(p/100 · n) − 1` of the sorted values.
fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}
