use serde::{Deserialize, Serialize};

use super::MetricName;

// ─── Threshold table ─────────────────────────────────────────────

/// Unit a threshold is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Ms,
    Score,
}

impl Unit {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Ms => "ms",
            Self::Score => "",
        }
    }
}

/// Good / poor boundaries for one metric. `good < poor` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    pub metric: MetricName,
    pub good: f64,
    pub poor: f64,
    pub unit: Unit,
}

/// Core Web Vitals boundaries, in `MetricName::CORE` order.
pub static THRESHOLDS: [Threshold; 5] = [
    Threshold { metric: MetricName::Fcp, good: 1800.0, poor: 3000.0, unit: Unit::Ms },
    Threshold { metric: MetricName::Lcp, good: 2500.0, poor: 4000.0, unit: Unit::Ms },
    Threshold { metric: MetricName::Fid, good: 100.0, poor: 300.0, unit: Unit::Ms },
    Threshold { metric: MetricName::Cls, good: 0.1, poor: 0.25, unit: Unit::Score },
    Threshold { metric: MetricName::Ttfb, good: 800.0, poor: 1800.0, unit: Unit::Ms },
];

pub fn threshold_for(name: &MetricName) -> Option<&'static Threshold> {
    THRESHOLDS.iter().find(|t| &t.metric == name)
}

// ─── Rating ──────────────────────────────────────────────────────

/// Three-band classification of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::NeedsImprovement => "needs-improvement",
            Self::Poor => "poor",
        }
    }
}

/// Classify `value` against the threshold table.
/// Metrics without an entry are always rated good.
pub fn rating(name: &MetricName, value: f64) -> Rating {
    let Some(threshold) = threshold_for(name) else {
        return Rating::Good;
    };

    if value <= threshold.good {
        Rating::Good
    } else if value <= threshold.poor {
        Rating::NeedsImprovement
    } else {
        Rating::Poor
    }
}

/// Coarse 100 / 50 / 0 score for a single value.
pub fn score_band(name: &MetricName, value: f64) -> u8 {
    match rating(name, value) {
        Rating::Good => 100,
        Rating::NeedsImprovement => 50,
        Rating::Poor => 0,
    }
}
