pub mod alerts;
pub mod context;
pub mod score;
pub mod thresholds;
pub mod timeline;
pub mod trend;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use alerts::{AlertCallback, AlertConfig, AlertSystem};
pub use context::{collect_context, MetricContext, PageEnvironment};
pub use score::{BudgetViolation, PerformanceBudget, VitalsScore};
pub use thresholds::{rating, score_band, threshold_for, Rating, Threshold, Unit};
pub use trend::{TrendAnalyzer, TrendDirection, TrendResult};

/// Free-form key/value bag carried by custom metrics.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ─── Metric names ────────────────────────────────────────────────

/// Name of a captured metric.
///
/// The five Core Web Vitals and the two derived responsiveness timings are
/// closed variants; anything else (performance marks, navigation phases,
/// application timings) is `Custom`. On the wire the name is always the
/// plain string, e.g. `"LCP"` or `"mark_hero"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricName {
    Fcp,
    Lcp,
    Fid,
    Cls,
    Ttfb,
    Tti,
    Tbt,
    Custom(String),
}

impl MetricName {
    /// The five Core Web Vitals, in reporting order.
    pub const CORE: [MetricName; 5] = [
        MetricName::Fcp,
        MetricName::Lcp,
        MetricName::Fid,
        MetricName::Cls,
        MetricName::Ttfb,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Fcp => "FCP",
            Self::Lcp => "LCP",
            Self::Fid => "FID",
            Self::Cls => "CLS",
            Self::Ttfb => "TTFB",
            Self::Tti => "TTI",
            Self::Tbt => "TBT",
            Self::Custom(name) => name,
        }
    }

    pub fn is_core(&self) -> bool {
        matches!(
            self,
            Self::Fcp | Self::Lcp | Self::Fid | Self::Cls | Self::Ttfb
        )
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }
}

impl From<String> for MetricName {
    fn from(name: String) -> Self {
        match name.as_str() {
            "FCP" => Self::Fcp,
            "LCP" => Self::Lcp,
            "FID" => Self::Fid,
            "CLS" => Self::Cls,
            "TTFB" => Self::Ttfb,
            "TTI" => Self::Tti,
            "TBT" => Self::Tbt,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for MetricName {
    fn from(name: &str) -> Self {
        Self::from(name.to_owned())
    }
}

impl From<MetricName> for String {
    fn from(name: MetricName) -> Self {
        match name {
            MetricName::Custom(name) => name,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Samples & metrics ───────────────────────────────────────────

/// A raw observation as emitted by a capture source, before the monitor
/// has attached context, id and rating.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub name: MetricName,
    pub value: f64,
    /// Ambient page environment reported alongside the entry.
    pub environment: PageEnvironment,
    pub metadata: Metadata,
}

impl RawSample {
    pub fn new(name: impl Into<MetricName>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            environment: PageEnvironment::default(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_environment(mut self, environment: PageEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A captured, rated sample. This is the record persisted to the metric
/// log, forwarded to analytics endpoints and handed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: MetricName,
    pub value: f64,
    pub rating: Rating,
    pub id: String,
    /// Epoch milliseconds at capture time.
    pub timestamp: i64,
    pub url: String,
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Metric {
    /// Build a metric from a raw sample and the context collected for it.
    /// The rating is always derived from the raw value here.
    pub fn from_sample(sample: RawSample, context: MetricContext) -> Self {
        Self {
            rating: rating(&sample.name, sample.value),
            name: sample.name,
            value: sample.value,
            id: new_metric_id(),
            timestamp: context.timestamp,
            url: context.url,
            user_agent: context.user_agent,
            connection_type: context.connection_type,
            device_memory: context.device_memory,
            navigation_type: context.navigation_type,
            metadata: sample.metadata,
        }
    }

    /// Copy of this metric under a fresh id with refreshed ambient context.
    pub fn reissue(&self, context: MetricContext) -> Self {
        Self {
            id: new_metric_id(),
            timestamp: context.timestamp,
            url: if context.url.is_empty() {
                self.url.clone()
            } else {
                context.url
            },
            user_agent: if context.user_agent.is_empty() {
                self.user_agent.clone()
            } else {
                context.user_agent
            },
            connection_type: context.connection_type.or_else(|| self.connection_type.clone()),
            device_memory: context.device_memory.or(self.device_memory),
            navigation_type: context.navigation_type.or_else(|| self.navigation_type.clone()),
            ..self.clone()
        }
    }
}

pub(crate) fn new_metric_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
