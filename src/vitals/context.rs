use serde::{Deserialize, Serialize};

/// Ambient browsing environment as reported by the page with each beacon.
///
/// Every field is best-effort: browsers without the Network Information or
/// Device Memory APIs simply leave them out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageEnvironment {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    /// `navigator.connection.effectiveType`, e.g. "4g".
    pub connection_type: Option<String>,
    /// `navigator.deviceMemory` in GiB.
    pub device_memory: Option<f64>,
    /// Navigation entry type: navigate, reload, back_forward, prerender.
    pub navigation_type: Option<String>,
    /// Id the reporting script gives one page load. Entries from several
    /// beacons of the same load share it.
    pub page_id: Option<String>,
}

impl PageEnvironment {
    /// Identifies the page load: its id, else its URL.
    pub fn page_key(&self) -> &str {
        self.page_id
            .as_deref()
            .or(self.url.as_deref())
            .unwrap_or_default()
    }
}

/// Context attached to a metric at capture time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricContext {
    pub url: String,
    pub user_agent: String,
    pub connection_type: Option<String>,
    pub device_memory: Option<f64>,
    pub navigation_type: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Snapshot the environment right now. Missing fields stay missing.
pub fn collect_context(env: &PageEnvironment) -> MetricContext {
    MetricContext {
        url: env.url.clone().unwrap_or_default(),
        user_agent: env.user_agent.clone().unwrap_or_default(),
        connection_type: env.connection_type.clone(),
        device_memory: env.device_memory.filter(|m| m.is_finite() && *m > 0.0),
        navigation_type: env.navigation_type.clone(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}
