//! Service configuration.
//!
//! Every setting comes from an environment variable and has a default:
//!
//! - `VITALS_BIND_ADDR`: listen address (`0.0.0.0:3000`)
//! - `VITALS_REDIS_URL`: Redis for the durable metric log
//!   (`redis://127.0.0.1:6379/`); set it empty to keep the log in memory
//! - `VITALS_ORIGIN`: namespace for the stored log (`default`)
//! - `VITALS_STORAGE_CAPACITY`: metrics kept in the log (`1000`)
//! - `VITALS_ANALYTICS_ENDPOINTS`: comma-separated URLs metrics are POSTed to
//! - `VITALS_ENABLE_ALERTS`, `VITALS_ENABLE_STORAGE`, `VITALS_CUSTOM_METRICS`:
//!   booleans (`true`)
//! - `VITALS_TBT_WINDOW_MS`: long-task window for TBT (`5000`)

use std::time::Duration;

use crate::monitor::MonitorConfig;
use crate::sources::DEFAULT_TBT_WINDOW;
use crate::storage::DEFAULT_CAPACITY;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub origin: String,
    pub storage_capacity: usize,
    pub analytics_endpoints: Vec<String>,
    pub enable_alerts: bool,
    pub enable_storage: bool,
    pub custom_metrics: bool,
    pub tbt_window: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            redis_url: Some("redis://127.0.0.1:6379/".into()),
            origin: "default".into(),
            storage_capacity: DEFAULT_CAPACITY,
            analytics_endpoints: Vec::new(),
            enable_alerts: true,
            enable_storage: true,
            custom_metrics: true,
            tbt_window: DEFAULT_TBT_WINDOW,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let redis_url = match lookup("VITALS_REDIS_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url.trim().to_owned()),
            None => defaults.redis_url,
        };

        let analytics_endpoints = lookup("VITALS_ANALYTICS_ENDPOINTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let storage_capacity = parse_number(&lookup, "VITALS_STORAGE_CAPACITY")?
            .unwrap_or(defaults.storage_capacity);
        if storage_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "VITALS_STORAGE_CAPACITY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let tbt_window = parse_number::<u64>(&lookup, "VITALS_TBT_WINDOW_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.tbt_window);

        Ok(Self {
            bind_addr: lookup("VITALS_BIND_ADDR").unwrap_or(defaults.bind_addr),
            redis_url,
            origin: lookup("VITALS_ORIGIN")
                .filter(|o| !o.trim().is_empty())
                .unwrap_or(defaults.origin),
            storage_capacity,
            analytics_endpoints,
            enable_alerts: parse_bool(&lookup, "VITALS_ENABLE_ALERTS", defaults.enable_alerts)?,
            enable_storage: parse_bool(&lookup, "VITALS_ENABLE_STORAGE", defaults.enable_storage)?,
            custom_metrics: parse_bool(&lookup, "VITALS_CUSTOM_METRICS", defaults.custom_metrics)?,
            tbt_window,
        })
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            analytics_endpoints: self.analytics_endpoints.clone(),
            enable_alerts: self.enable_alerts,
            enable_storage: self.enable_storage,
            custom_metrics: self.custom_metrics,
        }
    }
}

fn parse_number<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected a boolean".into(),
        }),
    }
}
