use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Metric, MetricName};

pub type AlertCallback = Arc<dyn Fn(&Metric) + Send + Sync>;

/// Watch configuration for one metric name.
#[derive(Clone)]
pub struct AlertConfig {
    pub threshold: f64,
    pub enabled: bool,
    pub callback: AlertCallback,
}

impl AlertConfig {
    pub fn new(threshold: f64, callback: impl Fn(&Metric) + Send + Sync + 'static) -> Self {
        Self {
            threshold,
            enabled: true,
            callback: Arc::new(callback),
        }
    }
}

impl std::fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertConfig")
            .field("threshold", &self.threshold)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Per-metric threshold watch. One slot per metric name.
#[derive(Default)]
pub struct AlertSystem {
    alerts: Mutex<HashMap<MetricName, AlertConfig>>,
}

impl AlertSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the alert for `name`.
    pub fn add_alert(&self, name: MetricName, config: AlertConfig) {
        self.alerts.lock().insert(name, config);
    }

    /// Fire the callback once if `metric` reaches its configured threshold.
    /// Returns whether the callback was invoked.
    pub fn check(&self, metric: &Metric) -> bool {
        // Clone the callback out so it runs without the registry locked
        let callback = {
            let alerts = self.alerts.lock();
            match alerts.get(&metric.name) {
                Some(cfg) if cfg.enabled && metric.value >= cfg.threshold => {
                    cfg.callback.clone()
                }
                _ => return false,
            }
        };

        if catch_unwind(AssertUnwindSafe(|| callback(metric))).is_err() {
            tracing::error!(metric = %metric.name, "alert callback panicked");
        }
        true
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vitals::{MetricContext, RawSample};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metric(name: MetricName, value: f64) -> Metric {
        Metric::from_sample(RawSample::new(name, value), MetricContext::default())
    }

    fn counting(threshold: f64) -> (AlertConfig, Arc<AtomicUsize>, Arc<Mutex<Vec<f64>>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (count.clone(), seen.clone());
        let config = AlertConfig::new(threshold, move |m| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().push(m.value);
        });
        (config, count, seen)
    }

    #[test]
    fn fires_once_when_threshold_is_crossed() {
        let alerts = AlertSystem::new();
        let (config, count, seen) = counting(300.0);
        alerts.add_alert(MetricName::Lcp, config);

        assert!(alerts.check(&metric(MetricName::Lcp, 350.0)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![350.0]);

        assert!(!alerts.check(&metric(MetricName::Lcp, 250.0)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn threshold_is_inclusive_and_not_deduplicated() {
        let alerts = AlertSystem::new();
        let (config, count, _) = counting(300.0);
        alerts.add_alert(MetricName::Lcp, config);

        alerts.check(&metric(MetricName::Lcp, 300.0));
        alerts.check(&metric(MetricName::Lcp, 900.0));
        alerts.check(&metric(MetricName::Lcp, 900.0));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn other_names_and_disabled_alerts_are_ignored() {
        let alerts = AlertSystem::new();
        let (mut config, count, _) = counting(10.0);
        alerts.add_alert(MetricName::Fid, config.clone());

        alerts.check(&metric(MetricName::Lcp, 10_000.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        config.enabled = false;
        alerts.add_alert(MetricName::Fid, config);
        alerts.check(&metric(MetricName::Fid, 10_000.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn last_registration_wins() {
        let alerts = AlertSystem::new();
        let (first, first_count, _) = counting(100.0);
        let (second, second_count, _) = counting(1000.0);
        alerts.add_alert(MetricName::Ttfb, first);
        alerts.add_alert(MetricName::Ttfb, second);

        alerts.check(&metric(MetricName::Ttfb, 500.0));
        alerts.check(&metric(MetricName::Ttfb, 1500.0));

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn clear_removes_every_registration() {
        let alerts = AlertSystem::new();
        let (config, count, _) = counting(0.0);
        alerts.add_alert(MetricName::Cls, config.clone());
        alerts.add_alert(MetricName::Fcp, config);
        alerts.clear();

        assert!(alerts.is_empty());
        alerts.check(&metric(MetricName::Cls, 1.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let alerts = AlertSystem::new();
        alerts.add_alert(
            MetricName::Lcp,
            AlertConfig::new(0.0, |_| panic!("ui handler blew up")),
        );

        assert!(alerts.check(&metric(MetricName::Lcp, 1.0)));
    }
}
