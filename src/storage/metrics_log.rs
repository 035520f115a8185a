use std::sync::Arc;

use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError};
use crate::vitals::{Metric, MetricName};

/// Maximum number of metrics kept in the durable log.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Key the log is stored under (namespaced further by the store).
pub const STORAGE_KEY: &str = "web-vitals-metrics";

/// Append-only, bounded metric log persisted as one JSON array.
///
/// Store failures never reach the caller: reads degrade to an empty log and
/// writes are dropped, both with an error logged.
pub struct MetricsStorage {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    /// Serializes read-modify-write cycles of `save`.
    write_lock: Mutex<()>,
}

impl MetricsStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity,
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `metric`, evicting the oldest entries beyond capacity.
    pub async fn save(&self, metric: &Metric) {
        let _guard = self.write_lock.lock().await;

        let mut log = self.get_all().await;
        log.push(metric.clone());
        if log.len() > self.capacity {
            let excess = log.len() - self.capacity;
            log.drain(..excess);
        }

        if let Err(e) = self.write(&log).await {
            tracing::error!(error = %e, metric = %metric.name, "failed to save metric");
        }
    }

    /// Every stored metric, oldest first. Empty on any read failure.
    pub async fn get_all(&self) -> Vec<Metric> {
        match self.read().await {
            Ok(log) => log,
            Err(e) => {
                tracing::error!(error = %e, "failed to load metrics");
                Vec::new()
            }
        }
    }

    pub async fn get_by_metric_name(&self, name: &MetricName) -> Vec<Metric> {
        self.get_all()
            .await
            .into_iter()
            .filter(|m| &m.name == name)
            .collect()
    }

    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.store.remove(STORAGE_KEY).await {
            tracing::error!(error = %e, "failed to clear metrics");
        }
    }

    async fn read(&self) -> Result<Vec<Metric>, StoreError> {
        match self.store.get(STORAGE_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, log: &[Metric]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(log)?;
        self.store.set(STORAGE_KEY, raw).await
    }
}
