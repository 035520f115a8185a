use std::collections::{BTreeMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::dispatch::AnalyticsDispatcher;
use crate::sources::derived::mark_sample;
use crate::sources::{CaptureSink, SourceSet};
use crate::storage::MetricsStorage;
use crate::vitals::score::{check_budgets, default_budgets};
use crate::vitals::thresholds::THRESHOLDS;
use crate::vitals::timeline::PerformanceTimeline;
use crate::vitals::{
    collect_context, AlertConfig, AlertSystem, BudgetViolation, Metric, MetricName,
    PageEnvironment, PerformanceBudget, RawSample, TrendAnalyzer, TrendResult, VitalsScore,
};

// ─── Configuration ───────────────────────────────────────────────

/// Name of the event broadcast when a metric crosses its alert threshold.
pub const ALERT_EVENT: &str = "web-vitals-alert";

/// Captured metrics kept in memory for the live views.
const MAX_IN_MEMORY: usize = 10_000;

/// Buffered alert events per alert-stream subscriber.
const ALERT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub analytics_endpoints: Vec<String>,
    pub enable_alerts: bool,
    pub enable_storage: bool,
    /// Attach the TTI, TBT and mark sources.
    pub custom_metrics: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            analytics_endpoints: Vec::new(),
            enable_alerts: true,
            enable_storage: true,
            custom_metrics: true,
        }
    }
}

// ─── Public types ────────────────────────────────────────────────

/// Broadcast to alert-stream listeners on every threshold violation.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub event: &'static str,
    pub detail: Metric,
}

pub type Subscriber = Arc<dyn Fn(&[Metric]) + Send + Sync>;

type SubscriberRegistry = Mutex<BTreeMap<u64, Subscriber>>;

/// Handle returned by [`WebVitalsMonitor::subscribe`]. Dropping it keeps
/// the subscription alive; call [`Subscription::unsubscribe`] to end it.
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
    }
}

/// Everything known about the page's performance, for download.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsReport {
    pub generated_at: DateTime<Utc>,
    pub score: VitalsScore,
    pub trends: BTreeMap<MetricName, TrendResult>,
    pub budget_violations: Vec<BudgetViolation>,
    pub metrics: Vec<Metric>,
}

// ─── Monitor ─────────────────────────────────────────────────────

/// Orchestrates capture: every raw sample gets context and a rating, is
/// persisted, checked against alerts, appended to the live list, pushed to
/// subscribers and forwarded to analytics. Budgets it newly breaks are
/// forwarded too.
///
/// Construct one per deployment in `main` and share it behind an `Arc`.
pub struct WebVitalsMonitor {
    storage: MetricsStorage,
    alerts: AlertSystem,
    dispatcher: Arc<AnalyticsDispatcher>,
    trends: TrendAnalyzer,
    timeline: PerformanceTimeline,
    sources: SourceSet,
    budgets: Vec<PerformanceBudget>,
    /// Indices into `budgets` currently over their limit.
    violated_budgets: Mutex<HashSet<usize>>,

    metrics: Mutex<Vec<Metric>>,
    subscribers: Arc<SubscriberRegistry>,
    next_subscriber: AtomicU64,
    alert_tx: broadcast::Sender<AlertEvent>,

    initialized: AtomicBool,
    enable_storage: AtomicBool,
    custom_metrics: AtomicBool,
}

impl WebVitalsMonitor {
    pub fn new(
        storage: MetricsStorage,
        dispatcher: Arc<AnalyticsDispatcher>,
        sources: SourceSet,
    ) -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            storage,
            alerts: AlertSystem::new(),
            dispatcher,
            trends: TrendAnalyzer,
            timeline: PerformanceTimeline::new(),
            sources,
            budgets: default_budgets(),
            violated_budgets: Mutex::new(HashSet::new()),
            metrics: Mutex::new(Vec::new()),
            subscribers: Arc::new(Mutex::new(BTreeMap::new())),
            next_subscriber: AtomicU64::new(0),
            alert_tx,
            initialized: AtomicBool::new(false),
            enable_storage: AtomicBool::new(true),
            custom_metrics: AtomicBool::new(false),
        }
    }

    /// Wire up alerts, analytics endpoints and sources, and start the
    /// capture loop. Only the first call has any effect; returns whether
    /// this call did the initialization.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(self: &Arc<Self>, config: MonitorConfig) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("web vitals monitor already initialized");
            return false;
        }

        for endpoint in &config.analytics_endpoints {
            self.dispatcher.add_endpoint(endpoint.clone());
        }
        self.enable_storage
            .store(config.enable_storage, Ordering::SeqCst);
        self.custom_metrics
            .store(config.custom_metrics, Ordering::SeqCst);

        if config.enable_alerts {
            self.setup_alerts();
        }

        let (sink, rx) = CaptureSink::channel();
        self.spawn_capture_loop(rx);

        for source in &self.sources.core {
            source.attach(sink.clone());
        }
        if config.custom_metrics {
            for source in &self.sources.custom {
                source.attach(sink.clone());
            }
        }
        for source in &self.sources.navigation {
            source.attach(sink.clone());
        }

        tracing::info!(
            endpoints = config.analytics_endpoints.len(),
            alerts = config.enable_alerts,
            storage = config.enable_storage,
            custom_metrics = config.custom_metrics,
            "web vitals monitor initialized"
        );
        true
    }

    /// Application entry point; same as [`initialize`](Self::initialize).
    pub fn start(self: &Arc<Self>, config: MonitorConfig) -> bool {
        self.initialize(config)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// One alert per threshold entry, at the entry's poor bound.
    fn setup_alerts(&self) {
        for threshold in THRESHOLDS.iter() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let alert_tx = self.alert_tx.clone();
            let unit = threshold.unit.suffix();

            let callback = move |metric: &Metric| {
                tracing::warn!(
                    metric = %metric.name,
                    rating = metric.rating.as_str(),
                    "performance alert: {} is {} ({}{})",
                    metric.name,
                    metric.rating.as_str(),
                    metric.value,
                    unit,
                );

                dispatcher.send(metric.reissue(collect_context(&PageEnvironment::default())));

                // No listeners is fine
                let _ = alert_tx.send(AlertEvent {
                    event: ALERT_EVENT,
                    detail: metric.clone(),
                });
            };

            self.alerts.add_alert(
                threshold.metric.clone(),
                AlertConfig::new(threshold.poor, callback),
            );
        }
    }

    fn spawn_capture_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<RawSample>) {
        let monitor = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.capture(sample).await;
            }
        });
    }

    // ── Capture ─────────────────────────────────────────────────

    /// Run one raw sample through the capture pipeline.
    /// Returns `None` for values that are not finite and non-negative.
    pub async fn capture(&self, sample: RawSample) -> Option<Metric> {
        if !sample.value.is_finite() || sample.value < 0.0 {
            tracing::warn!(metric = %sample.name, value = sample.value, "dropping invalid sample");
            return None;
        }

        let context = collect_context(&sample.environment);
        let metric = Metric::from_sample(sample, context);
        tracing::debug!(
            metric = %metric.name,
            value = metric.value,
            rating = metric.rating.as_str(),
            "captured metric"
        );

        if self.enable_storage.load(Ordering::SeqCst) {
            self.storage.save(&metric).await;
        }

        self.alerts.check(&metric);

        {
            let mut metrics = self.metrics.lock();
            metrics.push(metric.clone());
            if metrics.len() > MAX_IN_MEMORY {
                let excess = metrics.len() - MAX_IN_MEMORY;
                metrics.drain(..excess);
            }
        }
        self.notify_subscribers();

        self.dispatcher.send(metric.clone());
        self.forward_budget_violations(&metric);
        Some(metric)
    }

    fn notify_subscribers(&self) {
        // Snapshot the registry so callbacks may subscribe or unsubscribe
        let subscribers: Vec<Subscriber> = self.subscribers.lock().values().cloned().collect();
        if subscribers.is_empty() {
            return;
        }

        let snapshot = self.get_metrics();
        for callback in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
                tracing::error!("metrics subscriber panicked");
            }
        }
    }

    /// Report budgets on `metric.name` that this value pushes over their
    /// limit. A budget is reported again only after it has recovered.
    fn forward_budget_violations(&self, metric: &Metric) {
        let mut newly_violated = Vec::new();
        {
            let mut violated = self.violated_budgets.lock();
            for (index, budget) in self.budgets.iter().enumerate() {
                if budget.metric != metric.name {
                    continue;
                }
                if metric.value <= budget.budget {
                    violated.remove(&index);
                } else if violated.insert(index) {
                    newly_violated.push(BudgetViolation {
                        metric: budget.metric.clone(),
                        actual: metric.value,
                        budget: budget.budget,
                        unit: budget.unit,
                    });
                }
            }
        }

        for violation in newly_violated {
            tracing::warn!(
                metric = %violation.metric,
                actual = violation.actual,
                budget = violation.budget,
                "performance budget exceeded"
            );
            self.dispatcher.send_budget_violation(violation);
        }
    }

    // ── Subscriptions ───────────────────────────────────────────

    /// Call `callback` with the full metric list after every capture.
    pub fn subscribe(&self, callback: impl Fn(&[Metric]) + Send + Sync + 'static) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Receive a [`AlertEvent`] for every threshold violation from now on.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_tx.subscribe()
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn get_metrics(&self) -> Vec<Metric> {
        self.metrics.lock().clone()
    }

    pub fn get_metrics_by_name(&self, name: &MetricName) -> Vec<Metric> {
        self.metrics
            .lock()
            .iter()
            .filter(|m| &m.name == name)
            .cloned()
            .collect()
    }

    pub fn get_latest_metric(&self, name: &MetricName) -> Option<Metric> {
        self.metrics
            .lock()
            .iter()
            .rev()
            .find(|m| &m.name == name)
            .cloned()
    }

    fn latest_values(&self) -> BTreeMap<MetricName, f64> {
        let metrics = self.metrics.lock();
        let mut latest = BTreeMap::new();
        for metric in metrics.iter() {
            latest.insert(metric.name.clone(), metric.value);
        }
        latest
    }

    pub fn get_current_score(&self) -> VitalsScore {
        let latest = self.latest_values();
        VitalsScore::from_latest(|name| latest.get(name).copied())
    }

    /// Trends of the five core metrics over the persisted history (or the
    /// in-memory list when storage is disabled).
    pub async fn get_trends(&self) -> BTreeMap<MetricName, TrendResult> {
        let history = if self.enable_storage.load(Ordering::SeqCst) {
            self.storage.get_all().await
        } else {
            self.get_metrics()
        };

        MetricName::CORE
            .iter()
            .map(|name| (name.clone(), self.trends.analyze(&history, name)))
            .collect()
    }

    pub fn check_budgets(&self) -> Vec<BudgetViolation> {
        let latest = self.latest_values();
        check_budgets(&self.budgets, |name| latest.get(name).copied())
    }

    pub async fn export_report(&self) -> VitalsReport {
        VitalsReport {
            generated_at: Utc::now(),
            score: self.get_current_score(),
            trends: self.get_trends().await,
            budget_violations: self.check_budgets(),
            metrics: self.get_metrics(),
        }
    }

    // ── Marks ───────────────────────────────────────────────────

    /// Record a performance mark. With custom metrics enabled the mark is
    /// also captured as `mark_<name>`. Returns the mark's start time.
    pub async fn mark(&self, name: &str) -> f64 {
        let start_time = self.timeline.mark(name);
        if self.custom_metrics.load(Ordering::SeqCst) {
            self.capture(mark_sample(name, start_time)).await;
        }
        start_time
    }

    /// Milliseconds between two marks, or from `start` to now.
    pub fn measure(&self, name: &str, start: &str, end: Option<&str>) -> Option<f64> {
        let duration = self.timeline.measure(start, end);
        match duration {
            Some(ms) => tracing::debug!(measure = name, duration_ms = ms, "measured"),
            None => tracing::debug!(measure = name, start, "measure references an unknown mark"),
        }
        duration
    }

    // ── Control ─────────────────────────────────────────────────

    /// Reset captured data and alert registrations. Sources stay attached.
    pub async fn clear(&self) {
        self.metrics.lock().clear();
        self.violated_budgets.lock().clear();
        self.storage.clear().await;
        self.alerts.clear();
        tracing::info!("web vitals data cleared");
    }

    pub fn alerts(&self) -> &AlertSystem {
        &self.alerts
    }

    pub fn storage(&self) -> &MetricsStorage {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Arc<AnalyticsDispatcher> {
        &self.dispatcher
    }
}
