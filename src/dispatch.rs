use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::vitals::{BudgetViolation, Metric};

/// Per-request timeout for analytics POSTs.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// `event` field of a budget violation body.
pub const BUDGET_VIOLATION_EVENT: &str = "performance_budget_violation";

/// Body POSTed to analytics endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalyticsEvent {
    Metric(Metric),
    BudgetViolation {
        event: &'static str,
        #[serde(flatten)]
        violation: BudgetViolation,
    },
}

impl AnalyticsEvent {
    fn label(&self) -> String {
        match self {
            Self::Metric(metric) => metric.name.to_string(),
            Self::BudgetViolation { violation, .. } => format!("budget:{}", violation.metric),
        }
    }
}

/// Forwards captured metrics to external analytics endpoints.
///
/// Metrics are queued and drained by a single background task, one metric
/// at a time; the POSTs for one metric go out to every endpoint
/// concurrently. Delivery failures are logged and never block the queue.
pub struct AnalyticsDispatcher {
    client: reqwest::Client,
    endpoints: Mutex<Vec<String>>,
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    draining: AtomicBool,
    idle: Notify,
}

impl AnalyticsDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "analytics client setup failed, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(client)
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoints: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    pub fn add_endpoint(&self, url: impl Into<String>) {
        self.endpoints.lock().push(url.into());
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }

    /// Number of events waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue `metric` and start draining unless a drain is already running.
    pub fn send(self: &Arc<Self>, metric: Metric) {
        self.enqueue(AnalyticsEvent::Metric(metric));
    }

    /// Queue a budget violation report.
    pub fn send_budget_violation(self: &Arc<Self>, violation: BudgetViolation) {
        self.enqueue(AnalyticsEvent::BudgetViolation {
            event: BUDGET_VIOLATION_EVENT,
            violation,
        });
    }

    fn enqueue(self: &Arc<Self>, event: AnalyticsEvent) {
        self.queue.lock().push_back(event);

        if self.draining.load(Ordering::SeqCst) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move { this.process_queue().await });
            }
            Err(_) => {
                tracing::warn!("no async runtime, analytics event left queued");
            }
        }
    }

    /// Drain the queue. Returns immediately if another drain holds the flag.
    pub async fn process_queue(&self) {
        loop {
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }

            loop {
                // Pop in its own statement so the lock is not held across the await
                let next = self.queue.lock().pop_front();
                let Some(event) = next else { break };
                self.deliver(&event).await;
            }

            self.draining.store(false, Ordering::SeqCst);

            // A send may have queued between the last pop and the flag reset
            if self.queue.lock().is_empty() {
                break;
            }
        }

        self.idle.notify_waiters();
    }

    /// Resolves once the queue is empty and no drain is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.draining.load(Ordering::SeqCst) && self.queue.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    async fn deliver(&self, event: &AnalyticsEvent) {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return;
        }

        let sends = endpoints.iter().map(|url| async move {
            let result = self
                .client
                .post(url)
                .json(event)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            if let Err(e) = result {
                tracing::warn!(endpoint = %url, event = %event.label(), error = %e, "analytics send failed");
            }
        });

        futures::future::join_all(sends).await;
    }
}

impl Default for AnalyticsDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
