use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};

use crate::monitor::{WebVitalsMonitor, ALERT_EVENT};
use crate::vitals::{BudgetViolation, Metric, MetricName, TrendResult, VitalsScore};
use crate::AppState;

/// Most recent metrics included in every dashboard snapshot.
const RECENT_METRICS: usize = 50;

/// Everything the performance dashboard renders, in one payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub score: VitalsScore,
    pub trends: BTreeMap<MetricName, TrendResult>,
    pub budget_violations: Vec<BudgetViolation>,
    pub total_metrics: usize,
    pub recent: Vec<Metric>,
}

impl DashboardSnapshot {
    pub async fn collect(monitor: &WebVitalsMonitor) -> Self {
        let metrics = monitor.get_metrics();
        let recent = metrics[metrics.len().saturating_sub(RECENT_METRICS)..].to_vec();

        Self {
            score: monitor.get_current_score(),
            trends: monitor.get_trends().await,
            budget_violations: monitor.check_budgets(),
            total_metrics: metrics.len(),
            recent,
        }
    }
}

// ─── GET /api/vitals/dashboard ───────────────────────────────────
/// Returns a single JSON snapshot, handy for curl.

pub async fn get_dashboard(State(state): State<Arc<AppState>>) -> Json<DashboardSnapshot> {
    Json(DashboardSnapshot::collect(&state.monitor).await)
}

// ─── GET /api/vitals/stream ──────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `DashboardSnapshot` as JSON every 500 ms.

pub async fn dashboard_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).then(move |_| {
        let state = state.clone();
        async move {
            let snapshot = DashboardSnapshot::collect(&state.monitor).await;
            let json = serde_json::to_string(&snapshot).unwrap_or_default();
            Ok::<_, Infallible>(Event::default().data(json))
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── GET /api/vitals/alerts/stream ───────────────────────────────
/// One `web-vitals-alert` event per threshold violation, carrying the
/// offending metric.

pub async fn alert_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let alerts = BroadcastStream::new(state.monitor.subscribe_alerts());

    let stream = alerts.filter_map(|received| async move {
        match received {
            Ok(alert) => {
                let json = serde_json::to_string(&alert.detail).ok()?;
                Some(Ok::<_, Infallible>(Event::default().event(ALERT_EVENT).data(json)))
            }
            Err(lagged) => {
                tracing::warn!(error = %lagged, "alert stream listener lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
