use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::vitals::{BudgetViolation, Metric, MetricName, TrendResult, VitalsScore};
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// Only return metrics with this name, e.g. `LCP` or `mark_hero`.
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkResponse {
    pub name: String,
    pub start_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureRequest {
    pub name: String,
    pub start_mark: String,
    pub end_mark: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeasureResponse {
    pub name: String,
    pub duration: f64,
}

// ─── GET /api/vitals ─────────────────────────────────────────────

pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Json<Vec<Metric>> {
    let metrics = match query.name {
        Some(name) => state.monitor.get_metrics_by_name(&MetricName::from(name)),
        None => state.monitor.get_metrics(),
    };
    Json(metrics)
}

// ─── DELETE /api/vitals ──────────────────────────────────────────

pub async fn clear_metrics(State(state): State<Arc<AppState>>) -> Json<StatusMessage> {
    state.monitor.clear().await;
    Json(StatusMessage {
        message: "Web vitals data cleared".into(),
    })
}

// ─── GET /api/vitals/latest/:name ────────────────────────────────

pub async fn latest_metric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Metric>, AppError> {
    state
        .monitor
        .get_latest_metric(&MetricName::from(name.as_str()))
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no '{name}' metric captured yet")))
}

// ─── GET /api/vitals/score ───────────────────────────────────────

pub async fn current_score(State(state): State<Arc<AppState>>) -> Json<VitalsScore> {
    Json(state.monitor.get_current_score())
}

// ─── GET /api/vitals/trends ──────────────────────────────────────

pub async fn trends(
    State(state): State<Arc<AppState>>,
) -> Json<BTreeMap<MetricName, TrendResult>> {
    Json(state.monitor.get_trends().await)
}

// ─── GET /api/vitals/budgets ─────────────────────────────────────

pub async fn budget_violations(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<BudgetViolation>> {
    Json(state.monitor.check_budgets())
}

// ─── GET /api/vitals/report ──────────────────────────────────────
/// Full report as a downloadable JSON file.

pub async fn export_report(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.monitor.export_report().await;
    let body = serde_json::to_string_pretty(&report)
        .map_err(|e| AppError::Internal(format!("report serialization failed: {e}")))?;

    let disposition = format!(
        "attachment; filename=\"web-vitals-report-{}.json\"",
        report.generated_at.timestamp_millis()
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

// ─── POST /api/vitals/marks/:name ────────────────────────────────

pub async fn create_mark(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MarkResponse>, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("mark name must not be empty".into()));
    }

    let start_time = state.monitor.mark(&name).await;
    Ok(Json(MarkResponse { name, start_time }))
}

// ─── POST /api/vitals/measure ────────────────────────────────────

pub async fn measure(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MeasureRequest>,
) -> Result<Json<MeasureResponse>, AppError> {
    let duration = state
        .monitor
        .measure(&req.name, &req.start_mark, req.end_mark.as_deref())
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "measure '{}' references an unknown mark",
                req.name
            ))
        })?;

    Ok(Json(MeasureResponse {
        name: req.name,
        duration,
    }))
}
