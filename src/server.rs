use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Ingest ──────────────────────────────────────────────
        .route("/api/vitals/beacon", post(handlers::beacon::ingest_beacon))
        // ── Metric queries ──────────────────────────────────────
        .route(
            "/api/vitals",
            get(handlers::vitals::list_metrics).delete(handlers::vitals::clear_metrics),
        )
        .route(
            "/api/vitals/latest/:name",
            get(handlers::vitals::latest_metric),
        )
        .route("/api/vitals/score", get(handlers::vitals::current_score))
        .route("/api/vitals/trends", get(handlers::vitals::trends))
        .route(
            "/api/vitals/budgets",
            get(handlers::vitals::budget_violations),
        )
        .route("/api/vitals/report", get(handlers::vitals::export_report))
        // ── Marks & measures ────────────────────────────────────
        .route(
            "/api/vitals/marks/:name",
            post(handlers::vitals::create_mark),
        )
        .route("/api/vitals/measure", post(handlers::vitals::measure))
        // ── Dashboard ───────────────────────────────────────────
        .route("/api/vitals/dashboard", get(handlers::stream::get_dashboard))
        .route("/api/vitals/stream", get(handlers::stream::dashboard_stream))
        .route(
            "/api/vitals/alerts/stream",
            get(handlers::stream::alert_stream),
        )
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::AnalyticsDispatcher;
    use crate::monitor::{MonitorConfig, WebVitalsMonitor};
    use crate::sources::{EntryBus, SourceSet};
    use crate::storage::{MemoryStore, MetricsStorage};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let bus = EntryBus::new();
        let monitor = Arc::new(WebVitalsMonitor::new(
            MetricsStorage::new(Arc::new(MemoryStore::new())),
            Arc::new(AnalyticsDispatcher::new()),
            SourceSet::from_bus(&bus, Duration::from_secs(5)),
        ));
        monitor.initialize(MonitorConfig::default());

        let state = Arc::new(AppState { monitor, bus });
        (create_router(state.clone()), state)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn wait_for_metrics(state: &AppState, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.monitor.get_metrics().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("beacon entries were not captured");
    }

    #[tokio::test]
    async fn beacon_entries_become_metrics() {
        let (router, state) = app();

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/vitals/beacon",
                serde_json::json!({
                    "environment": {"url": "https://app.example/vistoria/42"},
                    "entries": [
                        {"entryType": "vital", "name": "FCP", "value": 1500},
                        {"entryType": "vital", "name": "LCP", "value": 5000}
                    ]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().contains_key("server-timing"));
        assert_eq!(json_body(response).await["accepted"], 2);

        wait_for_metrics(&state, 2).await;

        let response = router
            .clone()
            .oneshot(Request::get("/api/vitals/latest/LCP").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let lcp = json_body(response).await;
        assert_eq!(lcp["rating"], "poor");
        assert_eq!(lcp["url"], "https://app.example/vistoria/42");

        let response = router
            .oneshot(Request::get("/api/vitals/score").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["overall"], 80.0);
    }

    #[tokio::test]
    async fn empty_beacon_is_rejected() {
        let (router, _) = app();
        let response = router
            .oneshot(post_json("/api/vitals/beacon", serde_json::json!({"entries": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["status"], 400);
    }

    #[tokio::test]
    async fn unknown_latest_metric_is_404() {
        let (router, _) = app();
        let response = router
            .oneshot(Request::get("/api/vitals/latest/FID").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn filters_list_by_name_and_clears() {
        let (router, state) = app();
        state
            .monitor
            .capture(crate::vitals::RawSample::new("TTFB", 300.0))
            .await;
        state
            .monitor
            .capture(crate::vitals::RawSample::new("CLS", 0.02))
            .await;

        let response = router
            .clone()
            .oneshot(Request::get("/api/vitals?name=CLS").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let list = json_body(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["name"], "CLS");

        let response = router
            .clone()
            .oneshot(Request::delete("/api/vitals").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.monitor.get_metrics().is_empty());
    }

    #[tokio::test]
    async fn marks_and_measures() {
        let (router, state) = app();

        let response = router
            .clone()
            .oneshot(Request::post("/api/vitals/marks/pdf-start").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["name"], "pdf-start");
        assert!(state
            .monitor
            .get_latest_metric(&crate::vitals::MetricName::custom("mark_pdf-start"))
            .is_some());

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/vitals/measure",
                serde_json::json!({"name": "pdf", "startMark": "pdf-start"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["duration"].as_f64().unwrap() >= 0.0);

        let response = router
            .oneshot(post_json(
                "/api/vitals/measure",
                serde_json::json!({"name": "pdf", "startMark": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_is_a_json_attachment() {
        let (router, state) = app();
        state
            .monitor
            .capture(crate::vitals::RawSample::new("LCP", 3000.0))
            .await;

        let response = router
            .oneshot(Request::get("/api/vitals/report").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_owned();
        assert!(disposition.starts_with("attachment; filename=\"web-vitals-report-"));

        let report = json_body(response).await;
        assert_eq!(report["metrics"].as_array().unwrap().len(), 1);
        assert_eq!(report["budgetViolations"][0]["metric"], "LCP");
        assert_eq!(report["score"]["scores"]["lcp"], 50);
    }

    #[tokio::test]
    async fn dashboard_snapshot_summarizes_state() {
        let (router, state) = app();
        state
            .monitor
            .capture(crate::vitals::RawSample::new("FID", 20.0))
            .await;

        let response = router
            .oneshot(Request::get("/api/vitals/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let snapshot = json_body(response).await;

        assert_eq!(snapshot["totalMetrics"], 1);
        assert_eq!(snapshot["recent"][0]["name"], "FID");
        assert_eq!(snapshot["trends"]["FID"]["trend"], "stable");
    }
}
