use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Tower-compatible middleware that adds two response headers:
///
///   X-Response-Time-Us: total handler wall time in microseconds
///   Server-Timing: same value in the standard Server-Timing format
///
/// and logs one line per API request.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    // ── Inject response headers ─────────────────────────────────
    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", val);
    }

    let server_timing =
        format!("collector;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // Beacons arrive constantly and streams never finish; keep them quiet
    let status = response.status().as_u16();
    if path.starts_with("/api/") && !path.ends_with("/stream") {
        if path.ends_with("/beacon") {
            tracing::trace!(%method, %path, status, us = us as u64, "request");
        } else if status >= 500 {
            tracing::warn!(%method, %path, status, us = us as u64, "request");
        } else {
            tracing::info!(%method, %path, status, us = us as u64, "request");
        }
    }

    response
}
