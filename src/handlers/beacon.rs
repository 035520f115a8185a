use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::sources::Beacon;
use crate::AppState;

use super::AppError;

/// Largest batch a single page may report at once.
const MAX_ENTRIES_PER_BEACON: usize = 500;

#[derive(Debug, Serialize)]
pub struct BeaconAccepted {
    pub accepted: usize,
}

// ─── POST /api/vitals/beacon ─────────────────────────────────────
/// Pages report their performance entries here (typically with
/// `navigator.sendBeacon`). The response waits until every capture source
/// has queued the entries, not until they are captured.

pub async fn ingest_beacon(
    State(state): State<Arc<AppState>>,
    Json(beacon): Json<Beacon>,
) -> Result<(StatusCode, Json<BeaconAccepted>), AppError> {
    if beacon.entries.is_empty() {
        return Err(AppError::BadRequest("beacon has no entries".into()));
    }
    if beacon.entries.len() > MAX_ENTRIES_PER_BEACON {
        return Err(AppError::BadRequest(format!(
            "beacon has {} entries, at most {MAX_ENTRIES_PER_BEACON} allowed",
            beacon.entries.len()
        )));
    }

    let accepted = state.bus.publish(beacon).await;
    tracing::debug!(accepted, "beacon published");

    Ok((StatusCode::ACCEPTED, Json(BeaconAccepted { accepted })))
}
