use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::router::AppState;

/// Deep health probe: pings the store and reports delivery counters. The
/// shallow liveness probe is `/healthz`.
///
/// `status` is `ok` when the store answers, `degraded` when it answers but
/// the counters could not be read, and the response is 503 `unavailable`
/// when the ping fails.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let whatsapp = if state.dispatcher().is_configured() {
        "configured"
    } else {
        "not_configured"
    };

    if let Err(err) = state.store().ping().await {
        warn!(stage = "health", error = %err, "store ping failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "services": { "store": "down", "whatsapp": whatsapp },
            })),
        );
    }

    match state.ledger().snapshot().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "services": { "store": "up", "whatsapp": whatsapp },
                "metrics": snapshot,
            })),
        ),
        Err(err) => {
            warn!(stage = "health", error = %err, "failed to read ledger counters");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "degraded",
                    "services": { "store": "up", "whatsapp": whatsapp },
                })),
            )
        }
    }
}
