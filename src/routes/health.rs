use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub database_status: &'static str,
    pub object_store_status: &'static str,
}

/// Overall status follows the database only; the object store is reported
/// but never makes the service unhealthy.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    info!("GET /health - Health check");

    let database_status = match state.repository.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            warn!("Database health check failed: {}", e);
            "unhealthy"
        }
    };

    let object_store_status = match &state.object_store {
        None => "disabled",
        Some(store) => match store.ping().await {
            Ok(()) => "healthy",
            Err(e) => {
                warn!("Object store health check failed: {}", e);
                "unhealthy"
            }
        },
    };

    Json(HealthResponse {
        status: if database_status == "healthy" { "healthy" } else { "unhealthy" },
        timestamp: Utc::now(),
        version: state.server.version.clone(),
        database_status,
        object_store_status,
    })
}
