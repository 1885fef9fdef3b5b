use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend, MessageResponse};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub files_deleted: u64,
    pub organisations_deleted: u64,
    pub users_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn root() -> Json<JSend<MessageResponse>> {
    JSend::success(MessageResponse::new("hey, what's that over there?!"))
}

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Wipe the catalogue, users and sessions. Blobs are left in place.
pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state.db.purge_all().map_err(|e| {
        tracing::error!(error = %e, "Purge failed");
        ApiError::internal("Internal server error")
    })?;

    tracing::warn!(
        files = stats.files,
        organisations = stats.organisations,
        users = stats.users,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        files_deleted: stats.files,
        organisations_deleted: stats.organisations,
        users_deleted: stats.users,
    }))
}
