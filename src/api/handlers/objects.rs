use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery};
use crate::object_store::ObjectStoreError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedUrlParams {
    pub expires: i64,
    pub signature: String,
}

/// Serve a blob through a pre-signed URL issued by the local backend.
/// Route: GET /objects/:key
pub async fn serve_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    AppQuery(params): AppQuery<SignedUrlParams>,
) -> Result<Response, ApiError> {
    let signer = state
        .url_signer
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    let now = chrono::Utc::now().timestamp();
    if !signer.verify(&key, params.expires, &params.signature, now) {
        return Err(ApiError::unauthorized());
    }

    let stream = state.object_store.get(&key).await.map_err(|e| match e {
        ObjectStoreError::NotFound(_) => ApiError::not_found("Not found"),
        e => {
            tracing::error!(key = %key, error = %e, "Failed to read object");
            ApiError::internal("Internal server error")
        }
    })?;

    let mut response = (StatusCode::OK, Body::from_stream(stream)).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    // The URL stops working at `expires`; so must any cached copy.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, no-store"),
    );

    Ok(response)
}
