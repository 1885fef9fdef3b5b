use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{cors_layer, request_context};
use crate::AppState;

/// Room for multipart framing and the text fields around the file part.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.uploads.max_upload_size as usize + MULTIPART_OVERHEAD;

    let mut router = Router::new()
        // Public
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health))
        // Auth
        .route("/one_time_login", post(handlers::one_time_login))
        .route("/sign_in", post(handlers::sign_in))
        .route("/sign_up", post(handlers::sign_up))
        .route("/logout", post(handlers::log_out))
        // Files
        .route(
            "/files",
            get(handlers::list_files)
                .post(handlers::create_file)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/files/:id",
            delete(handlers::delete_file).patch(handlers::update_file),
        )
        .route("/files/:id/preview", get(handlers::preview_file))
        .route("/files/:id/download", get(handlers::download_file))
        .route("/folders/:id", get(handlers::folder_children))
        .route("/shared_drives", get(handlers::shared_drives));

    // Pre-signed URLs of the local backend point back at this service.
    if state.url_signer.is_some() {
        router = router.route("/objects/:key", get(handlers::serve_object));
    }

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled. Purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            request_context,
        ))
        .layer(cors_layer(&state.config.mail.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
