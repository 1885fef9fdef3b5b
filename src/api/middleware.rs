use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::auth;
use crate::context::RequestContext;
use crate::AppState;

/// Authorization boundary.
///
/// Resolves the bearer token (if any) to a caller and attaches a
/// [`RequestContext`] to the request. Never rejects: anonymous requests and
/// unresolvable tokens pass through with no caller, and each operation decides
/// whether it needs one.
pub async fn request_context(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let bearer_token = bearer_token(req.headers());
    let caller = bearer_token
        .as_deref()
        .and_then(|token| auth::resolve_caller(&state, token));

    let cancel = CancellationToken::new();
    // Fires if the client goes away before the handler finishes.
    let _guard = cancel.clone().drop_guard();

    req.extensions_mut().insert(RequestContext {
        caller,
        bearer_token,
        cancel,
    });

    next.run(req).await
}

/// CORS for the browser frontend. Only the origin of `frontend_url` is
/// allowed; an unparseable origin falls back to any origin.
pub fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    match HeaderValue::from_str(origin_of(frontend_url)) {
        Ok(origin) => cors.allow_origin(AllowOrigin::list([origin])),
        Err(_) => {
            tracing::warn!(frontend_url, "FRONTEND_URL is not a valid origin, allowing any");
            cors.allow_origin(Any)
        }
    }
}

/// `scheme://host[:port]` of a URL, without path or trailing slash.
fn origin_of(url: &str) -> &str {
    let url = url.trim();
    let authority_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[authority_start..].find('/') {
        Some(i) => &url[..authority_start + i],
        None => url,
    }
}

/// The session token from `Authorization`, raw or as `Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();

    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}
