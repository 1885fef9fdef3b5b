use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppInput, JSend, MessageResponse};
use crate::auth::{self, SignIn, SignUp};
use crate::context::RequestContext;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OneTimeLoginRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub token: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn one_time_login(
    State(state): State<Arc<AppState>>,
    AppInput(req): AppInput<OneTimeLoginRequest>,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    auth::issue_one_time_token(&state, &req.email).await?;
    Ok(JSend::success(MessageResponse::new("Token sent")))
}

pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    AppInput(req): AppInput<SignInRequest>,
) -> Result<Json<JSend<SignIn>>, ApiError> {
    let signed_in = auth::redeem_token(&state, &req.token).await?;
    Ok(JSend::success(signed_in))
}

pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    AppInput(req): AppInput<SignUp>,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    auth::sign_up(&state, &req).await?;
    Ok(JSend::success(MessageResponse::new("Token sent")))
}

pub async fn log_out(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<JSend<MessageResponse>>, ApiError> {
    auth::log_out(&state, &ctx).await?;
    Ok(JSend::success(MessageResponse::new("Logged out")))
}
