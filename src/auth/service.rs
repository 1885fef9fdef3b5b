use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::tokens::generate_token;
use crate::context::{Caller, RequestContext};
use crate::error::{ServiceError, ServiceResult};
use crate::storage::models::{NewUser, Role, User};
use crate::storage::DatabaseError;
use crate::AppState;

/// The user fields safe to return to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub organisation_id: String,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            organisation_id: user.organisation_id.clone(),
            role: user.role,
        }
    }
}

/// Result of redeeming a one-time token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignIn {
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUp {
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "firstName")]
    pub first_name: String,
    #[serde(default, alias = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub organisation: String,
}

/// Email a fresh one-time login token to an existing user.
pub async fn issue_one_time_token(state: &AppState, email: &str) -> ServiceResult<()> {
    let user = state
        .db
        .find_user_by_email(email)?
        .ok_or(ServiceError::NotFound)?;

    send_login_token(state, &user).await
}

/// Exchange a one-time token for a session. The token is consumed whether it
/// was still valid or had expired, so it can never be replayed.
pub async fn redeem_token(state: &AppState, token: &str) -> ServiceResult<SignIn> {
    let user = state
        .db
        .take_recovery_token(token)?
        .ok_or(ServiceError::NotFound)?;

    let expired = match user.recovery_sent_at {
        Some(sent_at) => Utc::now() - sent_at > state.config.auth.token_ttl(),
        None => true,
    };

    if expired {
        tracing::debug!(user_id = %user.id, "Rejected expired one-time token");
        return Err(ServiceError::Unauthorized);
    }

    let session_token = generate_token()?;
    state.db.create_session(&user.id, &session_token)?;

    tracing::info!(user_id = %user.id, organisation_id = %user.organisation_id, "Signed in");

    Ok(SignIn {
        token: session_token,
        user: PublicUser::from(&user),
    })
}

/// Register an organisation with its owner and email the owner a login token.
pub async fn sign_up(state: &AppState, req: &SignUp) -> ServiceResult<()> {
    let email = req.email.trim();
    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();
    let organisation = req.organisation.trim();

    if email.is_empty() || first_name.is_empty() || last_name.is_empty() || organisation.is_empty()
    {
        return Err(ServiceError::bad_request(
            "email, first_name, last_name and organisation are required",
        ));
    }

    let email_taken = state.db.find_user_by_email(email)?.is_some();
    let organisation_taken = state.db.find_organisation_by_name(organisation)?.is_some();
    if email_taken || organisation_taken {
        return Err(ServiceError::bad_request("account already exists"));
    }

    let org = state
        .db
        .create_organisation(organisation)
        .map_err(constraint_as_bad_request)?;

    let user = state
        .db
        .create_user(&NewUser {
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            organisation_id: org.id.clone(),
            role: Role::Owner,
        })
        .map_err(|e| {
            // Nothing removes the organisation again; it stays without users.
            tracing::error!(
                organisation_id = %org.id,
                error = %e,
                "User creation failed after organisation was created"
            );
            constraint_as_bad_request(e)
        })?;

    tracing::info!(user_id = %user.id, organisation_id = %org.id, "Signed up");

    send_login_token(state, &user).await
}

/// Delete the session presented with the request. Only the caller's own
/// session can match; removing nothing is still a success.
pub async fn log_out(state: &AppState, ctx: &RequestContext) -> ServiceResult<()> {
    let caller = ctx.require_caller()?;
    let token = ctx
        .bearer_token
        .as_deref()
        .ok_or(ServiceError::Unauthorized)?;

    let removed = state.db.remove_session(token, &caller.user_id)?;
    tracing::debug!(user_id = %caller.user_id, removed, "Logged out");
    Ok(())
}

/// Resolve the user behind a bearer token. Sessions past the configured
/// maximum age are deleted and resolve to nobody.
pub fn resolve_caller(state: &AppState, bearer_token: &str) -> Option<Caller> {
    match lookup_caller(state, bearer_token) {
        Ok(caller) => caller,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve caller");
            None
        }
    }
}

fn lookup_caller(state: &AppState, bearer_token: &str) -> Result<Option<Caller>, DatabaseError> {
    let Some(session) = state.db.find_session_by_token(bearer_token)? else {
        return Ok(None);
    };

    if Utc::now() - session.created_at > state.config.auth.session_max_age() {
        state.db.remove_session(&session.token, &session.user_id)?;
        tracing::debug!(user_id = %session.user_id, "Removed expired session");
        return Ok(None);
    }

    Ok(state
        .db
        .find_user_by_id(&session.user_id)?
        .as_ref()
        .map(Caller::from))
}

async fn send_login_token(state: &AppState, user: &User) -> ServiceResult<()> {
    let token = generate_token()?;
    if !state.db.set_recovery_token(&user.id, &token, Utc::now())? {
        return Err(ServiceError::internal(format!(
            "user {} vanished while issuing a token",
            user.id
        )));
    }

    state
        .mailer
        .send_token(&user.email, &user.first_name, &token)
        .await?;

    tracing::debug!(user_id = %user.id, "One-time token sent");
    Ok(())
}

fn constraint_as_bad_request(e: DatabaseError) -> ServiceError {
    match e {
        DatabaseError::Constraint(message) => ServiceError::BadRequest(message),
        e => e.into(),
    }
}
