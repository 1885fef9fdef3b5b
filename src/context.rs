//! Request-scoped data passed explicitly into every service call.

use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::storage::models::{Role, TenantId, User};

/// The authenticated user on whose behalf a request runs.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
    pub organisation_id: String,
    pub role: Role,
}

impl Caller {
    /// The organisation that scopes every catalogue access made for this caller.
    pub fn tenant(&self) -> TenantId {
        TenantId::new(self.organisation_id.clone())
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            organisation_id: user.organisation_id.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// None for anonymous requests or unresolvable tokens.
    pub caller: Option<Caller>,
    /// The raw bearer token presented with the request, if any.
    pub bearer_token: Option<String>,
    /// Fired when the request is abandoned.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(caller: Caller, bearer_token: impl Into<String>) -> Self {
        Self {
            caller: Some(caller),
            bearer_token: Some(bearer_token.into()),
            cancel: CancellationToken::new(),
        }
    }

    /// The caller, or `Unauthorized` for protected operations.
    pub fn require_caller(&self) -> Result<&Caller, ServiceError> {
        self.caller.as_ref().ok_or(ServiceError::Unauthorized)
    }
}
