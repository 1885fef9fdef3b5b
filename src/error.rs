use thiserror::Error;

use crate::mail::MailError;
use crate::object_store::ObjectStoreError;
use crate::storage::DatabaseError;

/// Outcome classification shared by the auth and file services.
/// Every failure is mapped to exactly one kind where it is detected.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(message.into())
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(e: DatabaseError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<ObjectStoreError> for ServiceError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(_) => ServiceError::NotFound,
            e => ServiceError::Internal(e.to_string()),
        }
    }
}

impl From<MailError> for ServiceError {
    fn from(e: MailError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
