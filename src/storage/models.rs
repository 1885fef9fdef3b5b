use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Organisation id of the acting caller. Every file query and mutation takes one,
/// so catalogue access can never be performed without a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(organisation_id: impl Into<String>) -> Self {
        Self(organisation_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tenant. Owns users and files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organisation {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Member,
}

/// A user record stored in redb
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub organisation_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,

    /// Pending one-time login token. Cleared together with `recovery_sent_at`.
    #[serde(default)]
    pub recovery_token: Option<String>,
    #[serde(default)]
    pub recovery_sent_at: Option<DateTime<Utc>>,
}

/// Fields required to create a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub organisation_id: String,
    pub role: Role,
}

/// A bearer-token session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Whether the blob behind a file row has been confirmed written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Row inserted, blob write not yet confirmed. Invisible to queries.
    Pending,
    Committed,
}

/// A file or folder record stored in redb
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub file_size: u64,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub organisation_id: String,
    pub is_folder: bool,
    #[serde(default)]
    pub is_shared_drive: bool,
    pub upload_state: UploadState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Visible to listing and lookup queries.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none() && self.upload_state == UploadState::Committed
    }

    pub fn tenant(&self) -> TenantId {
        TenantId::new(self.organisation_id.clone())
    }
}

/// Fields required to create a blob-backed file
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub file_size: u64,
    pub parent_id: Option<String>,
}

/// Fields required to create a folder
#[derive(Debug, Clone)]
pub struct NewFolder {
    pub name: String,
    pub parent_id: Option<String>,
    pub is_shared_drive: bool,
}
