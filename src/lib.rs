//! drive - A multi-tenant file storage backend
//!
//! This crate provides organisations, passwordless sign-in and a per-organisation
//! file catalogue with:
//! - redb embedded database for the catalogue, users and sessions
//! - Swappable object storage backends (local filesystem, S3-compatible)
//! - One-time login tokens delivered by email, bearer-token sessions
//! - REST API with multipart upload support

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod mail;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use mail::Mailer;
use object_store::{ObjectStore, UrlSigner};
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn ObjectStore>,
    pub mailer: Arc<dyn Mailer>,
    /// Verifies `/objects/:key` URLs; only set for the local backend.
    pub url_signer: Option<UrlSigner>,
    pub uploads_in_flight: files::UploadsInFlight,
}
