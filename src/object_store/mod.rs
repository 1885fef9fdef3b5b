mod local;
mod s3;

pub use local::{LocalStore, UrlSigner};
pub use s3::S3Store;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Object content, streamed in chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ObjectStoreError>> + Send>>;

/// Abstraction over object storage backends.
/// Each store is bound to a single bucket. Keys are catalogue file ids; the
/// raw blobs are meaningless without the catalogue.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<ByteStream, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    /// A URL that lets a client fetch the object directly until `ttl` elapses.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError>;
}
