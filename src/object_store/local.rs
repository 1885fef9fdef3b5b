use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::TryStreamExt;
use ring::hmac;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::{ByteStream, ObjectStore, ObjectStoreError};

/// Signs and verifies expiring download URLs for the local backend.
#[derive(Clone)]
pub struct UrlSigner {
    key: hmac::Key,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: &[u8], base_url: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build a URL for `GET /objects/{key}` valid until `expires` (unix seconds).
    pub fn signed_url(&self, key: &str, expires: i64) -> String {
        format!(
            "{}/objects/{}?expires={}&signature={}",
            self.base_url,
            key,
            expires,
            self.signature(key, expires)
        )
    }

    /// Check a signature and that it has not expired at `now` (unix seconds).
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(tag) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        hmac::verify(&self.key, signing_input(key, expires).as_bytes(), &tag).is_ok()
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        let tag = hmac::sign(&self.key, signing_input(key, expires).as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref())
    }
}

fn signing_input(key: &str, expires: i64) -> String {
    format!("{key}\n{expires}")
}

/// Local filesystem object store for development and testing.
/// The bucket is a directory under `base_path`.
pub struct LocalStore {
    bucket_path: PathBuf,
    signer: UrlSigner,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(
        base_path: P,
        bucket: &str,
        signer: UrlSigner,
    ) -> Result<Self, std::io::Error> {
        let bucket_path = base_path.as_ref().join(bucket);
        std::fs::create_dir_all(&bucket_path)?;
        Ok(Self {
            bucket_path,
            signer,
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        // Keys are flat ids; anything that could escape the bucket directory is unknown.
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        Ok(self.bucket_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &data).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream, ObjectStoreError> {
        let path = self.object_path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Box::pin(ReaderStream::new(file).map_err(ObjectStoreError::Io)))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        match self.object_path(key) {
            Ok(path) => Ok(path.exists()),
            Err(_) => Ok(false),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError> {
        self.object_path(key)?;
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| ObjectStoreError::Backend("presign ttl out of range".to_string()))?;
        let expires = chrono::Utc::now().timestamp() + ttl;
        Ok(self.signer.signed_url(key, expires))
    }
}
