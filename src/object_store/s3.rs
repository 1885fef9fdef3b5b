use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::time::Duration;

use super::{ByteStream, ObjectStore, ObjectStoreError};

/// MinIO / S3-compatible object store backend.
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, anyhow::Error> {
        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)?;
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let mut bucket = Bucket::new(bucket, region, credentials)?;
        // MinIO serves buckets at http://endpoint/bucket rather than http://bucket.endpoint
        bucket.set_path_style();

        Ok(Self { bucket })
    }
}

fn backend_error(action: &str, key: &str, e: S3Error) -> ObjectStoreError {
    ObjectStoreError::Backend(format!("S3 {action} of '{key}' failed: {e}"))
}

fn check_status(action: &str, key: &str, status: u16) -> Result<(), ObjectStoreError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(ObjectStoreError::NotFound(key.to_string())),
        _ => Err(ObjectStoreError::Backend(format!(
            "S3 {action} of '{key}' failed with status {status}"
        ))),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let response = self
            .bucket
            .put_object(key, &data)
            .await
            .map_err(|e| backend_error("upload", key, e))?;
        check_status("upload", key, response.status_code())
    }

    async fn get(&self, key: &str) -> Result<ByteStream, ObjectStoreError> {
        let response = self.bucket.get_object_stream(key).await.map_err(|e| match e {
            S3Error::HttpFailWithBody(404, _) => ObjectStoreError::NotFound(key.to_string()),
            e => backend_error("download", key, e),
        })?;
        check_status("download", key, response.status_code)?;

        let key = key.to_string();
        Ok(Box::pin(
            response
                .bytes
                .map_err(move |e| backend_error("download", &key, e)),
        ))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| backend_error("delete", key, e))?;

        // 404: already gone
        match check_status("delete", key, response.status_code()) {
            Ok(()) | Err(ObjectStoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        match self.bucket.head_object(key).await {
            Ok((_, status)) => Ok((200..300).contains(&status)),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(backend_error("head", key, e)),
        }
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError> {
        let expiry_secs = u32::try_from(ttl.as_secs())
            .map_err(|_| ObjectStoreError::Backend("presign ttl out of range".to_string()))?;
        self.bucket
            .presign_get(key, expiry_secs, None)
            .await
            .map_err(|e| backend_error("presign", key, e))
    }
}
