//! S3-compatible implementation of the ObjectStore trait

use crate::{object_uri, ObjectStore, StoreError, StoreResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

/// ObjectStore implementation over an S3-compatible endpoint.
///
/// Works against AWS S3 and S3-compatible stores (MinIO in local
/// stacks) via the standard credential chain. All writes carry an
/// explicit content type.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Wrap an already-configured S3 client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient credential chain.
    ///
    /// `endpoint_url` points at an S3-compatible store; path-style
    /// addressing is forced when it is set (MinIO does not serve
    /// virtual-hosted buckets).
    pub async fn connect(endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if endpoint_url.is_some() {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    fn map_error<E>(context: String, err: SdkError<E>) -> StoreError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::ServiceError(service_err) => {
                let status = service_err.raw().status().as_u16();
                match status {
                    404 => StoreError::NotFound(context),
                    401 | 403 => StoreError::PermissionDenied(format!("{}: {}", context, err)),
                    _ => StoreError::Transient(format!("{}: {}", context, err)),
                }
            }
            // Dispatch/timeout/connector failures are all retryable.
            _ => StoreError::Transient(format!("{}: {}", context, err)),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn read(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_error(object_uri(bucket, key), e))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(format!("{}: {}", object_uri(bucket, key), e)))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn write(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<String> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| Self::map_error(object_uri(bucket, key), e))?;

        tracing::debug!(
            bucket = %bucket,
            key = %key,
            content_type = %content_type,
            size,
            "Object written"
        );

        Ok(object_uri(bucket, key))
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<String> {
        self.client
            .copy_object()
            .copy_source(format!("{}/{}", src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| Self::map_error(object_uri(src_bucket, src_key), e))?;

        Ok(object_uri(dst_bucket, dst_key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_error(object_uri(bucket, key), e))?;

        Ok(())
    }
}
