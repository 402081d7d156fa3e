//! # Object Store Abstraction
//!
//! Capability interface over the buckets the pipeline touches: landing
//! (input TIFFs), processed (page PNGs), archive (retention copies) and
//! failed (sidecars for exhausted extractions).
//!
//! Stage logic never talks to an SDK directly; it receives an
//! `Arc<dyn ObjectStore>` so tests can substitute [`InMemoryStore`].
//!
//! ## Implementations
//!
//! - **S3Store**: S3-compatible object store (production)
//! - **InMemoryStore**: test/dev implementation

mod inmemory_store;
mod s3_store;

pub use inmemory_store::InMemoryStore;
pub use s3_store::S3Store;

use async_trait::async_trait;

/// Errors from object-store operations.
///
/// Only `Transient` is retryable; the other kinds route the message to
/// a dead-letter subject.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient object-store failure: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Canonical URI for an object, used in envelopes and audit records.
pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// Split a canonical object URI back into `(bucket, key)`.
pub fn parse_uri(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix("s3://")?.split_once('/')
}

/// Narrow object-storage capability used by the stages.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object into memory.
    async fn read(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Write an object with an explicit content type. Overwrites.
    ///
    /// Returns the canonical URI of the written object.
    async fn write(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<String>;

    /// Server-side copy. Overwrites the destination.
    ///
    /// Returns the canonical URI of the destination object.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<String>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;
}
