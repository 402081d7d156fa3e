//! In-memory implementation of the ObjectStore trait for testing and development

use crate::{object_uri, ObjectStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// ObjectStore implementation backed by a process-local map.
///
/// Used by unit tests, the end-to-end scenario suite, and the CLI
/// (which stages a local file into the landing bucket before running
/// the pipeline in-process).
#[derive(Clone, Default)]
pub struct InMemoryStore {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently present in a bucket, sorted. Test helper.
    pub async fn keys_in(&self, bucket: &str) -> Vec<String> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Content type recorded for an object. Test helper.
    pub async fn content_type_of(&self, bucket: &str, key: &str) -> Option<String> {
        let objects = self.objects.read().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn read(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(object_uri(bucket, key)))
    }

    async fn write(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StoreResult<String> {
        let mut objects = self.objects.write().await;
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
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
        let mut objects = self.objects.write().await;
        let source = objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(object_uri(src_bucket, src_key)))?;
        objects.insert((dst_bucket.to_string(), dst_key.to_string()), source);
        Ok(object_uri(dst_bucket, dst_key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_round_trip() {
        let store = InMemoryStore::new();
        let uri = store
            .write("landing", "a.tiff", vec![1, 2, 3], "image/tiff")
            .await
            .unwrap();
        assert_eq!(uri, "s3://landing/a.tiff");
        assert_eq!(store.read("landing", "a.tiff").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(
            store.content_type_of("landing", "a.tiff").await.unwrap(),
            "image/tiff"
        );
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.read("landing", "missing.tiff").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn copy_overwrites_destination() {
        let store = InMemoryStore::new();
        store
            .write("landing", "a.tiff", vec![1], "image/tiff")
            .await
            .unwrap();
        store
            .write("archive", "a.tiff", vec![9], "image/tiff")
            .await
            .unwrap();

        let uri = store.copy("landing", "a.tiff", "archive", "a.tiff").await.unwrap();
        assert_eq!(uri, "s3://archive/a.tiff");
        assert_eq!(store.read("archive", "a.tiff").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn copy_missing_source_fails() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.copy("landing", "nope.tiff", "archive", "nope.tiff").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        store
            .write("landing", "a.tiff", vec![1], "image/tiff")
            .await
            .unwrap();
        store.delete("landing", "a.tiff").await.unwrap();
        store.delete("landing", "a.tiff").await.unwrap();
        assert!(store.read("landing", "a.tiff").await.is_err());
    }

    #[tokio::test]
    async fn keys_in_lists_only_that_bucket() {
        let store = InMemoryStore::new();
        store
            .write("processed", "b_page2.png", vec![], "image/png")
            .await
            .unwrap();
        store
            .write("processed", "b_page1.png", vec![], "image/png")
            .await
            .unwrap();
        store
            .write("archive", "b.tiff", vec![], "image/tiff")
            .await
            .unwrap();

        assert_eq!(
            store.keys_in("processed").await,
            vec!["b_page1.png".to_string(), "b_page2.png".to_string()]
        );
    }
}
