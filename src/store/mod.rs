// src/store/mod.rs
pub mod json_file;

pub use json_file::JsonFileBucketStore;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::bucket::{Bucket, Entry};
use crate::source::SourceId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

/// Document store keyed by (source, bucket id). Each provider gets its own
/// namespace so two grids' identical week ids never collide. Injected
/// explicitly into the reconciler (sole writer) and the gap scanner
/// (read-only); no ambient global connection.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn get_bucket(&self, source: SourceId, id: &str) -> Result<Option<Bucket>, StoreError>;

    /// Insert-or-merge one hour slot: creates the bucket when absent, adds
    /// the hour key when missing, and replaces an existing hour key only
    /// when `overwrite` is set. Never removes a key.
    async fn upsert_hour(
        &self,
        source: SourceId,
        id: &str,
        hour_key: &str,
        entries: Vec<Entry>,
        overwrite: bool,
    ) -> Result<(), StoreError>;
}

/// In-memory store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    inner: Mutex<HashMap<(SourceId, String), Bucket>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").len()
    }

    /// Pre-load a bucket, e.g. to stage gap-scanner scenarios.
    pub fn insert(&self, source: SourceId, bucket: Bucket) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .insert((source, bucket.id.clone()), bucket);
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn get_bucket(&self, source: SourceId, id: &str) -> Result<Option<Bucket>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store mutex poisoned")
            .get(&(source, id.to_string()))
            .cloned())
    }

    async fn upsert_hour(
        &self,
        source: SourceId,
        id: &str,
        hour_key: &str,
        entries: Vec<Entry>,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let bucket = inner
            .entry((source, id.to_string()))
            .or_insert_with(|| Bucket::new(id));
        if overwrite || !bucket.contains_hour(hour_key) {
            bucket.set_hour(hour_key, entries);
        }
        Ok(())
    }
}
