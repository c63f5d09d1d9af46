//! One JSON document per bucket on local disk, one subdirectory per
//! source. Matches the wire format in [`crate::bucket`]; bucket ids
//! (`DD/MM/YYYY`) become `DD-MM-YYYY.json` file names.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::bucket::{Bucket, Entry};
use crate::source::SourceId;
use crate::store::{BucketStore, StoreError};

#[derive(Debug, Clone)]
pub struct JsonFileBucketStore {
    dir: PathBuf,
}

impl JsonFileBucketStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, source: SourceId, id: &str) -> PathBuf {
        self.dir
            .join(source.as_str())
            .join(format!("{}.json", id.replace('/', "-")))
    }

    fn read_bucket(path: &Path) -> Result<Option<Bucket>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[async_trait]
impl BucketStore for JsonFileBucketStore {
    async fn get_bucket(&self, source: SourceId, id: &str) -> Result<Option<Bucket>, StoreError> {
        Self::read_bucket(&self.path_for(source, id))
    }

    async fn upsert_hour(
        &self,
        source: SourceId,
        id: &str,
        hour_key: &str,
        entries: Vec<Entry>,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let path = self.path_for(source, id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut bucket = Self::read_bucket(&path)?.unwrap_or_else(|| Bucket::new(id));
        if overwrite || !bucket.contains_hour(hour_key) {
            bucket.set_hour(hour_key, entries);
            std::fs::write(&path, serde_json::to_string_pretty(&bucket)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ES: SourceId = SourceId::ElSalvador;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileBucketStore::new(dir.path());

        store
            .upsert_hour(
                ES,
                "18/01/2021",
                "02-18/01/2021",
                vec![Entry::new(95.2, "Geothermal")],
                false,
            )
            .await
            .unwrap();

        let bucket = store.get_bucket(ES, "18/01/2021").await.unwrap().unwrap();
        assert_eq!(bucket.id, "18/01/2021");
        assert_eq!(bucket.hour("02-18/01/2021").unwrap()[0].category, "Geothermal");

        // Slashes in the id never become path separators.
        assert!(dir.path().join("el-salvador/18-01-2021.json").exists());
    }

    #[tokio::test]
    async fn merge_on_disk_keeps_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileBucketStore::new(dir.path());

        store
            .upsert_hour(ES, "18/01/2021", "05-18/01/2021", vec![Entry::new(1.0, "Wind")], false)
            .await
            .unwrap();
        store
            .upsert_hour(ES, "18/01/2021", "05-18/01/2021", vec![Entry::new(2.0, "Wind")], false)
            .await
            .unwrap();

        let bucket = store.get_bucket(ES, "18/01/2021").await.unwrap().unwrap();
        assert_eq!(bucket.hour("05-18/01/2021").unwrap()[0].value, 1.0);
    }
}
