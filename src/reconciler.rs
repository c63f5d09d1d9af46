//! # Reconciler
//! Single consumer of the shared queue and the only writer to the bucket
//! store. Groups each delivered record set by bucket and hour, then merges
//! under the idempotent-or-overwrite policy: an hour that already exists
//! is skipped for merge-class sources and replaced for overwrite-class
//! ones. Re-ingesting the same data is therefore always safe.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bucket::{hour_key, BucketLayout, Entry};
use crate::metrics::ensure_pipeline_metrics;
use crate::source::{IngestClass, QueueItem};
use crate::store::BucketStore;

pub struct Reconciler {
    store: Arc<dyn BucketStore>,
    layout: BucketLayout,
    rx: mpsc::Receiver<QueueItem>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn BucketStore>,
        layout: BucketLayout,
        rx: mpsc::Receiver<QueueItem>,
    ) -> Self {
        ensure_pipeline_metrics();
        Self { store, layout, rx }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until every producer has hung up. `recv` parks the
    /// task while the queue is empty; there is no busy spin.
    pub async fn run(mut self) {
        while let Some(item) = self.rx.recv().await {
            apply(self.store.as_ref(), self.layout, item).await;
        }
        tracing::info!(target: "reconcile", "queue closed; reconciler exiting");
    }
}

/// Merge one queue item into the store. A storage error on one triple is
/// logged and counted; the remaining triples are still attempted, so the
/// pipeline never stops because of one bad write.
pub async fn apply(store: &dyn BucketStore, layout: BucketLayout, item: QueueItem) {
    let overwrite = item.source.class() == IngestClass::Overwrite;

    let mut buckets: BTreeMap<String, BTreeMap<String, Vec<Entry>>> = BTreeMap::new();
    for record in item.records {
        buckets
            .entry(layout.bucket_id(record.ts))
            .or_default()
            .entry(hour_key(record.ts))
            .or_default()
            .push(Entry::new(record.value, record.category));
    }

    for (bucket_id, hours) in buckets {
        let existing = match store.get_bucket(item.source, &bucket_id).await {
            Ok(existing) => existing,
            Err(e) => {
                counter!("pipeline_storage_errors_total").increment(1);
                tracing::warn!(target: "reconcile", bucket = %bucket_id, error = %e, "bucket read failed; attempting writes anyway");
                None
            }
        };

        for (hour, entries) in hours {
            let present = existing
                .as_ref()
                .is_some_and(|bucket| bucket.contains_hour(&hour));
            if present && !overwrite {
                counter!("pipeline_upsert_skips_total").increment(1);
                continue;
            }

            match store
                .upsert_hour(item.source, &bucket_id, &hour, entries, overwrite)
                .await
            {
                Ok(()) => {
                    counter!("pipeline_upserts_total").increment(1);
                }
                Err(e) => {
                    counter!("pipeline_storage_errors_total").increment(1);
                    tracing::warn!(
                        target: "reconcile",
                        source = %item.source,
                        bucket = %bucket_id,
                        hour = %hour,
                        error = %e,
                        "upsert failed; continuing with remaining hours"
                    );
                }
            }
        }
    }
}
