//! # Gap scanner
//! Walks persisted weekly history from the epoch to "now minus one day",
//! compares each bucket's key count to the expected size of a complete
//! period, and requests backfill for anything absent or short. Requests
//! work and moves on; it never blocks on backfill completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use metrics::counter;
use tokio::task::JoinHandle;

use crate::bucket::BucketLayout;
use crate::error::PipelineError;
use crate::source::{IngestClass, SourceId};
use crate::store::BucketStore;

/// Outbound capability of the scanner; the supervisor implements it by
/// routing to the matching worker.
#[async_trait]
pub trait BackfillSink: Send + Sync {
    async fn request_historical(
        &self,
        source: SourceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), PipelineError>;
}

/// One pass over all merge-class sources. Returns the number of backfill
/// requests issued. `today` is injected so tests can pin the horizon.
pub async fn scan_once(
    layout: BucketLayout,
    sources: &[SourceId],
    store: &dyn BucketStore,
    sink: &dyn BackfillSink,
    today: NaiveDate,
) -> usize {
    let yesterday = today - Days::new(1);
    let mut requested = 0usize;

    for &source in sources {
        // Forecast history holes are not backfillable facts.
        if source.class() == IngestClass::Overwrite {
            continue;
        }

        for start in layout.period_starts_through(yesterday) {
            let id = layout.bucket_id_for_date(start);
            let complete = match store.get_bucket(source, &id).await {
                Ok(Some(bucket)) => bucket.key_count() >= layout.expected_keys(),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(target: "gaps", bucket = %id, error = %e, "bucket read failed; skipping");
                    continue;
                }
            };
            if complete {
                continue;
            }

            let end = layout.period_end(start);
            match sink.request_historical(source, start, end).await {
                Ok(()) => {
                    requested += 1;
                    counter!("pipeline_gap_requests_total").increment(1);
                    tracing::info!(
                        target: "gaps",
                        source = %source,
                        bucket = %id,
                        "incomplete bucket, backfill requested"
                    );
                }
                Err(e) => {
                    tracing::warn!(target: "gaps", source = %source, bucket = %id, error = %e, "backfill request failed");
                }
            }
        }
    }

    requested
}

/// Endless scan loop: one full pass, then sleep `interval`, repeat.
pub fn spawn_gap_scanner(
    layout: BucketLayout,
    sources: Vec<SourceId>,
    store: Arc<dyn BucketStore>,
    sink: Arc<dyn BackfillSink>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let today = Utc::now().date_naive();
            let requested = scan_once(layout, &sources, store.as_ref(), sink.as_ref(), today).await;
            tracing::info!(target: "gaps", requested, "gap scan pass complete");
            tokio::time::sleep(interval).await;
        }
    })
}
