// tests/gap_scan.rs
//
// History audit: complete buckets are left alone, short or absent ones get
// exactly one backfill request per pass, forecast sources are never
// scanned.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, TimeZone, Utc};

use gridwatt::bucket::{hour_key, Bucket, BucketLayout, Entry};
use gridwatt::error::PipelineError;
use gridwatt::gaps::{scan_once, BackfillSink};
use gridwatt::source::SourceId;
use gridwatt::store::MemoryBucketStore;

#[derive(Default)]
struct CountingSink {
    calls: Mutex<Vec<(SourceId, NaiveDate, NaiveDate)>>,
}

#[async_trait]
impl BackfillSink for CountingSink {
    async fn request_historical(
        &self,
        source: SourceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), PipelineError> {
        self.calls.lock().unwrap().push((source, start, end));
        Ok(())
    }
}

/// A bucket holding every hour of its 7-day period (169 keys with the id).
fn complete_bucket(layout: &BucketLayout, start: NaiveDate) -> Bucket {
    let mut bucket = Bucket::new(layout.bucket_id_for_date(start));
    for day in 0..7 {
        let date = start + Days::new(day);
        for hour in 0..24 {
            let ts = Utc
                .from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap());
            bucket.set_hour(hour_key(ts), vec![Entry::new(1.0, "Hydroelectric")]);
        }
    }
    bucket
}

/// Same, but holding only the first `keys` hour slots.
fn partial_bucket(layout: &BucketLayout, start: NaiveDate, keys: usize) -> Bucket {
    let mut bucket = complete_bucket(layout, start);
    while bucket.hours.len() > keys {
        let last = bucket.hours.keys().next_back().unwrap().clone();
        bucket.hours.remove(&last);
    }
    bucket
}

#[tokio::test]
async fn short_bucket_gets_exactly_one_request_per_pass() {
    let today = Utc::now().date_naive();
    // Two full periods: [epoch, epoch+7) and [epoch+7, epoch+14) where
    // epoch+13 == yesterday.
    let epoch = today - Days::new(14);
    let layout = BucketLayout::with_epoch(epoch);
    let second = epoch + Days::new(7);

    let store = MemoryBucketStore::new();
    store.insert(SourceId::ElSalvador, complete_bucket(&layout, epoch));
    store.insert(SourceId::ElSalvador, partial_bucket(&layout, second, 99)); // 100 keys with the id

    let sink = CountingSink::default();
    let requested = scan_once(layout, &[SourceId::ElSalvador], &store, &sink, today).await;

    assert_eq!(requested, 1);
    let calls = sink.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(SourceId::ElSalvador, second, second + Days::new(6))],
        "only the short period is requested, with inclusive bounds"
    );
}

#[tokio::test]
async fn absent_buckets_are_requested_too() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(14);
    let layout = BucketLayout::with_epoch(epoch);

    let store = MemoryBucketStore::new();
    store.insert(SourceId::CostaRica, complete_bucket(&layout, epoch));
    // Second period never written at all.

    let sink = CountingSink::default();
    let requested = scan_once(layout, &[SourceId::CostaRica], &store, &sink, today).await;

    assert_eq!(requested, 1);
    assert_eq!(sink.calls.lock().unwrap()[0].1, epoch + Days::new(7));
}

#[tokio::test]
async fn complete_history_requests_nothing() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(14);
    let layout = BucketLayout::with_epoch(epoch);

    let store = MemoryBucketStore::new();
    store.insert(SourceId::Nicaragua, complete_bucket(&layout, epoch));
    store.insert(SourceId::Nicaragua, complete_bucket(&layout, epoch + Days::new(7)));

    let sink = CountingSink::default();
    let requested = scan_once(layout, &[SourceId::Nicaragua], &store, &sink, today).await;
    assert_eq!(requested, 0);
}

#[tokio::test]
async fn forecast_sources_are_not_scanned() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(14);
    let layout = BucketLayout::with_epoch(epoch);
    let store = MemoryBucketStore::new(); // everything "missing"

    let sink = CountingSink::default();
    let requested = scan_once(
        layout,
        &[SourceId::ElSalvadorForecast],
        &store,
        &sink,
        today,
    )
    .await;

    assert_eq!(requested, 0);
    assert!(sink.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_pass_covers_every_source_independently() {
    let today = Utc::now().date_naive();
    let epoch = today - Days::new(7);
    let layout = BucketLayout::with_epoch(epoch);
    let store = MemoryBucketStore::new(); // single period, absent

    let sink = CountingSink::default();
    let requested = scan_once(
        layout,
        &[SourceId::ElSalvador, SourceId::Mexico],
        &store,
        &sink,
        today,
    )
    .await;

    assert_eq!(requested, 2, "one request per merge-class source");
}
