//! # Weekly buckets
//! BucketId / hour-key derivation and the bucket wire format.
//!
//! All persisted history is grouped into fixed 7-day periods measured from a
//! global epoch date. A bucket is one JSON document: a reserved `week_of`
//! key holding the period's start date plus one key per hour of the period.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Period start date of the very first stored document.
pub const EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2016, 12, 27) {
    Some(d) => d,
    None => panic!("invalid epoch literal"),
};

/// Hour keys look like `"13-05/08/2026"`.
pub const HOUR_KEY_FORMAT: &str = "%H-%d/%m/%Y";

/// Bucket ids look like `"04/08/2026"` (the period's start date).
pub const BUCKET_ID_FORMAT: &str = "%d/%m/%Y";

/// Reserved document key carrying the bucket id.
pub const WEEK_KEY: &str = "week_of";

/// Hour key for a record timestamp.
pub fn hour_key(ts: DateTime<Utc>) -> String {
    ts.format(HOUR_KEY_FORMAT).to_string()
}

/// Fixed-length period grid rooted at an epoch date.
///
/// The default layout is the production one; tests substitute their own
/// epoch to pin down specific scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLayout {
    pub epoch: NaiveDate,
    pub period_days: u64,
}

impl Default for BucketLayout {
    fn default() -> Self {
        Self {
            epoch: EPOCH,
            period_days: 7,
        }
    }
}

impl BucketLayout {
    pub fn with_epoch(epoch: NaiveDate) -> Self {
        Self {
            epoch,
            period_days: 7,
        }
    }

    /// Start date of the period containing `date`.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        let offset = (date - self.epoch)
            .num_days()
            .rem_euclid(self.period_days as i64);
        date - Days::new(offset as u64)
    }

    /// Inclusive last date of the period starting at `start`.
    pub fn period_end(&self, start: NaiveDate) -> NaiveDate {
        start + Days::new(self.period_days - 1)
    }

    pub fn bucket_id_for_date(&self, date: NaiveDate) -> String {
        self.period_start(date).format(BUCKET_ID_FORMAT).to_string()
    }

    pub fn bucket_id(&self, ts: DateTime<Utc>) -> String {
        self.bucket_id_for_date(ts.date_naive())
    }

    /// Key count of a complete bucket: one per hour plus the id field.
    pub fn expected_keys(&self) -> usize {
        (self.period_days * 24) as usize + 1
    }

    /// Period starts from the epoch up to (and including) the period that
    /// contains `until`. Used by the gap scanner.
    pub fn period_starts_through(&self, until: NaiveDate) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut cursor = self.epoch;
        let last = self.period_start(until);
        while cursor <= last {
            out.push(cursor);
            cursor = cursor + Days::new(self.period_days);
        }
        out
    }
}

/// One `{value, type}` pair inside an hour slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: f64,
    #[serde(rename = "type")]
    pub category: String,
}

impl Entry {
    pub fn new(value: f64, category: impl Into<String>) -> Self {
        Self {
            value,
            category: category.into(),
        }
    }
}

/// One weekly document: the reserved id field plus one entry list per
/// hour key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(rename = "week_of")]
    pub id: String,
    #[serde(flatten)]
    pub hours: BTreeMap<String, Vec<Entry>>,
}

impl Bucket {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hours: BTreeMap::new(),
        }
    }

    /// Total document keys, counting the reserved id field.
    pub fn key_count(&self) -> usize {
        self.hours.len() + 1
    }

    pub fn contains_hour(&self, key: &str) -> bool {
        self.hours.contains_key(key)
    }

    pub fn hour(&self, key: &str) -> Option<&[Entry]> {
        self.hours.get(key).map(|v| v.as_slice())
    }

    pub fn set_hour(&mut self, key: impl Into<String>, entries: Vec<Entry>) {
        self.hours.insert(key.into(), entries);
    }
}
