// src/source/mod.rs
pub mod feed;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::PipelineError;

/// How a source's records land in an existing bucket hour.
///
/// Observed generation merges (first write wins, re-delivery is a no-op);
/// forecast outputs replace their own hour keys on every delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestClass {
    Merge,
    Overwrite,
}

/// One data provider. Stable for the process lifetime; used as a map key
/// everywhere.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    ElSalvador,
    CostaRica,
    Nicaragua,
    Mexico,
    ElSalvadorForecast,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::ElSalvador,
        SourceId::CostaRica,
        SourceId::Nicaragua,
        SourceId::Mexico,
        SourceId::ElSalvadorForecast,
    ];

    /// Ingest class is an explicit attribute of the id, never a check on
    /// the concrete source type.
    pub fn class(self) -> IngestClass {
        match self {
            SourceId::ElSalvadorForecast => IngestClass::Overwrite,
            SourceId::ElSalvador | SourceId::CostaRica | SourceId::Nicaragua | SourceId::Mexico => {
                IngestClass::Merge
            }
        }
    }

    /// Default polling cadence per provider. Costa Rica publishes a daily
    /// table; the other live feeds update hourly; forecasts are produced
    /// once a day.
    pub fn default_poll_interval(self) -> Duration {
        match self {
            SourceId::CostaRica | SourceId::ElSalvadorForecast => Duration::from_secs(60 * 60 * 24),
            SourceId::ElSalvador | SourceId::Nicaragua | SourceId::Mexico => {
                Duration::from_secs(60 * 60)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceId::ElSalvador => "el-salvador",
            SourceId::CostaRica => "costa-rica",
            SourceId::Nicaragua => "nicaragua",
            SourceId::Mexico => "mexico",
            SourceId::ElSalvadorForecast => "el-salvador-forecast",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for SourceId {}

impl FromStr for SourceId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| PipelineError::invalid_argument(format!("unknown source '{s}'")))
    }
}

/// One hourly observation from a provider. Immutable once created.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub ts: DateTime<Utc>,
    pub category: String,
    pub value: f64,
}

impl Record {
    pub fn new(ts: DateTime<Utc>, category: impl Into<String>, value: f64) -> Self {
        Self {
            ts,
            category: category.into(),
            value,
        }
    }
}

/// Result of one fetch. Empty means "no new data since last check", not an
/// error.
pub type RecordSet = Vec<Record>;

/// The unit handed from a worker to the reconciler. Consumed exactly once.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub source: SourceId,
    pub records: RecordSet,
}

/// Capability implemented once per data provider; owns connection state to
/// one external site or feed.
#[async_trait::async_trait]
pub trait Source: Send {
    fn id(&self) -> SourceId;

    /// Records newer than the source's own reference point. The source
    /// advances that point itself on success.
    async fn fetch_latest(&mut self) -> Result<RecordSet>;

    /// Records whose calendar date falls within `start..=end`.
    async fn fetch_range(&mut self, start: NaiveDate, end: NaiveDate) -> Result<RecordSet>;

    fn poll_interval(&self) -> Duration;

    /// Overrides the "already reported" bookkeeping.
    fn set_reference_time(&mut self, t: DateTime<Utc>);
}

/// Builds fresh sources. Workers use it on reset and for backfill tasks
/// (one fresh instance per history scrape); tests substitute scripted
/// sources.
pub trait SourceFactory: Send + Sync {
    fn create(&self, id: SourceId) -> Box<dyn Source>;
}

// --- Test helpers ---

/// Shared observation point for a [`ScriptedSource`] after it has moved
/// into a worker.
#[derive(Debug, Default)]
pub struct Probe {
    pub fetches: usize,
    pub ranges: Vec<(NaiveDate, NaiveDate)>,
    pub reference: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    Records(RecordSet),
    Empty,
    Fail(String),
    /// Never resolves; used to exercise stop timeouts.
    Hang,
}

/// A source that replays a script of fetch outcomes; once the script is
/// exhausted every further fetch reports no new data.
pub struct ScriptedSource {
    id: SourceId,
    interval: Duration,
    script: VecDeque<ScriptedFetch>,
    range_records: RecordSet,
    probe: Arc<Mutex<Probe>>,
}

impl ScriptedSource {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            interval: id.default_poll_interval(),
            script: VecDeque::new(),
            range_records: Vec::new(),
            probe: Arc::new(Mutex::new(Probe::default())),
        }
    }

    pub fn empty(id: SourceId) -> Self {
        Self::new(id)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn then(mut self, outcome: ScriptedFetch) -> Self {
        self.script.push_back(outcome);
        self
    }

    pub fn with_range_records(mut self, records: RecordSet) -> Self {
        self.range_records = records;
        self
    }

    pub fn with_probe(mut self, probe: Arc<Mutex<Probe>>) -> Self {
        self.probe = probe;
        self
    }

    pub fn probe(&self) -> Arc<Mutex<Probe>> {
        Arc::clone(&self.probe)
    }
}

#[async_trait::async_trait]
impl Source for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn fetch_latest(&mut self) -> Result<RecordSet> {
        self.probe.lock().expect("probe mutex poisoned").fetches += 1;
        match self.script.pop_front() {
            Some(ScriptedFetch::Records(r)) => Ok(r),
            Some(ScriptedFetch::Empty) | None => Ok(Vec::new()),
            Some(ScriptedFetch::Fail(msg)) => Err(anyhow::anyhow!(msg)),
            Some(ScriptedFetch::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }

    async fn fetch_range(&mut self, start: NaiveDate, end: NaiveDate) -> Result<RecordSet> {
        self.probe
            .lock()
            .expect("probe mutex poisoned")
            .ranges
            .push((start, end));
        Ok(self
            .range_records
            .iter()
            .filter(|r| {
                let d = r.ts.date_naive();
                start <= d && d <= end
            })
            .cloned()
            .collect())
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }

    fn set_reference_time(&mut self, t: DateTime<Utc>) {
        self.probe.lock().expect("probe mutex poisoned").reference = Some(t);
    }
}

/// Factory that hands out pre-loaded scripted sources in order; once a
/// source's queue is empty it falls back to an inert one. Counts creations
/// so tests can observe resets.
#[derive(Default)]
pub struct ScriptedFactory {
    queues: Mutex<HashMap<SourceId, VecDeque<Box<dyn Source>>>>,
    pub created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: SourceId, source: Box<dyn Source>) {
        self.queues
            .lock()
            .expect("factory mutex poisoned")
            .entry(id)
            .or_default()
            .push_back(source);
    }
}

impl SourceFactory for ScriptedFactory {
    fn create(&self, id: SourceId) -> Box<dyn Source> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.queues
            .lock()
            .expect("factory mutex poisoned")
            .get_mut(&id)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Box::new(ScriptedSource::empty(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_through_str() {
        for id in SourceId::ALL {
            assert_eq!(id.as_str().parse::<SourceId>().unwrap(), id);
        }
        assert!("belgium".parse::<SourceId>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case_names() {
        let json = serde_json::to_string(&SourceId::ElSalvadorForecast).unwrap();
        assert_eq!(json, "\"el-salvador-forecast\"");
        let back: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SourceId::ElSalvadorForecast);
    }

    #[test]
    fn forecast_ids_are_overwrite_class() {
        assert_eq!(SourceId::ElSalvadorForecast.class(), IngestClass::Overwrite);
        assert_eq!(SourceId::CostaRica.class(), IngestClass::Merge);
    }
}
