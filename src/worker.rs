//! # Worker
//! One per source: owns the poll loop, the watchdog clock, failure state,
//! and the force-poll signal. A broken source flags itself and keeps
//! looping; it never takes the process or the other workers down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::metrics::ensure_pipeline_metrics;
use crate::source::{QueueItem, Source, SourceFactory, SourceId};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Coarse wake-up used to decide whether it is time to poll; also the
    /// upper bound on kill-flag latency while sleeping.
    pub watchdog: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(5),
        }
    }
}

/// Signal flags shared between the poll loop and its owner. Mutated only
/// through the worker's methods.
#[derive(Debug, Default)]
struct Signals {
    kill: AtomicBool,
    failed: AtomicBool,
    force_poll: AtomicBool,
    running: AtomicBool,
}

pub struct Worker {
    id: SourceId,
    signals: Arc<Signals>,
    source: Arc<tokio::sync::Mutex<Box<dyn Source>>>,
    factory: Arc<dyn SourceFactory>,
    tx: mpsc::Sender<QueueItem>,
    cfg: WorkerConfig,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        id: SourceId,
        factory: Arc<dyn SourceFactory>,
        tx: mpsc::Sender<QueueItem>,
        cfg: WorkerConfig,
    ) -> Self {
        ensure_pipeline_metrics();
        let source = Arc::new(tokio::sync::Mutex::new(factory.create(id)));
        Self {
            id,
            signals: Arc::new(Signals::default()),
            source,
            factory,
            tx,
            cfg,
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn failed(&self) -> bool {
        self.signals.failed.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        self.signals.running.load(Ordering::SeqCst)
    }

    /// Spawn the poll loop. Idempotent start is not supported; callers own
    /// the start/stop pairing.
    pub fn start(&self) {
        self.signals.kill.store(false, Ordering::SeqCst);
        self.signals.running.store(true, Ordering::SeqCst);

        let id = self.id;
        let signals = Arc::clone(&self.signals);
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let watchdog = self.cfg.watchdog;

        let task = tokio::spawn(async move {
            poll_loop(id, signals, source, tx, watchdog).await;
        });
        *self.handle.lock().expect("worker handle mutex poisoned") = Some(task);
    }

    /// Next watchdog tick polls immediately, regardless of elapsed sleep.
    pub fn force_poll(&self) {
        self.signals.force_poll.store(true, Ordering::SeqCst);
    }

    /// Fetch a historical range on an independent short-lived task. A
    /// fresh source instance is built per scrape so the poll loop's
    /// connection state is never shared; errors are logged, never
    /// propagated.
    pub fn request_backfill(&self, start: NaiveDate, end: NaiveDate) {
        counter!("pipeline_backfill_requests_total").increment(1);
        let id = self.id;
        let factory = Arc::clone(&self.factory);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut source = factory.create(id);
            match source.fetch_range(start, end).await {
                Ok(records) if records.is_empty() => {}
                Ok(records) => {
                    counter!("pipeline_records_queued_total").increment(records.len() as u64);
                    if tx.send(QueueItem { source: id, records }).await.is_err() {
                        tracing::warn!(target: "worker", source = %id, "queue closed, dropping backfill result");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "worker",
                        source = %id,
                        start = %start,
                        end = %end,
                        error = %e,
                        "backfill fetch failed"
                    );
                }
            }
        });
    }

    /// Override the source's "already reported" bookkeeping. The timestamp
    /// must carry an offset; naive strings are an argument error.
    pub async fn set_reference_time(&self, ts: &str) -> Result<(), PipelineError> {
        let parsed = DateTime::parse_from_rfc3339(ts).map_err(|e| {
            PipelineError::invalid_argument(format!(
                "reference time must be timezone-aware RFC 3339: {e}"
            ))
        })?;
        self.source
            .lock()
            .await
            .set_reference_time(parsed.with_timezone(&Utc));
        Ok(())
    }

    /// Replace the underlying source with a freshly built instance and
    /// clear the failure flag.
    pub async fn reset(&self) {
        let fresh = self.factory.create(self.id);
        *self.source.lock().await = fresh;
        self.signals.failed.store(false, Ordering::SeqCst);
        counter!("pipeline_worker_resets_total").increment(1);
        tracing::info!(target: "worker", source = %self.id, "source reset");
    }

    /// Cooperative stop: set the kill flag and wait for the loop to observe
    /// it. A loop that does not exit within `timeout` (typically stuck
    /// inside a fetch) is aborted and reported as a `ShutdownTimeout`
    /// fault.
    pub async fn stop(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.signals.kill.store(true, Ordering::SeqCst);

        let handle = self
            .handle
            .lock()
            .expect("worker handle mutex poisoned")
            .take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => Ok(()),
            Err(_) => {
                handle.abort();
                self.signals.running.store(false, Ordering::SeqCst);
                Err(PipelineError::ShutdownTimeout {
                    source: self.id,
                    timeout,
                })
            }
        }
    }
}

async fn poll_loop(
    id: SourceId,
    signals: Arc<Signals>,
    source: Arc<tokio::sync::Mutex<Box<dyn Source>>>,
    tx: mpsc::Sender<QueueItem>,
    watchdog: Duration,
) {
    let interval = source.lock().await.poll_interval();
    // Seeded at the interval so the first iteration polls immediately.
    let mut slept = interval;

    while !signals.kill.load(Ordering::SeqCst) {
        if slept < interval && !signals.force_poll.load(Ordering::SeqCst) {
            tokio::time::sleep(watchdog).await;
            slept += watchdog;
            continue;
        }
        slept = Duration::ZERO;
        signals.force_poll.store(false, Ordering::SeqCst);
        attempt_poll(id, &signals, &source, &tx).await;
    }

    signals.running.store(false, Ordering::SeqCst);
    tracing::debug!(target: "worker", source = %id, "poll loop exited");
}

async fn attempt_poll(
    id: SourceId,
    signals: &Signals,
    source: &tokio::sync::Mutex<Box<dyn Source>>,
    tx: &mpsc::Sender<QueueItem>,
) {
    counter!("pipeline_fetch_total").increment(1);
    let result = source.lock().await.fetch_latest().await;
    match result {
        Ok(records) if records.is_empty() => {
            // Nothing new since the last check.
        }
        Ok(records) => {
            counter!("pipeline_records_queued_total").increment(records.len() as u64);
            // Bounded queue: block here under backpressure rather than drop.
            if tx.send(QueueItem { source: id, records }).await.is_err() {
                tracing::warn!(target: "worker", source = %id, "queue closed, dropping fetch result");
            }
        }
        Err(e) => {
            signals.failed.store(true, Ordering::SeqCst);
            counter!("pipeline_fetch_errors_total").increment(1);
            let err = PipelineError::SourceFetch {
                source: id,
                reason: e.to_string(),
            };
            tracing::warn!(target: "worker", error = %err, "worker flagged for reset");
        }
    }
}
