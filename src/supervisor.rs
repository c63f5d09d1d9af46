//! # Supervisor
//! Owns the complete worker set: builds and starts one worker per source,
//! routes operator requests to the right one, and runs the health-check
//! loop that is the sole self-healing mechanism: any worker flagged
//! `failed` gets its source rebuilt on the next cycle, indefinitely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::gauge;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::gaps::BackfillSink;
use crate::source::{QueueItem, SourceFactory, SourceId};
use crate::worker::{Worker, WorkerConfig};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub worker: WorkerConfig,
    /// Health-check cadence; coarser than any worker's watchdog.
    pub health_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            health_interval: Duration::from_secs(30),
        }
    }
}

pub struct Supervisor {
    workers: HashMap<SourceId, Arc<Worker>>,
    health_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Build one worker per source, start them all, then start the health
    /// loop.
    pub fn start(
        ids: &[SourceId],
        factory: Arc<dyn SourceFactory>,
        tx: mpsc::Sender<QueueItem>,
        cfg: SupervisorConfig,
    ) -> Self {
        let mut workers = HashMap::with_capacity(ids.len());
        for &id in ids {
            let worker = Arc::new(Worker::new(id, Arc::clone(&factory), tx.clone(), cfg.worker));
            worker.start();
            workers.insert(id, worker);
        }
        tracing::info!(target: "supervisor", workers = workers.len(), "worker set started");

        let health_handle = spawn_health_loop(workers.values().cloned().collect(), cfg.health_interval);
        Self {
            workers,
            health_handle: std::sync::Mutex::new(Some(health_handle)),
        }
    }

    fn worker(&self, id: SourceId) -> Result<&Arc<Worker>, PipelineError> {
        self.workers
            .get(&id)
            .ok_or_else(|| PipelineError::invalid_argument(format!("source {id} is not running")))
    }

    pub fn request_historical(
        &self,
        id: SourceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), PipelineError> {
        if start > end {
            return Err(PipelineError::invalid_argument(format!(
                "start date {start} is after end date {end}"
            )));
        }
        self.worker(id)?.request_backfill(start, end);
        Ok(())
    }

    pub fn force_poll_now(&self, id: SourceId) -> Result<(), PipelineError> {
        self.worker(id)?.force_poll();
        Ok(())
    }

    pub async fn set_reference_time(&self, id: SourceId, ts: &str) -> Result<(), PipelineError> {
        self.worker(id)?.set_reference_time(ts).await
    }

    pub fn worker_failed(&self, id: SourceId) -> Result<bool, PipelineError> {
        Ok(self.worker(id)?.failed())
    }

    /// Stop the health loop, then every worker, bounded by `timeout` each.
    /// The first worker that fails to stop is surfaced as a hard fault
    /// after the rest have been attempted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        if let Some(handle) = self
            .health_handle
            .lock()
            .expect("health handle mutex poisoned")
            .take()
        {
            handle.abort();
        }

        let mut first_fault = None;
        for worker in self.workers.values() {
            if let Err(e) = worker.stop(timeout).await {
                tracing::error!(target: "supervisor", error = %e, "worker failed to stop cleanly");
                first_fault.get_or_insert(e);
            }
        }
        tracing::info!(target: "supervisor", "shutdown complete");
        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

fn spawn_health_loop(workers: Vec<Arc<Worker>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let mut failed = 0usize;
            for worker in &workers {
                if worker.failed() {
                    failed += 1;
                    worker.reset().await;
                }
            }
            gauge!("pipeline_workers_failed").set(failed as f64);
        }
    })
}

#[async_trait]
impl BackfillSink for Supervisor {
    async fn request_historical(
        &self,
        source: SourceId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), PipelineError> {
        Supervisor::request_historical(self, source, start, end)
    }
}
