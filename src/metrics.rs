use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time series registration (so everything shows up on /metrics).
pub fn ensure_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_fetch_total", "Poll-loop fetch attempts.");
        describe_counter!(
            "pipeline_fetch_errors_total",
            "Fetch failures contained at the worker boundary."
        );
        describe_counter!(
            "pipeline_records_queued_total",
            "Records handed to the reconciler queue."
        );
        describe_counter!(
            "pipeline_backfill_requests_total",
            "Backfill tasks spawned on workers."
        );
        describe_counter!(
            "pipeline_gap_requests_total",
            "Backfills requested by the gap scanner."
        );
        describe_counter!(
            "pipeline_worker_resets_total",
            "Failed workers reset by the health loop."
        );
        describe_counter!("pipeline_upserts_total", "Hour slots written to the store.");
        describe_counter!(
            "pipeline_upsert_skips_total",
            "Hour slots skipped because they already exist (idempotent no-op)."
        );
        describe_counter!(
            "pipeline_storage_errors_total",
            "Storage failures contained at the reconciler."
        );
        describe_gauge!(
            "pipeline_workers_failed",
            "Workers observed failed in the last health-check cycle."
        );
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_pipeline_metrics();
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
