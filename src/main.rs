//! Gridwatt binary entrypoint.
//! Boots the acquisition pipeline (workers, supervisor, gap scanner,
//! reconciler) and the Axum operator API, then waits for ctrl-c and runs a
//! bounded shutdown.

mod api;
mod bucket;
mod config;
mod error;
mod gaps;
mod metrics;
mod reconciler;
mod source;
mod store;
mod supervisor;
mod worker;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::AppState;
use crate::bucket::BucketLayout;
use crate::config::PipelineConfig;
use crate::gaps::spawn_gap_scanner;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::source::feed::FeedSourceFactory;
use crate::source::SourceFactory;
use crate::store::{BucketStore, JsonFileBucketStore};
use crate::supervisor::Supervisor;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let metrics = Metrics::init();

    let layout = BucketLayout::default();
    let store: Arc<dyn BucketStore> = Arc::new(JsonFileBucketStore::new(&cfg.store_dir));
    let factory: Arc<dyn SourceFactory> = Arc::new(FeedSourceFactory::new(cfg.feed_endpoints()?));
    let ids = cfg.source_ids()?;

    let (tx, rx) = mpsc::channel(cfg.queue_capacity);
    let reconciler = Reconciler::new(Arc::clone(&store), layout, rx).spawn();
    let supervisor = Arc::new(Supervisor::start(&ids, factory, tx, cfg.supervisor()));

    let gap_scanner = cfg.gap_scan.enabled.then(|| {
        spawn_gap_scanner(
            layout,
            ids.clone(),
            Arc::clone(&store),
            Arc::clone(&supervisor) as Arc<dyn gaps::BackfillSink>,
            cfg.gap_scan_interval(),
        )
    });

    let state = AppState {
        supervisor: Arc::clone(&supervisor),
        store,
    };
    let app = api::create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, sources = ids.len(), "gridwatt up");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("ctrl-c received, shutting down");
        })
        .await
        .context("serving operator api")?;

    if let Some(handle) = gap_scanner {
        handle.abort();
    }
    supervisor.shutdown(cfg.stop_timeout()).await?;
    // Workers are stopped; nothing else will arrive on the queue.
    reconciler.abort();
    Ok(())
}
