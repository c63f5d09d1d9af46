// src/lib.rs
// Public library surface for integration tests (and the binary).

pub mod api;
pub mod bucket;
pub mod config;
pub mod error;
pub mod gaps;
pub mod metrics;
pub mod reconciler;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::bucket::{Bucket, BucketLayout, Entry};
pub use crate::error::PipelineError;
pub use crate::source::{Record, RecordSet, SourceId};
