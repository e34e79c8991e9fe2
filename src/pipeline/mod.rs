//! Pipeline orchestrator module.
//!
//! This module drives a submission from payload to both drafts and exposes
//! the update stream that views read while a run is in progress.
//!
//! # Architecture
//!
//! ```text
//! Payload ──► PipelineOrchestrator::submit / run / spawn_run
//!                    │
//!                    ├─ InFlight::try_claim(id)        (one run per id)
//!                    │
//!                    ├─ Direct:  StageClient × 3        ─┐
//!                    └─ Polling: StatusClient upload/poll─┤
//!                                                         ▼
//!                             SubmissionStore::put(record)
//!                                                         │
//!                             broadcast::Sender<SubmissionRecord> ──► subscribers
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use submission_pipeline::config::AppConfig;
//! use submission_pipeline::pipeline::PipelineOrchestrator;
//! use submission_pipeline::submission::{MemoryStore, Payload};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let orchestrator = PipelineOrchestrator::from_config(&config, Arc::new(MemoryStore::new()));
//!
//!     let mut updates = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(record) = updates.recv().await {
//!             println!("{} {}", record.id(), record.status().label());
//!         }
//!     });
//!
//!     let payload = Payload::text("I am worried about the changes", &config.submission).unwrap();
//!     let record = orchestrator.submit(payload).await.unwrap();
//!     println!("{}", record.representative_letter().unwrap_or_default());
//! }
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{
    PipelineError, PipelineOrchestrator, ReconciliationError, RunHandle, DEFAULT_STAGE_TIMEOUT,
};
pub use state::{InFlight, RunGuard, UpdateReceiver, UpdateSender};
