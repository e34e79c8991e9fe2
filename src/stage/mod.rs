//! Remote processing stages.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  StageClient (trait)         StatusClient (trait)     │
//! │  run_stage(stage, input)     upload(id, payload)      │
//! │        │                     fetch_status(id)         │
//! │        └──────────┬──────────────┘                    │
//! │                   ▼                                   │
//! │           HttpStageClient  (reqwest)                  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use submission_pipeline::config::StageConfig;
//! use submission_pipeline::stage::{HttpStageClient, Stage, StageClient, StageInput};
//!
//! # async fn example() {
//! let client = HttpStageClient::from_config(&StageConfig::default());
//! let letter = client
//!     .run_stage(Stage::DraftLetter, StageInput::Transcript("I am worried about..."))
//!     .await
//!     .unwrap();
//! println!("{letter}");
//! # }
//! ```

pub mod client;
pub mod http;
pub mod status;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use client::{RemoteError, Stage, StageClient, StageError, StageInput};
pub use http::HttpStageClient;
pub use status::{RemoteSubmission, StatusClient};

// test-only re-exports so the pipeline tests can reach the doubles
// without naming the submodules.
#[cfg(test)]
pub use client::MockStageClient;
#[cfg(test)]
pub use status::ScriptedStatusClient;
