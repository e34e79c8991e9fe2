//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the stage host,
//! the orchestrator, payload limits and the session store, `AppPaths` for
//! cross-platform directories, and TOML persistence via `AppConfig::load` /
//! `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, OrchestrationMode, PipelineConfig, StageConfig, StoreConfig, SubmissionConfig,
};
