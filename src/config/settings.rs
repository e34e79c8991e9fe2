//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Missing keys fall back to their defaults, so a partial `settings.toml`
//! is valid.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// OrchestrationMode
// ---------------------------------------------------------------------------

/// How the orchestrator keeps the local record in step with the stages.
///
/// | Variant | Who runs the stages         | What the orchestrator does          |
/// |---------|-----------------------------|-------------------------------------|
/// | Direct  | the orchestrator            | calls each stage in order           |
/// | Polling | the server, after an upload | polls status and reconciles locally |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationMode {
    Direct,
    Polling,
}

impl Default for OrchestrationMode {
    fn default() -> Self {
        Self::Direct
    }
}

// ---------------------------------------------------------------------------
// StageConfig
// ---------------------------------------------------------------------------

/// Where the stage host lives and how to reach each endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Base URL of the stage host, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Bearer token sent with every request when set and non-empty.
    pub api_key: Option<String>,
    /// Maximum seconds a single stage call (or poll) may take.
    pub timeout_secs: u64,
    pub transcribe_path: String,
    pub consultation_path: String,
    pub letter_path: String,
    /// Upload endpoint; the submission id is appended as a path segment.
    pub upload_path: String,
    /// Status endpoint; the submission id is appended as a path segment.
    pub status_path: String,
}

impl StageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_key: None,
            timeout_secs: 120,
            transcribe_path: "/api/transcribe".into(),
            consultation_path: "/api/greenpaper".into(),
            letter_path: "/api/mpemail".into(),
            upload_path: "/upload".into(),
            status_path: "/status".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Orchestrator behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Selected reconciliation mode.
    pub mode: OrchestrationMode,
    /// Milliseconds between status polls (polling mode only).
    pub poll_interval_ms: u64,
    /// Buffered updates per subscriber before slow readers start lagging.
    pub event_capacity: usize,
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: OrchestrationMode::default(),
            poll_interval_ms: 2_000,
            event_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// SubmissionConfig
// ---------------------------------------------------------------------------

/// Limits applied when a payload is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Upper bound on words in a typed submission.
    pub max_text_words: usize,
    /// Upper bound on audio size in bytes.
    pub max_payload_bytes: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_text_words: 3_000,
            max_payload_bytes: 50 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Where submission records are kept for the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Session directory for `DirStore`; `None` keeps records in memory.
    pub session_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use submission_pipeline::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Stage host connection settings.
    pub stages: StageConfig,
    /// Orchestrator settings.
    pub pipeline: PipelineConfig,
    /// Payload limits.
    pub submission: SubmissionConfig,
    /// Session store settings.
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet so
    /// callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
