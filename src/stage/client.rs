//! Core `StageClient` trait and the stage error types.
//!
//! # Overview
//!
//! [`StageClient`] is the request/response boundary the orchestrator uses to
//! invoke a remote processing stage. It is object-safe and `Send + Sync` so it
//! can be held behind an `Arc<dyn StageClient>`.
//!
//! A stage client never retries and never touches the submission record:
//! retry policy and record updates belong to the orchestrator.
//!
//! [`MockStageClient`] (available under `#[cfg(test)]`) returns pre-configured
//! responses and counts calls, for unit-testing the pipeline without a server.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One remote processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Audio → transcript.
    Transcribe,
    /// Transcript → analysis line + formal consultation response.
    DraftConsultation,
    /// Transcript → letter to the representative.
    DraftLetter,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::DraftConsultation => "draftConsultation",
            Stage::DraftLetter => "draftLetter",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage is fed.
#[derive(Debug, Clone, Copy)]
pub enum StageInput<'a> {
    /// Raw audio for [`Stage::Transcribe`].
    Audio {
        bytes: &'a [u8],
        content_type: &'a str,
    },
    /// The transcript, for the drafting stages.
    Transcript(&'a str),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to the stage host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The call did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx response.
    #[error("server responded {code}: {reason}")]
    Status { code: u16, reason: String },

    /// 2xx response with nothing usable in it.
    #[error("response body was empty")]
    EmptyBody,

    /// The body did not have the expected shape.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The stage was handed input it cannot process.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Parse(e.to_string())
        } else {
            RemoteError::Request(e.to_string())
        }
    }
}

/// A stage call failed; carries the originating stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed: {cause}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub cause: RemoteError,
}

impl StageError {
    pub fn new(stage: Stage, cause: RemoteError) -> Self {
        Self { stage, cause }
    }
}

// ---------------------------------------------------------------------------
// StageClient trait
// ---------------------------------------------------------------------------

/// Invoke one named stage and normalise its result.
///
/// # Contract
///
/// - Returns the trimmed, non-empty text body on success.
/// - Returns `Err(StageError)` on non-2xx, network failure, timeout, or an
///   empty/invalid body. Never retries internally.
#[async_trait]
pub trait StageClient: Send + Sync {
    async fn run_stage(&self, stage: Stage, input: StageInput<'_>) -> Result<String, StageError>;
}

// Compile-time assertion: Box<dyn StageClient> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn StageClient>) {}
};

// ---------------------------------------------------------------------------
// MockStageClient (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockStageClient;

#[cfg(test)]
mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Stage client with canned per-stage results.
    ///
    /// Every stage succeeds by default; override with [`respond`], [`fail`]
    /// and [`delay`].
    ///
    /// [`respond`]: MockStageClient::respond
    /// [`fail`]: MockStageClient::fail
    /// [`delay`]: MockStageClient::delay
    pub struct MockStageClient {
        responses: HashMap<Stage, Result<String, RemoteError>>,
        delays: HashMap<Stage, Duration>,
        calls: Mutex<Vec<Stage>>,
    }

    impl MockStageClient {
        pub fn new() -> Self {
            let responses = HashMap::from([
                (Stage::Transcribe, Ok("I am concerned about...".to_string())),
                (
                    Stage::DraftConsultation,
                    Ok("The speaker appeared concerned.\nDear DWP,\nI am writing...".to_string()),
                ),
                (
                    Stage::DraftLetter,
                    Ok("Dear MP,\nPlease read my concerns.".to_string()),
                ),
            ]);
            Self {
                responses,
                delays: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn respond(mut self, stage: Stage, body: &str) -> Self {
            self.responses.insert(stage, Ok(body.to_string()));
            self
        }

        pub fn fail(mut self, stage: Stage, cause: RemoteError) -> Self {
            self.responses.insert(stage, Err(cause));
            self
        }

        pub fn delay(mut self, stage: Stage, delay: Duration) -> Self {
            self.delays.insert(stage, delay);
            self
        }

        /// Stages invoked so far, in call order.
        pub fn calls(&self) -> Vec<Stage> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, stage: Stage) -> usize {
            self.calls().iter().filter(|s| **s == stage).count()
        }
    }

    #[async_trait]
    impl StageClient for MockStageClient {
        async fn run_stage(
            &self,
            stage: Stage,
            _input: StageInput<'_>,
        ) -> Result<String, StageError> {
            self.calls.lock().unwrap().push(stage);
            if let Some(delay) = self.delays.get(&stage) {
                tokio::time::sleep(*delay).await;
            }
            match self.responses.get(&stage) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(cause)) => Err(StageError::new(stage, cause.clone())),
                None => Err(StageError::new(stage, RemoteError::EmptyBody)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_message_names_stage_and_cause() {
        let err = StageError::new(
            Stage::Transcribe,
            RemoteError::Status {
                code: 502,
                reason: "Bad Gateway".into(),
            },
        );
        assert_eq!(err.to_string(), "transcribe failed: server responded 502: Bad Gateway");
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::DraftConsultation.to_string(), "draftConsultation");
        assert_eq!(Stage::DraftLetter.as_str(), "draftLetter");
    }

    #[tokio::test]
    async fn mock_records_calls_and_failures() {
        let mock = MockStageClient::new().fail(Stage::DraftLetter, RemoteError::Timeout);

        let ok = mock
            .run_stage(Stage::Transcribe, StageInput::Transcript("x"))
            .await
            .unwrap();
        assert_eq!(ok, "I am concerned about...");

        let err = mock
            .run_stage(Stage::DraftLetter, StageInput::Transcript("x"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::DraftLetter);
        assert_eq!(err.cause, RemoteError::Timeout);
        assert_eq!(mock.calls(), vec![Stage::Transcribe, Stage::DraftLetter]);
    }
}
