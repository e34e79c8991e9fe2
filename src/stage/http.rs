//! `HttpStageClient`: the stage host over HTTP.
//!
//! One client serves both orchestration modes: it implements
//! [`StageClient`] (the orchestrator calls each stage) and [`StatusClient`]
//! (the server runs the stages and is polled). All connection details come
//! from [`StageConfig`]; nothing is hardcoded.
//!
//! | Call                | Request                                   | Response             |
//! |---------------------|-------------------------------------------|----------------------|
//! | transcribe          | `POST transcribe_path`, raw audio bytes   | plain-text transcript|
//! | draft consultation  | `POST consultation_path`, `{transcript}`  | plain text           |
//! | draft letter        | `POST letter_path`, `{transcript}`        | plain text           |
//! | upload              | `POST upload_path/{id}`, raw bytes        | the accepted id      |
//! | status              | `GET status_path/{id}`                    | JSON projection      |

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode};

use super::client::{RemoteError, Stage, StageClient, StageError, StageInput};
use super::status::{RemoteSubmission, StatusClient};
use crate::config::StageConfig;
use crate::submission::{Payload, SubmissionId};

/// HTTP implementation of [`StageClient`] and [`StatusClient`].
pub struct HttpStageClient {
    client: reqwest::Client,
    config: StageConfig,
}

impl HttpStageClient {
    /// Build an `HttpStageClient` from application config.
    ///
    /// The HTTP client is pre-configured with the per-request timeout from
    /// `config.timeout_secs`. A default client is used as a last-resort
    /// fallback if the builder fails.
    pub fn from_config(config: &StageConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("stage: HTTP client builder failed ({e}); using defaults");
                reqwest::Client::new()
            });

        Self {
            client,
            config: config.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    fn stage_path(&self, stage: Stage) -> &str {
        match stage {
            Stage::Transcribe => &self.config.transcribe_path,
            Stage::DraftConsultation => &self.config.consultation_path,
            Stage::DraftLetter => &self.config.letter_path,
        }
    }

    /// Attach `Authorization: Bearer …` only when a non-empty key is set.
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.client.request(method, url);
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => req.bearer_auth(key),
            _ => req,
        }
    }

    async fn call(&self, stage: Stage, input: StageInput<'_>) -> Result<String, RemoteError> {
        let url = self.url(self.stage_path(stage));
        let req = match (stage, input) {
            (Stage::Transcribe, StageInput::Audio { bytes, content_type }) => self
                .request(Method::POST, &url)
                .header(CONTENT_TYPE, content_type)
                .body(bytes.to_vec()),
            (Stage::DraftConsultation | Stage::DraftLetter, StageInput::Transcript(transcript)) => {
                self.request(Method::POST, &url)
                    .json(&serde_json::json!({ "transcript": transcript }))
            }
            (stage, _) => {
                return Err(RemoteError::InvalidInput(format!(
                    "{stage} cannot take this kind of input"
                )))
            }
        };

        log::debug!("stage: POST {url} ({stage})");
        let response = req.send().await?;
        check_status(response.status())?;
        let body = response.text().await?;
        normalize_text(body)
    }
}

#[async_trait]
impl StageClient for HttpStageClient {
    async fn run_stage(&self, stage: Stage, input: StageInput<'_>) -> Result<String, StageError> {
        self.call(stage, input)
            .await
            .map_err(|cause| StageError::new(stage, cause))
    }
}

#[async_trait]
impl StatusClient for HttpStageClient {
    async fn upload(&self, id: &SubmissionId, payload: &Payload) -> Result<SubmissionId, RemoteError> {
        let url = format!("{}/{id}", self.url(&self.config.upload_path));
        log::debug!("stage: uploading {} bytes to {url}", payload.len());

        let response = self
            .request(Method::POST, &url)
            .header(CONTENT_TYPE, payload.content_type())
            .body(payload.as_bytes().to_vec())
            .send()
            .await?;
        check_status(response.status())?;
        let body = response.text().await?;
        parse_accepted_id(&body)
    }

    async fn fetch_status(&self, id: &SubmissionId) -> Result<RemoteSubmission, RemoteError> {
        let url = format!("{}/{id}", self.url(&self.config.status_path));
        let response = self.request(Method::GET, &url).send().await?;
        check_status(response.status())?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

/// `base` and `path` joined with exactly one slash.
fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn check_status(status: StatusCode) -> Result<(), RemoteError> {
    if status.is_success() {
        return Ok(());
    }
    Err(RemoteError::Status {
        code: status.as_u16(),
        reason: status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string(),
    })
}

/// The identifier named by an upload response: a bare id, a JSON string, or
/// an object with an `id` (or `submissionId`) field.
fn parse_accepted_id(body: &str) -> Result<SubmissionId, RemoteError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::Parse(
            "upload response did not name a submission".into(),
        ));
    }

    let raw = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::String(id)) => id,
        Ok(serde_json::Value::Object(fields)) => fields
            .get("id")
            .or_else(|| fields.get("submissionId"))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::Parse("upload response has no id field".into()))?,
        _ => trimmed.to_string(),
    };

    raw.trim().parse().map_err(|e| {
        RemoteError::Parse(format!("upload response {raw:?} is not a submission id: {e}"))
    })
}

fn normalize_text(body: String) -> Result<String, RemoteError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::EmptyBody);
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
