//! Server-side execution: upload once, then poll authoritative status.
//!
//! [`StatusClient`] is the seam used by the orchestrator's polling mode. The
//! wire projection [`RemoteSubmission`] keeps `status` as an untyped JSON
//! value so it can be validated against the closed status set on ingestion
//! rather than trusted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::RemoteError;
use crate::submission::{Payload, SubmissionId, SubmissionStatus};

/// Submission projection as reported by the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSubmission {
    /// Raw status value; see [`RemoteSubmission::parsed_status`].
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default, alias = "emotionalAnalysis")]
    pub analysis: Option<String>,
    #[serde(default, alias = "greenpaper")]
    pub consultation_draft: Option<String>,
    #[serde(default, alias = "email")]
    pub representative_letter: Option<String>,
    #[serde(default, alias = "lastError")]
    pub error: Option<String>,
}

impl RemoteSubmission {
    /// A bare projection carrying only `status`.
    pub fn with_status(status: &str) -> Self {
        Self {
            status: serde_json::Value::String(status.to_string()),
            ..Self::default()
        }
    }

    /// The status if it is a string naming a known status.
    pub fn parsed_status(&self) -> Option<SubmissionStatus> {
        self.status.as_str().and_then(SubmissionStatus::parse)
    }
}

/// Upload and status endpoints of a server that runs the pipeline itself.
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Hand the raw payload to the server under `id`; returns the identifier
    /// the server accepted it under.
    async fn upload(&self, id: &SubmissionId, payload: &Payload) -> Result<SubmissionId, RemoteError>;

    /// Fetch the authoritative projection for `id`.
    async fn fetch_status(&self, id: &SubmissionId) -> Result<RemoteSubmission, RemoteError>;
}

#[cfg(test)]
pub use scripted::ScriptedStatusClient;

#[cfg(test)]
mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays a fixed sequence of poll results; the last one repeats.
    pub struct ScriptedStatusClient {
        polls: Mutex<VecDeque<Result<RemoteSubmission, RemoteError>>>,
        last: Mutex<Option<Result<RemoteSubmission, RemoteError>>>,
        upload_result: Result<Option<SubmissionId>, RemoteError>,
        uploads: Mutex<Vec<SubmissionId>>,
        poll_count: Mutex<usize>,
    }

    impl ScriptedStatusClient {
        pub fn new(polls: Vec<Result<RemoteSubmission, RemoteError>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                last: Mutex::new(None),
                upload_result: Ok(None),
                uploads: Mutex::new(Vec::new()),
                poll_count: Mutex::new(0),
            }
        }

        /// Shorthand for a script of plain statuses.
        pub fn statuses(statuses: &[&str]) -> Self {
            Self::new(
                statuses
                    .iter()
                    .map(|s| Ok(RemoteSubmission::with_status(s)))
                    .collect(),
            )
        }

        pub fn failing_upload(mut self, cause: RemoteError) -> Self {
            self.upload_result = Err(cause);
            self
        }

        /// Accept uploads under `accepted` instead of the requested id.
        pub fn accepting_as(mut self, accepted: SubmissionId) -> Self {
            self.upload_result = Ok(Some(accepted));
            self
        }

        pub fn uploads(&self) -> Vec<SubmissionId> {
            self.uploads.lock().unwrap().clone()
        }

        pub fn poll_count(&self) -> usize {
            *self.poll_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl StatusClient for ScriptedStatusClient {
        async fn upload(
            &self,
            id: &SubmissionId,
            _payload: &Payload,
        ) -> Result<SubmissionId, RemoteError> {
            self.uploads.lock().unwrap().push(*id);
            self.upload_result.clone().map(|accepted| accepted.unwrap_or(*id))
        }

        async fn fetch_status(&self, _id: &SubmissionId) -> Result<RemoteSubmission, RemoteError> {
            *self.poll_count.lock().unwrap() += 1;
            let next = self.polls.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(result) => {
                    *last = Some(result.clone());
                    result
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(RemoteError::Request("nothing scripted".into()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_status_and_aliases() {
        let json = r#"{
            "status": "greenpaper",
            "transcript": "hello",
            "emotionalAnalysis": "calm",
            "greenpaper": "Dear DWP",
            "email": "Dear MP"
        }"#;
        let remote: RemoteSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(remote.parsed_status(), Some(SubmissionStatus::Greenpaper));
        assert_eq!(remote.analysis.as_deref(), Some("calm"));
        assert_eq!(remote.consultation_draft.as_deref(), Some("Dear DWP"));
        assert_eq!(remote.representative_letter.as_deref(), Some("Dear MP"));
    }

    #[test]
    fn non_string_or_unknown_status_is_unparsed() {
        let numeric: RemoteSubmission = serde_json::from_str(r#"{"status": 3}"#).unwrap();
        assert_eq!(numeric.parsed_status(), None);

        let unknown: RemoteSubmission = serde_json::from_str(r#"{"status": "preparing"}"#).unwrap();
        assert_eq!(unknown.parsed_status(), None);

        let missing: RemoteSubmission = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.parsed_status(), None);
    }
}
