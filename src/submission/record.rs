//! The submission record and its status state machine.
//!
//! [`SubmissionRecord`] is the entity threaded through every pipeline stage.
//! Only the pipeline orchestrator mutates it; everybody else reads snapshots
//! (from the store or the update stream).
//!
//! ```text
//! Queued ──▶ Transcribing ──▶ Greenpaper ──▶ Email ──▶ Completed
//!   │             │               │            │
//!   └─────────────┴───────────────┴────────────┴──▶ Error
//! Error ──retry──▶ Queued
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SubmissionId
// ---------------------------------------------------------------------------

/// Opaque, globally unique submission identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubmissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for SubmissionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ---------------------------------------------------------------------------
// SubmissionStatus
// ---------------------------------------------------------------------------

/// Progress of a submission through the pipeline.
///
/// The non-error variants are totally ordered; `Completed` and `Error` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    /// Created, nothing has run yet.
    Queued,
    /// Stage 1: the payload is being turned into a transcript.
    Transcribing,
    /// Stage 2: consultation response and representative letter are drafting.
    Greenpaper,
    /// Both drafts exist; final bookkeeping.
    Email,
    /// Both artifacts are ready for review.
    Completed,
    /// The run stopped; `last_error` explains why.
    Error,
}

impl SubmissionStatus {
    /// The forward order every run follows.
    pub const ORDER: [SubmissionStatus; 5] = [
        SubmissionStatus::Queued,
        SubmissionStatus::Transcribing,
        SubmissionStatus::Greenpaper,
        SubmissionStatus::Email,
        SubmissionStatus::Completed,
    ];

    /// Position in [`ORDER`](Self::ORDER); `None` for `Error`.
    pub fn rank(self) -> Option<usize> {
        Self::ORDER.iter().position(|s| *s == self)
    }

    /// `true` for `Completed` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Error)
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// ```
    /// use submission_pipeline::submission::SubmissionStatus as S;
    ///
    /// assert!(S::Queued.can_transition_to(S::Greenpaper));
    /// assert!(S::Email.can_transition_to(S::Error));
    /// assert!(!S::Greenpaper.can_transition_to(S::Transcribing));
    /// assert!(!S::Completed.can_transition_to(S::Error));
    /// ```
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Transcribing => "transcribing",
            SubmissionStatus::Greenpaper => "greenpaper",
            SubmissionStatus::Email => "email",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Error => "error",
        }
    }

    /// Validate a raw wire value against the closed status set.
    ///
    /// Only exact (case-sensitive, whitespace-trimmed) wire names are
    /// accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "queued" => Some(SubmissionStatus::Queued),
            "transcribing" => Some(SubmissionStatus::Transcribing),
            "greenpaper" => Some(SubmissionStatus::Greenpaper),
            "email" => Some(SubmissionStatus::Email),
            "completed" => Some(SubmissionStatus::Completed),
            "error" => Some(SubmissionStatus::Error),
            _ => None,
        }
    }

    /// Short human-readable label for progress displays.
    pub fn label(self) -> &'static str {
        match self {
            SubmissionStatus::Queued => "Queued",
            SubmissionStatus::Transcribing => "Transcribing your audio",
            SubmissionStatus::Greenpaper => "Preparing submissions",
            SubmissionStatus::Email => "Finalising",
            SubmissionStatus::Completed => "Processing complete",
            SubmissionStatus::Error => "Processing error",
        }
    }

    /// Progress percentage for a progress bar.
    ///
    /// `None` for `Error`: the display keeps whatever it last showed.
    pub fn progress(self) -> Option<u8> {
        match self {
            SubmissionStatus::Queued => Some(0),
            SubmissionStatus::Transcribing => Some(10),
            SubmissionStatus::Greenpaper => Some(30),
            SubmissionStatus::Email => Some(90),
            SubmissionStatus::Completed => Some(100),
            SubmissionStatus::Error => None,
        }
    }

    /// How `step` should be drawn while the submission is at `self`.
    pub fn step_state(self, step: SubmissionStatus) -> StepState {
        if self == SubmissionStatus::Completed {
            return StepState::Completed;
        }
        match (step.rank(), self.rank()) {
            (Some(step), Some(current)) if step < current => StepState::Completed,
            (Some(step), Some(current)) if step == current => StepState::InProgress,
            _ => StepState::Waiting,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display state of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Waiting,
    InProgress,
    Completed,
}

// ---------------------------------------------------------------------------
// InvalidTransition
// ---------------------------------------------------------------------------

/// A status write that would break the forward-only ordering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal status transition {from} → {to}")]
pub struct InvalidTransition {
    pub from: SubmissionStatus,
    pub to: SubmissionStatus,
}

// ---------------------------------------------------------------------------
// SubmissionRecord
// ---------------------------------------------------------------------------

/// One user-initiated unit of work and everything produced for it so far.
///
/// This is also the persisted projection: the raw payload is never part of
/// the record, it is handed to the orchestrator per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    id: SubmissionId,
    status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    consultation_draft: Option<String>,
    #[serde(default)]
    representative_letter: Option<String>,
    created_at: DateTime<Utc>,
    /// When the server accepted the payload (polling mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_error: Option<String>,
}

impl SubmissionRecord {
    /// A fresh `Queued` record with a new identifier.
    pub fn new(content_type: Option<String>) -> Self {
        Self::with_id(SubmissionId::new(), content_type)
    }

    /// A fresh `Queued` record under a caller-chosen identifier.
    pub fn with_id(id: SubmissionId, content_type: Option<String>) -> Self {
        Self {
            id,
            status: SubmissionStatus::Queued,
            content_type,
            transcript: None,
            analysis: None,
            consultation_draft: None,
            representative_letter: None,
            created_at: Utc::now(),
            uploaded_at: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    /// Declared content type of the payload this record was created for.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    /// Short summary taken from the consultation stage.
    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    pub fn consultation_draft(&self) -> Option<&str> {
        self.consultation_draft.as_deref()
    }

    pub fn representative_letter(&self) -> Option<&str> {
        self.representative_letter.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Set once the server has accepted the payload for this record.
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        self.uploaded_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Both downstream artifacts are present and non-empty.
    pub fn has_both_drafts(&self) -> bool {
        non_empty(&self.consultation_draft) && non_empty(&self.representative_letter)
    }

    // -----------------------------------------------------------------------
    // Orchestrator-only mutation
    // -----------------------------------------------------------------------

    pub(crate) fn advance_to(&mut self, next: SubmissionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Move to `Error` with a non-empty message. Returns `false` (and leaves
    /// the record untouched) when it is already terminal.
    pub(crate) fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let message = message.into();
        self.last_error = Some(if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message
        });
        self.status = SubmissionStatus::Error;
        true
    }

    /// Re-enter the pipeline after an error, keeping every populated field.
    pub(crate) fn reset_for_retry(&mut self) -> bool {
        if self.status != SubmissionStatus::Error {
            return false;
        }
        self.status = SubmissionStatus::Queued;
        self.last_error = None;
        true
    }

    /// Stamp the upload time; a re-upload moves the stamp forward.
    pub(crate) fn mark_uploaded(&mut self) {
        self.uploaded_at = Some(Utc::now());
    }

    /// Populated fields are never overwritten; returns whether anything changed.
    pub(crate) fn set_transcript(&mut self, transcript: String) -> bool {
        fill(&mut self.transcript, Some(transcript))
    }

    pub(crate) fn set_consultation(&mut self, analysis: Option<String>, draft: String) -> bool {
        let draft_set = fill(&mut self.consultation_draft, Some(draft));
        let analysis_set = fill(&mut self.analysis, analysis);
        draft_set || analysis_set
    }

    pub(crate) fn set_representative_letter(&mut self, letter: String) -> bool {
        fill(&mut self.representative_letter, Some(letter))
    }
}

fn non_empty(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn fill(slot: &mut Option<String>, value: Option<String>) -> bool {
    match value {
        Some(value) if slot.is_none() && !value.trim().is_empty() => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}

/// Split a raw consultation-stage response into `(analysis, draft)`.
///
/// The first line is the short analysis summary, the rest is the draft body.
/// Returns `None` when there is no non-blank body after the first line.
pub fn split_analysis(raw: &str) -> Option<(String, String)> {
    let (first, rest) = raw.split_once('\n')?;
    if rest.trim().is_empty() {
        return None;
    }
    Some((first.trim_end_matches('\r').to_string(), rest.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use SubmissionStatus as S;

    #[test]
    fn forward_transitions_are_legal() {
        for (i, from) in S::ORDER.iter().enumerate() {
            for to in &S::ORDER[i + 1..] {
                if *from != S::Completed {
                    assert!(from.can_transition_to(*to), "{from} → {to}");
                }
            }
        }
    }

    #[test]
    fn backward_and_same_transitions_are_illegal() {
        assert!(!S::Greenpaper.can_transition_to(S::Transcribing));
        assert!(!S::Email.can_transition_to(S::Queued));
        assert!(!S::Transcribing.can_transition_to(S::Transcribing));
    }

    #[test]
    fn error_reachable_from_every_non_terminal_state() {
        for s in [S::Queued, S::Transcribing, S::Greenpaper, S::Email] {
            assert!(s.can_transition_to(S::Error));
        }
        assert!(!S::Completed.can_transition_to(S::Error));
        assert!(!S::Error.can_transition_to(S::Error));
    }

    #[test]
    fn parse_accepts_only_known_values() {
        assert_eq!(S::parse("greenpaper"), Some(S::Greenpaper));
        assert_eq!(S::parse(" completed\n"), Some(S::Completed));
        assert_eq!(S::parse("Completed"), None);
        assert_eq!(S::parse("preparing"), None);
        assert_eq!(S::parse(""), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        for s in S::ORDER.iter().copied().chain([S::Error]) {
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
        }
    }

    #[test]
    fn progress_values() {
        assert_eq!(S::Queued.progress(), Some(0));
        assert_eq!(S::Transcribing.progress(), Some(10));
        assert_eq!(S::Greenpaper.progress(), Some(30));
        assert_eq!(S::Completed.progress(), Some(100));
        assert_eq!(S::Error.progress(), None);
    }

    #[test]
    fn step_state_follows_order() {
        assert_eq!(S::Greenpaper.step_state(S::Transcribing), StepState::Completed);
        assert_eq!(S::Greenpaper.step_state(S::Greenpaper), StepState::InProgress);
        assert_eq!(S::Greenpaper.step_state(S::Email), StepState::Waiting);
        assert_eq!(S::Completed.step_state(S::Completed), StepState::Completed);
        assert_eq!(S::Error.step_state(S::Transcribing), StepState::Waiting);
    }

    #[test]
    fn new_record_is_queued_and_empty() {
        let record = SubmissionRecord::new(Some("audio/webm".into()));
        assert_eq!(record.status(), S::Queued);
        assert_eq!(record.content_type(), Some("audio/webm"));
        assert!(record.transcript().is_none());
        assert!(record.consultation_draft().is_none());
        assert!(record.last_error().is_none());
        assert!(!record.has_both_drafts());
    }

    #[test]
    fn advance_rejects_regression() {
        let mut record = SubmissionRecord::new(None);
        record.advance_to(S::Greenpaper).unwrap();
        let err = record.advance_to(S::Transcribing).unwrap_err();
        assert_eq!(err.from, S::Greenpaper);
        assert_eq!(err.to, S::Transcribing);
        assert_eq!(record.status(), S::Greenpaper);
    }

    #[test]
    fn fail_sets_non_empty_message_and_is_terminal() {
        let mut record = SubmissionRecord::new(None);
        assert!(record.fail(""));
        assert_eq!(record.status(), S::Error);
        assert_eq!(record.last_error(), Some("unknown error"));
        assert!(!record.fail("again"));
        assert_eq!(record.last_error(), Some("unknown error"));
    }

    #[test]
    fn completed_record_cannot_fail() {
        let mut record = SubmissionRecord::new(None);
        record.advance_to(S::Completed).unwrap();
        assert!(!record.fail("late failure"));
        assert_eq!(record.status(), S::Completed);
        assert!(record.last_error().is_none());
    }

    #[test]
    fn retry_keeps_populated_fields() {
        let mut record = SubmissionRecord::new(None);
        record.set_transcript("hello".into());
        record.advance_to(S::Greenpaper).unwrap();
        record.fail("letter stage down");

        assert!(record.reset_for_retry());
        assert_eq!(record.status(), S::Queued);
        assert_eq!(record.transcript(), Some("hello"));
        assert!(record.last_error().is_none());
        assert!(!record.reset_for_retry());
    }

    #[test]
    fn populated_fields_are_never_overwritten() {
        let mut record = SubmissionRecord::new(None);
        assert!(record.set_transcript("first".into()));
        assert!(!record.set_transcript("second".into()));
        assert_eq!(record.transcript(), Some("first"));
        assert!(!record.set_representative_letter("   ".into()));
        assert!(record.representative_letter().is_none());
    }

    #[test]
    fn split_analysis_takes_first_line() {
        let (analysis, draft) =
            split_analysis("Emotion Summary: concerned\r\nDear DWP,\nI am writing").unwrap();
        assert_eq!(analysis, "Emotion Summary: concerned");
        assert_eq!(draft, "Dear DWP,\nI am writing");
    }

    #[test]
    fn split_analysis_rejects_missing_body() {
        assert!(split_analysis("only one line").is_none());
        assert!(split_analysis("summary\n   \n").is_none());
    }

    #[test]
    fn json_projection_uses_camel_case_and_has_no_payload() {
        let record = SubmissionRecord::new(Some("audio/wav".into()));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "queued");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("consultationDraft").is_some());
        assert!(value.get("representativeLetter").is_some());
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn upload_marker_survives_retry_and_storage() {
        let mut record = SubmissionRecord::new(Some("audio/webm".into()));
        assert!(record.uploaded_at().is_none());
        assert!(serde_json::to_value(&record).unwrap().get("uploadedAt").is_none());

        record.mark_uploaded();
        record.fail("server error");
        record.reset_for_retry();
        assert!(record.uploaded_at().is_some());

        let json = serde_json::to_string(&record).unwrap();
        let back: SubmissionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.uploaded_at(), record.uploaded_at());
    }

    #[test]
    fn submission_id_round_trips_through_display() {
        let id = SubmissionId::new();
        let parsed: SubmissionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SubmissionId>().is_err());
    }
}
