//! Pipeline orchestrator — drives a submission through the remote stages.
//!
//! [`PipelineOrchestrator`] is the only writer of a submission's status. It
//! runs in one of two modes, fixed at construction:
//!
//! # Direct mode
//!
//! ```text
//! run(id, payload)
//!   ├─ transcript missing?  → Transcribing → StageClient(transcribe)   ─┐
//!   ├─ → Greenpaper                                                     │ persist
//!   ├─ drafts missing?      → join(draftConsultation, draftLetter)     ─┤ then
//!   ├─ → Email                                                          │ broadcast
//!   └─ → Completed                                                     ─┘
//! ```
//!
//! # Polling mode
//!
//! ```text
//! run(id, payload)
//!   ├─ Queued + payload?  → StatusClient::upload → stamp uploadedAt
//!   ├─ never uploaded, no payload → InputMissing
//!   └─ every tick: fetch_status → validate → merge fields → persist/broadcast
//!        ├─ completed → done
//!        ├─ error     → RemoteFailed
//!        └─ transport failure → ignored until the next tick
//! ```
//!
//! Any failure after the record is loaded is written to the record
//! (`status = error`, `last_error`), persisted and broadcast before the run
//! returns it. Running the orchestrator again on the same identifier resumes
//! from the first stage without output.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, OrchestrationMode};
use crate::stage::{
    HttpStageClient, RemoteError, RemoteSubmission, Stage, StageClient, StageError, StageInput,
    StatusClient,
};
use crate::submission::{
    split_analysis, InvalidTransition, Payload, StoreError, SubmissionId, SubmissionRecord,
    SubmissionStatus, SubmissionStore,
};

use super::state::{InFlight, RunGuard, UpdateReceiver, UpdateSender};

/// Per-call limit used until [`PipelineOrchestrator::with_stage_timeout`] says otherwise.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Observed remote state that cannot be merged into the local record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconciliationError {
    #[error("unrecognised status value {0}")]
    UnknownStatus(String),

    #[error("status went backwards from {from} to {to}")]
    Regressed {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("server reported completed before both drafts were available")]
    IncompleteArtifacts,
}

/// Errors that can surface from a pipeline run.
///
/// All variants carry a human-readable description; the ones a run records
/// on the submission become its `last_error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The run needs the payload but none was supplied.
    #[error("the input for submission {0} is no longer available; please submit it again")]
    InputMissing(SubmissionId),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// The payload could not be handed to the server (polling mode).
    #[error("upload failed: {0}")]
    Upload(RemoteError),

    #[error("status reconciliation failed: {0}")]
    Reconciliation(#[from] ReconciliationError),

    /// The server reported `error` for the submission (polling mode).
    #[error("processing failed on the server: {0}")]
    RemoteFailed(String),

    #[error("submission {0} not found")]
    NotFound(SubmissionId),

    #[error("submission {0} is already being processed")]
    AlreadyRunning(SubmissionId),

    #[error("processing was cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal / unexpected error (e.g. tokio join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether this failure is written onto the submission record.
    fn is_recorded(&self) -> bool {
        matches!(
            self,
            PipelineError::InputMissing(_)
                | PipelineError::Stage(_)
                | PipelineError::Upload(_)
                | PipelineError::Reconciliation(_)
                | PipelineError::RemoteFailed(_)
                | PipelineError::Transition(_)
        )
    }
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Driver {
    Direct {
        stages: Arc<dyn StageClient>,
    },
    Polling {
        remote: Arc<dyn StatusClient>,
        interval: Duration,
    },
}

/// Drives submissions through the pipeline and owns every status write.
///
/// Cheap to clone; clones share the store, the in-flight registry and the
/// update stream.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use submission_pipeline::config::AppConfig;
/// use submission_pipeline::pipeline::PipelineOrchestrator;
/// use submission_pipeline::submission::{MemoryStore, Payload};
///
/// # async fn example() {
/// let config = AppConfig::default();
/// let orchestrator = PipelineOrchestrator::from_config(&config, Arc::new(MemoryStore::new()));
///
/// let payload = Payload::recording(std::fs::read("note.webm").unwrap(), &config.submission).unwrap();
/// let record = orchestrator.submit(payload).await.unwrap();
/// println!("{}", record.consultation_draft().unwrap_or_default());
/// # }
/// ```
#[derive(Clone)]
pub struct PipelineOrchestrator {
    driver: Driver,
    store: Arc<dyn SubmissionStore>,
    in_flight: InFlight,
    updates: UpdateSender,
    stage_timeout: Duration,
}

impl PipelineOrchestrator {
    /// The orchestrator calls each stage itself.
    pub fn direct(stages: Arc<dyn StageClient>, store: Arc<dyn SubmissionStore>) -> Self {
        Self::build(Driver::Direct { stages }, store)
    }

    /// The server runs the stages; the orchestrator uploads and polls every
    /// `interval`.
    pub fn polling(
        remote: Arc<dyn StatusClient>,
        store: Arc<dyn SubmissionStore>,
        interval: Duration,
    ) -> Self {
        Self::build(Driver::Polling { remote, interval }, store)
    }

    /// HTTP-backed orchestrator in the mode selected by `config.pipeline.mode`.
    pub fn from_config(config: &AppConfig, store: Arc<dyn SubmissionStore>) -> Self {
        let client = Arc::new(HttpStageClient::from_config(&config.stages));
        let orchestrator = match config.pipeline.mode {
            OrchestrationMode::Direct => Self::direct(client, store),
            OrchestrationMode::Polling => {
                Self::polling(client, store, config.pipeline.poll_interval())
            }
        };
        orchestrator
            .with_stage_timeout(config.stages.timeout())
            .with_event_capacity(config.pipeline.event_capacity)
    }

    fn build(driver: Driver, store: Arc<dyn SubmissionStore>) -> Self {
        let (updates, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            driver,
            store,
            in_flight: InFlight::new(),
            updates,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Limit on each stage call, upload and poll. Expiry is a stage failure
    /// (or, for polls, a skipped tick).
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Buffered updates per subscriber. Call before [`subscribe`](Self::subscribe).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.updates = broadcast::channel(capacity.max(1)).0;
        self
    }

    pub fn mode(&self) -> OrchestrationMode {
        match self.driver {
            Driver::Direct { .. } => OrchestrationMode::Direct,
            Driver::Polling { .. } => OrchestrationMode::Polling,
        }
    }

    /// Receive a record snapshot after every persisted write.
    pub fn subscribe(&self) -> UpdateReceiver {
        self.updates.subscribe()
    }

    /// The last persisted state of `id`.
    pub fn snapshot(&self, id: &SubmissionId) -> Result<SubmissionRecord, PipelineError> {
        self.load(id)
    }

    /// Whether a run for `id` is currently in flight.
    pub fn is_running(&self, id: &SubmissionId) -> bool {
        self.in_flight.contains(id)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Create and persist a fresh `Queued` record for `payload`.
    pub fn create(&self, payload: &Payload) -> Result<SubmissionRecord, PipelineError> {
        let record = SubmissionRecord::new(Some(payload.content_type().to_string()));
        self.commit(&record)?;
        log::info!(
            "pipeline: created submission {} ({}, {} bytes)",
            record.id(),
            payload.content_type(),
            payload.len()
        );
        Ok(record)
    }

    /// Create a record for `payload` and run it to a terminal state.
    pub async fn submit(&self, payload: Payload) -> Result<SubmissionRecord, PipelineError> {
        let record = self.create(&payload)?;
        self.run(record.id(), Some(payload)).await
    }

    /// Run (or retry, or resume) the submission `id`.
    ///
    /// * `completed` records are returned unchanged without any stage call.
    /// * `error` records are reset to `queued` and resume at the first stage
    ///   whose output is missing.
    /// * `payload` is only needed when the transcript is still missing
    ///   (direct mode) or to (re-)upload a queued submission (polling mode).
    pub async fn run(
        &self,
        id: SubmissionId,
        payload: Option<Payload>,
    ) -> Result<SubmissionRecord, PipelineError> {
        self.run_with_cancel(id, payload, CancellationToken::new())
            .await
    }

    /// [`run`](Self::run), stopping with [`PipelineError::Cancelled`] once
    /// `cancel` fires. A cancelled run leaves the last persisted state in
    /// place.
    pub async fn run_with_cancel(
        &self,
        id: SubmissionId,
        payload: Option<Payload>,
        cancel: CancellationToken,
    ) -> Result<SubmissionRecord, PipelineError> {
        let guard = self.claim(id)?;
        self.run_claimed(guard, payload, cancel).await
    }

    /// Run on a background task. The claim on `id` is taken before this
    /// returns, so a concurrent `run` for the same id is rejected at once.
    pub fn spawn_run(
        &self,
        id: SubmissionId,
        payload: Option<Payload>,
    ) -> Result<RunHandle, PipelineError> {
        let guard = self.claim(id)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = self.clone();
        let task = tokio::spawn(async move { this.run_claimed(guard, payload, token).await });
        Ok(RunHandle {
            id,
            cancel,
            task: Some(task),
        })
    }

    // -----------------------------------------------------------------------
    // Run driver
    // -----------------------------------------------------------------------

    fn claim(&self, id: SubmissionId) -> Result<RunGuard, PipelineError> {
        self.in_flight.try_claim(id).ok_or_else(|| {
            log::warn!("pipeline: rejected second run for {id}; one is already in flight");
            PipelineError::AlreadyRunning(id)
        })
    }

    async fn run_claimed(
        &self,
        guard: RunGuard,
        payload: Option<Payload>,
        cancel: CancellationToken,
    ) -> Result<SubmissionRecord, PipelineError> {
        let id = guard.id();
        let mut record = self.load(&id)?;

        match record.status() {
            SubmissionStatus::Completed => {
                log::debug!("pipeline: {id} already completed, nothing to do");
                return Ok(record);
            }
            SubmissionStatus::Error => {
                record.reset_for_retry();
                self.commit(&record)?;
                log::info!("pipeline: retrying {id} from the first unfinished stage");
            }
            status => log::debug!("pipeline: starting {id} at {status}"),
        }

        let outcome = match &self.driver {
            Driver::Direct { stages } => {
                self.drive_direct(&mut record, payload.as_ref(), stages.as_ref(), &cancel)
                    .await
            }
            Driver::Polling { remote, interval } => {
                self.drive_polling(
                    &mut record,
                    payload.as_ref(),
                    remote.as_ref(),
                    *interval,
                    &cancel,
                )
                .await
            }
        };

        match outcome {
            Ok(()) => {
                log::info!("pipeline: {id} completed");
                Ok(record)
            }
            Err(e) if e.is_recorded() => {
                log::error!("pipeline: {id} failed: {e}");
                record.fail(e.to_string());
                self.commit(&record)?;
                Err(e)
            }
            Err(PipelineError::Cancelled) => {
                log::info!("pipeline: {id} cancelled at {}", record.status());
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                log::error!("pipeline: {id} stopped: {e}");
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Direct mode
    // -----------------------------------------------------------------------

    async fn drive_direct(
        &self,
        record: &mut SubmissionRecord,
        payload: Option<&Payload>,
        stages: &dyn StageClient,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let id = record.id();

        // ── 1. Payload → transcript ──────────────────────────────────────
        if record.transcript().is_none() {
            self.advance(record, SubmissionStatus::Transcribing)?;
            let payload = payload.ok_or(PipelineError::InputMissing(id))?;

            let transcript = match payload {
                Payload::Text(text) => text.trim().to_string(),
                Payload::Audio {
                    bytes,
                    content_type,
                } => {
                    let input = StageInput::Audio {
                        bytes,
                        content_type,
                    };
                    self.call_stage(stages, Stage::Transcribe, input, cancel)
                        .await?
                }
            };
            log::debug!(
                "pipeline: {id} transcript ready ({} chars)",
                transcript.chars().count()
            );

            record.set_transcript(transcript);
            if !self.advance(record, SubmissionStatus::Greenpaper)? {
                self.commit(record)?;
            }
        } else {
            self.advance(record, SubmissionStatus::Greenpaper)?;
        }

        // ── 2. Transcript → both drafts (join) ───────────────────────────
        if !record.has_both_drafts() {
            let transcript = record
                .transcript()
                .map(str::to_owned)
                .ok_or(PipelineError::InputMissing(id))?;
            let need_consultation = record.consultation_draft().is_none();
            let need_letter = record.representative_letter().is_none();

            let consultation = async {
                if need_consultation {
                    self.draft_consultation(stages, &transcript, cancel)
                        .await
                        .map(Some)
                } else {
                    Ok(None)
                }
            };
            let letter = async {
                if need_letter {
                    let input = StageInput::Transcript(&transcript);
                    self.call_stage(stages, Stage::DraftLetter, input, cancel)
                        .await
                        .map(Some)
                } else {
                    Ok(None)
                }
            };

            // First failure drops (and so cancels) the sibling call; nothing
            // is stored unless both succeed.
            let (consultation, letter) = tokio::try_join!(consultation, letter)?;

            if let Some((analysis, draft)) = consultation {
                record.set_consultation(Some(analysis), draft);
            }
            if let Some(letter) = letter {
                record.set_representative_letter(letter);
            }
            if !self.advance(record, SubmissionStatus::Email)? {
                self.commit(record)?;
            }
        } else {
            self.advance(record, SubmissionStatus::Email)?;
        }

        // ── 3. Bookkeeping ───────────────────────────────────────────────
        if !record.has_both_drafts() {
            return Err(ReconciliationError::IncompleteArtifacts.into());
        }
        self.advance(record, SubmissionStatus::Completed)?;
        Ok(())
    }

    async fn draft_consultation(
        &self,
        stages: &dyn StageClient,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, String), PipelineError> {
        let input = StageInput::Transcript(transcript);
        let raw = self
            .call_stage(stages, Stage::DraftConsultation, input, cancel)
            .await?;
        split_analysis(&raw).ok_or_else(|| {
            StageError::new(
                Stage::DraftConsultation,
                RemoteError::Parse("expected a summary line followed by the draft".into()),
            )
            .into()
        })
    }

    async fn call_stage(
        &self,
        stages: &dyn StageClient,
        stage: Stage,
        input: StageInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        log::debug!("pipeline: calling {stage}");
        let call = tokio::time::timeout(self.stage_timeout, stages.run_stage(stage, input));

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = call => match result {
                Ok(Ok(body)) => body,
                Ok(Err(e)) => return Err(e.into()),
                Err(_elapsed) => return Err(StageError::new(stage, RemoteError::Timeout).into()),
            },
        };

        if body.trim().is_empty() {
            return Err(StageError::new(stage, RemoteError::EmptyBody).into());
        }
        log::debug!("pipeline: {stage} returned {} chars", body.chars().count());
        Ok(body)
    }

    // -----------------------------------------------------------------------
    // Polling mode
    // -----------------------------------------------------------------------

    async fn drive_polling(
        &self,
        record: &mut SubmissionRecord,
        payload: Option<&Payload>,
        remote: &dyn StatusClient,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let id = record.id();

        // A queued record is (re-)uploaded when the payload is at hand; a
        // record the server never accepted cannot be polled without one.
        let needs_upload =
            record.uploaded_at().is_none() || record.status() == SubmissionStatus::Queued;
        match payload {
            Some(payload) if needs_upload => {
                log::info!("pipeline: uploading {id} ({} bytes)", payload.len());
                let uploaded = tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    result = tokio::time::timeout(self.stage_timeout, remote.upload(&id, payload)) => result,
                };
                match uploaded {
                    Ok(Ok(accepted)) if accepted == id => {}
                    Ok(Ok(accepted)) => {
                        return Err(PipelineError::Upload(RemoteError::Parse(format!(
                            "server accepted the upload as {accepted}"
                        ))))
                    }
                    Ok(Err(e)) => return Err(PipelineError::Upload(e)),
                    Err(_elapsed) => return Err(PipelineError::Upload(RemoteError::Timeout)),
                }
                record.mark_uploaded();
                self.commit(record)?;
            }
            None if record.uploaded_at().is_none() => {
                return Err(PipelineError::InputMissing(id));
            }
            _ => {}
        }

        // One request outstanding at a time: the next tick is only awaited
        // after the previous poll has returned.
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = tokio::time::timeout(self.stage_timeout, remote.fetch_status(&id)) => result,
            };

            let observed = match polled {
                Ok(Ok(observed)) => observed,
                Ok(Err(e)) => {
                    log::warn!("pipeline: status poll for {id} failed ({e}); retrying next tick");
                    continue;
                }
                Err(_elapsed) => {
                    log::warn!("pipeline: status poll for {id} timed out; retrying next tick");
                    continue;
                }
            };

            if self.reconcile(record, observed)? {
                return Ok(());
            }
        }
    }

    /// Merge one observation; `Ok(true)` once the submission is completed.
    fn reconcile(
        &self,
        record: &mut SubmissionRecord,
        observed: RemoteSubmission,
    ) -> Result<bool, PipelineError> {
        let status = observed
            .parsed_status()
            .ok_or_else(|| ReconciliationError::UnknownStatus(observed.status.to_string()))?;

        if status == SubmissionStatus::Error {
            let message = observed
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "the server reported an error".to_string());
            return Err(PipelineError::RemoteFailed(message));
        }

        let current = record.status();
        if status.rank() < current.rank() {
            return Err(ReconciliationError::Regressed {
                from: current,
                to: status,
            }
            .into());
        }

        // A field is only taken once the observed status is past the stage
        // that produces it; earlier copies are dropped.
        let mut changed = false;
        if status.rank() >= SubmissionStatus::Greenpaper.rank() {
            if let Some(transcript) = observed.transcript {
                changed |= record.set_transcript(transcript);
            }
        } else if observed.transcript.is_some() {
            log::debug!("pipeline: ignoring transcript reported at {status}");
        }
        if status.rank() >= SubmissionStatus::Email.rank() {
            if let Some(draft) = observed.consultation_draft {
                changed |= record.set_consultation(observed.analysis, draft);
            }
            if let Some(letter) = observed.representative_letter {
                changed |= record.set_representative_letter(letter);
            }
        } else if observed.consultation_draft.is_some() || observed.representative_letter.is_some() {
            log::debug!("pipeline: ignoring drafts reported at {status}");
        }

        if status == SubmissionStatus::Completed && !record.has_both_drafts() {
            return Err(ReconciliationError::IncompleteArtifacts.into());
        }

        if status != current {
            record.advance_to(status)?;
            changed = true;
            log::info!("pipeline: {} {current} → {status} (observed)", record.id());
        }
        if changed {
            self.commit(record)?;
        }
        Ok(status == SubmissionStatus::Completed)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Move forward to `next` and persist. A no-op returning `false` when the
    /// record is already at or past `next`.
    fn advance(
        &self,
        record: &mut SubmissionRecord,
        next: SubmissionStatus,
    ) -> Result<bool, PipelineError> {
        let current = record.status();
        if current.rank() >= next.rank() {
            return Ok(false);
        }
        record.advance_to(next)?;
        self.commit(record)?;
        log::info!("pipeline: {} {current} → {next}", record.id());
        Ok(true)
    }

    /// Persist first, then notify.
    fn commit(&self, record: &SubmissionRecord) -> Result<(), PipelineError> {
        self.store.put(&record.id(), record)?;
        // No subscribers is not an error.
        let _ = self.updates.send(record.clone());
        Ok(())
    }

    fn load(&self, id: &SubmissionId) -> Result<SubmissionRecord, PipelineError> {
        self.store.get(id)?.ok_or(PipelineError::NotFound(*id))
    }
}

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// A run executing on a background task.
///
/// Dropping the handle cancels the run (e.g. when the view observing it is
/// torn down); the last persisted state stays in the store.
pub struct RunHandle {
    id: SubmissionId,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<SubmissionRecord, PipelineError>>>,
}

impl RunHandle {
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    /// Ask the run to stop at its next await point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the run's result.
    pub async fn join(mut self) -> Result<SubmissionRecord, PipelineError> {
        // Awaited in place so that dropping this future still cancels the run.
        let Some(task) = self.task.as_mut() else {
            return Err(PipelineError::Cancelled);
        };
        let result = task
            .await
            .unwrap_or_else(|e| Err(PipelineError::Internal(e.to_string())));
        self.task = None;
        result
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
