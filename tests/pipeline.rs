//! End-to-end runs through the public API with in-process stage hosts and an
//! on-disk session store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use submission_pipeline::config::{AppConfig, SubmissionConfig};
use submission_pipeline::pipeline::{PipelineError, PipelineOrchestrator};
use submission_pipeline::stage::{
    RemoteError, RemoteSubmission, Stage, StageClient, StageError, StageInput, StatusClient,
};
use submission_pipeline::submission::{
    DirStore, Payload, SubmissionId, SubmissionStatus, SubmissionStore,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Drafts derived from the transcript so the output can be traced back.
#[derive(Default)]
struct EchoStages {
    fail_letter: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl StageClient for EchoStages {
    async fn run_stage(&self, stage: Stage, input: StageInput<'_>) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (stage, input) {
            (Stage::Transcribe, StageInput::Audio { bytes, .. }) => {
                Ok(format!("heard {} bytes", bytes.len()))
            }
            (Stage::DraftConsultation, StageInput::Transcript(t)) => {
                Ok(format!("Worried tone\nResponse about: {t}"))
            }
            (Stage::DraftLetter, StageInput::Transcript(_)) if self.fail_letter => Err(
                StageError::new(stage, RemoteError::Request("connection refused".into())),
            ),
            (Stage::DraftLetter, StageInput::Transcript(t)) => Ok(format!("Dear MP, {t}")),
            (stage, _) => Err(StageError::new(
                stage,
                RemoteError::InvalidInput("unexpected input".into()),
            )),
        }
    }
}

/// A server that advances one status per poll and fills fields as it goes.
struct SteppingServer {
    polls: Mutex<usize>,
    uploaded: Mutex<Option<SubmissionId>>,
}

impl SteppingServer {
    fn new() -> Self {
        Self {
            polls: Mutex::new(0),
            uploaded: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StatusClient for SteppingServer {
    async fn upload(&self, id: &SubmissionId, _payload: &Payload) -> Result<SubmissionId, RemoteError> {
        *self.uploaded.lock().unwrap() = Some(*id);
        Ok(*id)
    }

    async fn fetch_status(&self, id: &SubmissionId) -> Result<RemoteSubmission, RemoteError> {
        if *self.uploaded.lock().unwrap() != Some(*id) {
            return Err(RemoteError::Status {
                code: 404,
                reason: "Not Found".into(),
            });
        }
        let mut polls = self.polls.lock().unwrap();
        *polls += 1;
        let mut observed = match *polls {
            1 => RemoteSubmission::with_status("queued"),
            2 => RemoteSubmission::with_status("transcribing"),
            3 => RemoteSubmission::with_status("greenpaper"),
            4 => RemoteSubmission::with_status("email"),
            _ => RemoteSubmission::with_status("completed"),
        };
        if *polls >= 3 {
            observed.transcript = Some("spoken words".into());
        }
        if *polls >= 4 {
            observed.analysis = Some("Calm".into());
            observed.consultation_draft = Some("Formal response".into());
            observed.representative_letter = Some("Dear MP".into());
        }
        Ok(observed)
    }
}

fn recording() -> Payload {
    Payload::recording(vec![0u8; 2048], &SubmissionConfig::default()).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_run_persists_completed_record() {
    let dir = tempdir().unwrap();
    let store = Arc::new(DirStore::open(dir.path()).unwrap());
    let orchestrator = PipelineOrchestrator::direct(Arc::new(EchoStages::default()), store.clone());

    let record = orchestrator.submit(recording()).await.unwrap();

    assert_eq!(record.status(), SubmissionStatus::Completed);
    assert_eq!(record.transcript(), Some("heard 2048 bytes"));
    assert_eq!(record.analysis(), Some("Worried tone"));
    assert_eq!(record.consultation_draft(), Some("Response about: heard 2048 bytes"));
    assert_eq!(record.representative_letter(), Some("Dear MP, heard 2048 bytes"));

    let reopened = DirStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get(&record.id()).unwrap(), Some(record));
}

/// A failed run is picked up by a fresh orchestrator over the same session
/// directory, without the original audio.
#[tokio::test]
async fn failed_run_resumes_from_disk() {
    let dir = tempdir().unwrap();
    let first = PipelineOrchestrator::direct(
        Arc::new(EchoStages {
            fail_letter: true,
            ..EchoStages::default()
        }),
        Arc::new(DirStore::open(dir.path()).unwrap()),
    );
    let err = first.submit(recording()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage(ref e) if e.stage == Stage::DraftLetter));
    assert_eq!(err.to_string(), "draftLetter failed: HTTP request failed: connection refused");

    let store = DirStore::open(dir.path()).unwrap();
    let failed_id = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_prefix("submission_")?
                .strip_suffix(".json")?
                .parse::<SubmissionId>()
                .ok()
        })
        .next()
        .expect("one stored submission");
    let failed = store.get(&failed_id).unwrap().unwrap();
    assert_eq!(failed.status(), SubmissionStatus::Error);
    assert!(failed.last_error().unwrap().contains("connection refused"));

    let stages = Arc::new(EchoStages::default());
    let second = PipelineOrchestrator::direct(stages.clone(), Arc::new(store));
    let record = second.run(failed_id, None).await.unwrap();

    assert_eq!(record.status(), SubmissionStatus::Completed);
    assert_eq!(record.transcript(), Some("heard 2048 bytes"));
    // Only the two drafting stages ran again.
    assert_eq!(stages.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn polling_run_follows_server_to_completion() {
    let dir = tempdir().unwrap();
    let server = Arc::new(SteppingServer::new());
    let orchestrator = PipelineOrchestrator::polling(
        server.clone(),
        Arc::new(DirStore::open(dir.path()).unwrap()),
        Duration::from_millis(250),
    );
    let mut updates = orchestrator.subscribe();

    let record = orchestrator.submit(recording()).await.unwrap();

    assert_eq!(record.status(), SubmissionStatus::Completed);
    assert_eq!(record.transcript(), Some("spoken words"));
    assert_eq!(record.analysis(), Some("Calm"));
    assert_eq!(record.consultation_draft(), Some("Formal response"));
    assert_eq!(record.representative_letter(), Some("Dear MP"));

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update.status());
    }
    assert_eq!(
        seen,
        vec![
            SubmissionStatus::Queued,
            // upload accepted
            SubmissionStatus::Queued,
            SubmissionStatus::Transcribing,
            SubmissionStatus::Greenpaper,
            SubmissionStatus::Email,
            SubmissionStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn show_unknown_submission_is_not_found() {
    let dir = tempdir().unwrap();
    let config = AppConfig::default();
    let orchestrator =
        PipelineOrchestrator::from_config(&config, Arc::new(DirStore::open(dir.path()).unwrap()));

    let id = SubmissionId::new();
    assert!(matches!(
        orchestrator.snapshot(&id),
        Err(PipelineError::NotFound(missing)) if missing == id
    ));
}
