//! Submission data model: the record, its payload and its session store.
//!
//! This module provides:
//! * [`SubmissionRecord`] / [`SubmissionStatus`] — the entity and its state machine.
//! * [`Payload`] — audio or text input, held in memory only.
//! * [`SubmissionStore`] — session-scoped persistence ([`MemoryStore`], [`DirStore`]).

pub mod payload;
pub mod record;
pub mod store;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use payload::{
    content_type_for_extension, content_type_for_file_name, word_count, Payload, PayloadError,
    FALLBACK_CONTENT_TYPE, RECORDING_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
pub use record::{
    split_analysis, InvalidTransition, StepState, SubmissionId, SubmissionRecord,
    SubmissionStatus,
};
pub use store::{DirStore, MemoryStore, StoreError, SubmissionStore};
