//! Submission pipeline: turn a spoken or typed submission into a
//! consultation response draft and a letter to a representative.
//!
//! * [`submission`] — the record, its payload and the session store.
//! * [`stage`] — remote stage clients (transcribe, draft consultation, draft letter).
//! * [`pipeline`] — the orchestrator that drives a submission to completion.
//! * [`config`] — settings and platform paths.

pub mod config;
pub mod pipeline;
pub mod stage;
pub mod submission;
