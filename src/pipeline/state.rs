//! Shared orchestrator state: the in-flight run registry and update stream.
//!
//! [`InFlight`] guarantees a single logical run per submission: a run must
//! hold a [`RunGuard`] for its identifier, and the guard is released when
//! the run ends (including when its task is cancelled or dropped).
//!
//! [`UpdateSender`] is a `tokio::sync::broadcast` channel of record
//! snapshots. The orchestrator sends after every persisted write; readers
//! subscribe and never block the pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::submission::{SubmissionId, SubmissionRecord};

/// Sender half of the record update stream.
pub type UpdateSender = broadcast::Sender<SubmissionRecord>;

/// Receiver half of the record update stream.
pub type UpdateReceiver = broadcast::Receiver<SubmissionRecord>;

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// Identifiers that currently have a run executing.
///
/// Cheap to clone (`Arc` clone).
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<SubmissionId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`; `None` when a run for it is already in flight.
    pub fn try_claim(&self, id: SubmissionId) -> Option<RunGuard> {
        if !self.lock().insert(id) {
            return None;
        }
        Some(RunGuard {
            registry: self.clone(),
            id,
        })
    }

    pub fn contains(&self, id: &SubmissionId) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SubmissionId>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive claim on one submission; released on drop.
#[derive(Debug)]
pub struct RunGuard {
    registry: InFlight,
    id: SubmissionId,
}

impl RunGuard {
    pub fn id(&self) -> SubmissionId {
        self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_release() {
        let registry = InFlight::new();
        let id = SubmissionId::new();

        let guard = registry.try_claim(id).expect("first claim");
        assert!(registry.try_claim(id).is_none());
        assert!(registry.contains(&id));

        drop(guard);
        assert!(!registry.contains(&id));
        assert!(registry.try_claim(id).is_some());
    }

    #[test]
    fn claims_are_per_submission() {
        let registry = InFlight::new();
        let _a = registry.try_claim(SubmissionId::new()).unwrap();
        let _b = registry.try_claim(SubmissionId::new()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InFlight>();
        assert_send_sync::<RunGuard>();
    }

    #[test]
    fn clones_share_the_same_set() {
        let registry = InFlight::new();
        let clone = registry.clone();
        let id = SubmissionId::new();

        let _guard = registry.try_claim(id).unwrap();
        assert!(clone.contains(&id));
        assert!(clone.try_claim(id).is_none());
    }
}
