//! Run identity and phase bookkeeping

use previewkit_common::BuildPhase;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Unique build run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks the phase of one run and rejects transitions the state machine forbids.
///
/// Observers subscribe through a `watch` channel; the full history is kept so
/// callers can check the path a run took.
pub struct PhaseTracker {
    run_id: RunId,
    tx: watch::Sender<BuildPhase>,
    history: Vec<BuildPhase>,
}

impl PhaseTracker {
    pub fn new(run_id: RunId) -> Self {
        let (tx, _) = watch::channel(BuildPhase::Idle);
        Self {
            run_id,
            tx,
            history: vec![BuildPhase::Idle],
        }
    }

    pub fn current(&self) -> BuildPhase {
        *self.tx.borrow()
    }

    /// Move to `next`. Returns false (and stays put) for an illegal transition.
    pub fn advance(&mut self, next: BuildPhase) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            tracing::warn!(
                run_id = %self.run_id,
                from = %current,
                to = %next,
                "ignoring illegal phase transition"
            );
            return false;
        }
        tracing::info!(run_id = %self.run_id, phase = %next, "build phase");
        self.history.push(next);
        self.tx.send_replace(next);
        true
    }

    pub fn history(&self) -> &[BuildPhase] {
        &self.history
    }

    /// Last non-error phase entered
    pub fn phase_reached(&self) -> BuildPhase {
        self.history
            .iter()
            .rev()
            .copied()
            .find(|p| *p != BuildPhase::Error)
            .unwrap_or(BuildPhase::Idle)
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildPhase> {
        self.tx.subscribe()
    }
}
