//! Confirmation tracking — futures that settle when the server answers.
//!
//! The engine only ever *waits* through [`ConfirmationTracker`]; feeding
//! `processed`/`undo` signals into the tracker is host wiring (a transport
//! adapter, a test driving [`ConfirmationHub`] directly). Waits carry no
//! timeout: liveness belongs to the confirmation channel, not this engine.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::action::Action;
use crate::clock::ActionId;
use crate::error::UndoReason;

// ============================================================================
// ConfirmationTracker
// ============================================================================

/// Collaborator resolving the fate of a sent action.
#[async_trait]
pub trait ConfirmationTracker: Send + Sync {
    /// Resolves when a matching `processed` arrives; fails with the undo's
    /// reason code when a matching `undo` arrives. Never times out.
    async fn await_confirmation(&self, id: &ActionId) -> Result<(), UndoReason>;
}

// ============================================================================
// ConfirmationHub
// ============================================================================

type Outcome = Result<(), UndoReason>;

#[derive(Default)]
struct HubState {
    /// Waiters per action id — one confirmation may have several interested
    /// parties (the requesting caller and the record's self-heal task).
    waiting: HashMap<ActionId, Vec<oneshot::Sender<Outcome>>>,
    /// Outcomes that arrived before anyone waited. Replayed logs deliver
    /// confirmations in the same turn as the actions they answer.
    settled: HashMap<ActionId, Outcome>,
}

/// In-process [`ConfirmationTracker`] with outcome memory.
#[derive(Default)]
pub struct ConfirmationHub {
    state: Mutex<HubState>,
}

impl ConfirmationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle `id` as processed, waking every waiter.
    pub fn confirm(&self, id: &ActionId) {
        self.settle(id, Ok(()));
    }

    /// Settle `id` as undone with `reason`, waking every waiter.
    pub fn reject(&self, id: &ActionId, reason: UndoReason) {
        self.settle(id, Err(reason));
    }

    /// Route a confirmation action into the hub. Non-confirmation actions
    /// are ignored so hosts can feed their whole inbound stream through.
    pub fn apply(&self, action: &Action) {
        match action {
            Action::Processed { id } => self.confirm(id),
            Action::Undo { id, reason } => self.reject(id, *reason),
            _ => {}
        }
    }

    /// Action ids somebody is currently waiting on.
    pub fn pending(&self) -> Vec<ActionId> {
        self.state.lock().waiting.keys().cloned().collect()
    }

    /// Drop the remembered outcome for `id`. Hosts that track completion
    /// themselves can call this to bound the hub's memory.
    pub fn forget(&self, id: &ActionId) {
        self.state.lock().settled.remove(id);
    }

    fn settle(&self, id: &ActionId, outcome: Outcome) {
        let waiters = {
            let mut state = self.state.lock();
            state.settled.insert(id.clone(), outcome);
            state.waiting.remove(id).unwrap_or_default()
        };
        // Lock released before waking; receivers may re-enter the hub.
        for tx in waiters {
            let _ = tx.send(outcome);
        }
    }
}

#[async_trait]
impl ConfirmationTracker for ConfirmationHub {
    async fn await_confirmation(&self, id: &ActionId) -> Result<(), UndoReason> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(outcome) = state.settled.get(id) {
                return *outcome;
            }
            let (tx, rx) = oneshot::channel();
            state.waiting.entry(id.clone()).or_default().push(tx);
            rx
        };
        // A dropped hub leaves the wait unanswerable; report it as a server
        // error rather than hanging forever on a closed channel.
        rx.await.unwrap_or(Err(UndoReason::Error))
    }
}

// ============================================================================
// Tests
// ============================================================================
