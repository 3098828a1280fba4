//! Action-log collaborator interface.
//!
//! The engine never owns log storage — it appends, iterates by index, and
//! manages retention reasons through this narrow trait. [`MemoryLog`] is
//! the in-process reference implementation; durable backends live with the
//! host.

pub mod memory;

pub use memory::MemoryLog;

use async_trait::async_trait;

use crate::action::{Action, ActionMeta};
use crate::clock::ActionId;
use crate::error::Result;

// ============================================================================
// ScanControl / MetaHints
// ============================================================================

/// Visitor verdict for [`ActionLog::each_by_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Caller-requested envelope values for a fresh append.
///
/// The engine turns hints into a draft [`ActionMeta`] (id from
/// [`ActionLog::new_id`]), runs its pre-add dispatch phase over the draft,
/// and only then hands the final meta to [`ActionLog::append`].
#[derive(Debug, Clone, Default)]
pub struct MetaHints {
    pub indexes: Vec<String>,
    pub reasons: Vec<String>,
    pub sync: bool,
    /// Explicit causal timestamp; defaults to the generated id's time.
    pub time: Option<i64>,
}

impl MetaHints {
    /// Hints carrying only index tags.
    pub fn indexed(indexes: Vec<String>) -> Self {
        Self {
            indexes,
            ..Self::default()
        }
    }

    /// Hints carrying index tags plus the sync flag.
    pub fn synced(indexes: Vec<String>) -> Self {
        Self {
            indexes,
            sync: true,
            ..Self::default()
        }
    }
}

// ============================================================================
// ActionLog
// ============================================================================

/// Append-only action store with reason-based retention.
///
/// Entries are kept only while their meta carries at least one retention
/// reason; reason-less appends are still observed by the caller but need
/// not be stored.
#[async_trait]
pub trait ActionLog: Send + Sync {
    /// Generate a fresh, locally-unique, causally-placed identifier.
    fn new_id(&self) -> ActionId;

    /// Durably add an action under the given envelope.
    ///
    /// Returns `Ok(None)` when an entry with the same id already exists —
    /// redelivery is normal under at-least-once transports and must not
    /// reprocess.
    fn append(&self, action: &Action, meta: ActionMeta) -> Result<Option<ActionMeta>>;

    /// Iterate entries tagged with `index`, newest to oldest, until the
    /// visitor returns [`ScanControl::Stop`] or entries run out.
    async fn each_by_index(
        &self,
        index: &str,
        visit: &mut (dyn for<'a, 'b> FnMut(&'a Action, &'b ActionMeta) -> ScanControl + Send),
    ) -> Result<()>;

    /// Drop the retention reason `reason` from matching entries — all of
    /// them, or only those causally older than `older_than`. Entries left
    /// with no reasons are removed.
    fn release_reason(&self, reason: &str, older_than: Option<&ActionMeta>);

    /// Replace one entry's reasons wholesale (an empty list removes the
    /// entry). Unknown ids are a no-op: the entry may already have been
    /// pruned.
    fn rewrite_reasons(&self, id: &ActionId, reasons: Vec<String>) -> Result<()>;
}
