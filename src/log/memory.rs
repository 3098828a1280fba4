//! MemoryLog — the in-process [`ActionLog`] implementation.
//!
//! Entries live in an append-ordered slab; per-index position lists give
//! newest-first iteration without cloning the whole log. Retention follows
//! the reason rule strictly: an append whose meta carries no reasons is
//! acknowledged but never stored, and an entry whose last reason is
//! released disappears.
//!
//! Interior mutability via a single `parking_lot::Mutex`. `each_by_index`
//! snapshots the matching entries under the lock, then visits them with the
//! lock released, so visitors may call back into the log.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::action::{Action, ActionMeta};
use crate::clock::{is_newer, ActionId};
use crate::error::{Result, SyncMapError};

use super::{ActionLog, ScanControl};

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    action: Action,
    meta: ActionMeta,
}

#[derive(Default)]
struct LogState {
    /// Append-ordered slab. Removed entries leave a vacated slot so index
    /// position lists stay valid.
    entries: Vec<Option<Entry>>,
    /// Index tag → slab positions in append order.
    by_index: HashMap<String, Vec<usize>>,
    /// Action id → slab position.
    by_id: HashMap<ActionId, usize>,
    /// Last issued id time, for same-millisecond sequencing.
    last_time: i64,
    seq: u64,
}

/// Where `new_id` takes its milliseconds from.
enum TimeSource {
    System,
    /// Fixed base — every id gets the same `time` and a bumped `seq`,
    /// which keeps test ids fully deterministic.
    Fixed(i64),
}

// ============================================================================
// MemoryLog
// ============================================================================

pub struct MemoryLog {
    client: String,
    time_source: TimeSource,
    state: Mutex<LogState>,
}

impl MemoryLog {
    /// Log generating ids for `client`, stamped with system time.
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            time_source: TimeSource::System,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Log generating ids for a random client identifier.
    pub fn with_random_client() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Deterministic log: every generated id carries `base` as its time and
    /// a monotonically bumped counter.
    pub fn with_base_time(client: impl Into<String>, base: i64) -> Self {
        Self {
            client: client.into(),
            time_source: TimeSource::Fixed(base),
            state: Mutex::new(LogState::default()),
        }
    }

    /// The client identifier baked into generated ids.
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Snapshot of all retained entries in append order. Intended for hosts
    /// shipping the log elsewhere and for test assertions.
    pub fn entries(&self) -> Vec<(Action, ActionMeta)> {
        self.state
            .lock()
            .entries
            .iter()
            .flatten()
            .map(|e| (e.action.clone(), e.meta.clone()))
            .collect()
    }

    /// Ids of entries currently retained by `reason`.
    pub fn retained_by(&self, reason: &str) -> Vec<ActionId> {
        self.state
            .lock()
            .entries
            .iter()
            .flatten()
            .filter(|e| e.meta.reasons.iter().any(|r| r == reason))
            .map(|e| e.meta.id.clone())
            .collect()
    }

    fn now_ms(&self) -> i64 {
        match self.time_source {
            TimeSource::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            TimeSource::Fixed(base) => base,
        }
    }

    fn remove_at(state: &mut LogState, pos: usize) {
        if let Some(entry) = state.entries[pos].take() {
            state.by_id.remove(&entry.meta.id);
        }
    }
}

#[async_trait]
impl ActionLog for MemoryLog {
    fn new_id(&self) -> ActionId {
        let now = self.now_ms();
        let mut state = self.state.lock();
        if now <= state.last_time {
            state.seq += 1;
        } else {
            state.last_time = now;
            state.seq = 0;
        }
        ActionId::new(state.last_time, state.seq, self.client.clone())
    }

    fn append(&self, action: &Action, meta: ActionMeta) -> Result<Option<ActionMeta>> {
        let mut state = self.state.lock();
        if let Some(&pos) = state.by_id.get(&meta.id) {
            // Redelivery of a known entry is normal; the same id over a
            // different action is not.
            let known = state.entries[pos].as_ref();
            if known.is_some_and(|e| e.action != *action) {
                return Err(SyncMapError::LogInconsistency(format!(
                    "id {} appended twice with different actions",
                    meta.id
                )));
            }
            return Ok(None);
        }
        if meta.reasons.is_empty() {
            // Observed but not retained.
            return Ok(Some(meta));
        }
        let pos = state.entries.len();
        state.entries.push(Some(Entry {
            action: action.clone(),
            meta: meta.clone(),
        }));
        state.by_id.insert(meta.id.clone(), pos);
        for index in &meta.indexes {
            state.by_index.entry(index.clone()).or_default().push(pos);
        }
        Ok(Some(meta))
    }

    async fn each_by_index(
        &self,
        index: &str,
        visit: &mut (dyn for<'a, 'b> FnMut(&'a Action, &'b ActionMeta) -> ScanControl + Send),
    ) -> Result<()> {
        let snapshot: Vec<Entry> = {
            let state = self.state.lock();
            let Some(positions) = state.by_index.get(index) else {
                return Ok(());
            };
            positions
                .iter()
                .rev()
                .filter_map(|&pos| state.entries[pos].clone())
                .collect()
        };
        for entry in &snapshot {
            if visit(&entry.action, &entry.meta) == ScanControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn release_reason(&self, reason: &str, older_than: Option<&ActionMeta>) {
        let mut state = self.state.lock();
        let mut vacated = Vec::new();
        for (pos, slot) in state.entries.iter_mut().enumerate() {
            let Some(entry) = slot else { continue };
            if !entry.meta.reasons.iter().any(|r| r == reason) {
                continue;
            }
            // With a bound, only entries causally older than it lose the tag.
            if let Some(bound) = older_than {
                if !is_newer(Some(&entry.meta), bound) {
                    continue;
                }
            }
            entry.meta.reasons.retain(|r| r != reason);
            if entry.meta.reasons.is_empty() {
                vacated.push(pos);
            }
        }
        for pos in vacated {
            Self::remove_at(&mut state, pos);
        }
    }

    fn rewrite_reasons(&self, id: &ActionId, reasons: Vec<String>) -> Result<()> {
        let mut state = self.state.lock();
        let Some(&pos) = state.by_id.get(id) else {
            tracing::debug!(%id, "rewrite_reasons: entry already pruned");
            return Ok(());
        };
        let remove = match state.entries[pos].as_mut() {
            Some(entry) => {
                if reasons.is_empty() {
                    true
                } else {
                    entry.meta.reasons = reasons;
                    false
                }
            }
            None => {
                return Err(SyncMapError::LogInconsistency(format!(
                    "id map points at vacated slot for {id}"
                )))
            }
        };
        if remove {
            Self::remove_at(&mut state, pos);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
