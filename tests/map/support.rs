//! Shared test harness: an engine over the in-crate `MemoryLog` and
//! `ConfirmationHub`, where the test plays the server by confirming or
//! rejecting pending actions, plus a recording log decorator for asserting
//! protocol traffic.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use sync_map::log::{ActionLog, MemoryLog, ScanControl};
use sync_map::map::{MapDef, MapRegistry, SyncMapEngine};
use sync_map::track::ConfirmationHub;
use sync_map::{Action, ActionId, ActionMeta, Fields, Result};

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub log: Arc<MemoryLog>,
    pub hub: Arc<ConfirmationHub>,
    pub engine: Arc<SyncMapEngine>,
}

/// Engine over a deterministic log: every locally-generated id carries
/// `base` as its time and a bumped counter.
pub fn harness_with_base(defs: &[Arc<MapDef>], base: i64) -> Harness {
    let log = Arc::new(MemoryLog::with_base_time("local", base));
    let hub = Arc::new(ConfirmationHub::new());
    let mut registry = MapRegistry::new();
    for def in defs {
        registry.register(def.clone());
    }
    let engine = SyncMapEngine::new(log.clone(), hub.clone(), registry);
    Harness { log, hub, engine }
}

pub fn harness(defs: &[Arc<MapDef>]) -> Harness {
    harness_with_base(defs, 1_000)
}

// ============================================================================
// RecordingLog — append-observing decorator
// ============================================================================

pub struct RecordingLog {
    inner: MemoryLog,
    appended: Mutex<Vec<(Action, ActionMeta)>>,
}

impl RecordingLog {
    pub fn new(inner: MemoryLog) -> Self {
        Self {
            inner,
            appended: Mutex::new(Vec::new()),
        }
    }

    /// Every accepted append, in order — including entries the log did not
    /// retain (no reasons) and could not otherwise be observed.
    pub fn appended(&self) -> Vec<(Action, ActionMeta)> {
        self.appended.lock().clone()
    }

    pub fn inner(&self) -> &MemoryLog {
        &self.inner
    }
}

#[async_trait]
impl ActionLog for RecordingLog {
    fn new_id(&self) -> ActionId {
        self.inner.new_id()
    }

    fn append(&self, action: &Action, meta: ActionMeta) -> Result<Option<ActionMeta>> {
        let stored = self.inner.append(action, meta)?;
        if let Some(meta) = &stored {
            self.appended.lock().push((action.clone(), meta.clone()));
        }
        Ok(stored)
    }

    async fn each_by_index(
        &self,
        index: &str,
        visit: &mut (dyn for<'a, 'b> FnMut(&'a Action, &'b ActionMeta) -> ScanControl + Send),
    ) -> Result<()> {
        self.inner.each_by_index(index, visit).await
    }

    fn release_reason(&self, reason: &str, older_than: Option<&ActionMeta>) {
        self.inner.release_reason(reason, older_than)
    }

    fn rewrite_reasons(&self, id: &ActionId, reasons: Vec<String>) -> Result<()> {
        self.inner.rewrite_reasons(id, reasons)
    }
}

pub struct RecordingHarness {
    pub log: Arc<RecordingLog>,
    pub hub: Arc<ConfirmationHub>,
    pub engine: Arc<SyncMapEngine>,
}

pub fn recording_harness(defs: &[Arc<MapDef>]) -> RecordingHarness {
    let log = Arc::new(RecordingLog::new(MemoryLog::with_base_time("local", 1_000)));
    let hub = Arc::new(ConfirmationHub::new());
    let mut registry = MapRegistry::new();
    for def in defs {
        registry.register(def.clone());
    }
    let engine = SyncMapEngine::new(log.clone(), hub.clone(), registry);
    RecordingHarness { log, hub, engine }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn fields(pairs: &[(&str, Value)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// An envelope as another client or the server would stamp it.
pub fn remote_meta(time: i64, seq: u64, client: &str) -> ActionMeta {
    ActionMeta::new(ActionId::new(time, seq, client))
}

/// Poll `cond` until it holds. Panics after ~2 seconds — long enough for
/// any spawned follow-up to have run, short enough to fail fast.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

/// Wait for exactly one pending confirmation and return its action id.
pub async fn next_pending(hub: &ConfirmationHub) -> ActionId {
    for _ in 0..2_000 {
        if let Some(id) = hub.pending().into_iter().next() {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("no confirmation wait arrived in time");
}

/// The newest retained `change` intent in the log.
pub fn pending_change_meta(log: &MemoryLog) -> Option<ActionMeta> {
    log.entries()
        .into_iter()
        .rev()
        .find(|(action, _)| matches!(action, Action::Change { .. }))
        .map(|(_, meta)| meta)
}
