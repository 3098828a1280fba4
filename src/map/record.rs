//! SyncedRecord — one synchronized map instance.
//!
//! Holds the visible field values plus the per-field causal bookkeeping
//! (`last_changed`, `last_processed`) the merge engine and reason ledger
//! operate on. Field-change listeners use snapshot-on-emit semantics: the
//! listener lock is released before callbacks run, so callbacks may
//! subscribe or unsubscribe freely.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::action::{ActionMeta, Fields};
use crate::error::{Result, SyncMapError};
use crate::map::definition::MapDef;
use crate::map::merge;

// ============================================================================
// LoadState / FieldChange
// ============================================================================

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Waiting for the remote subscription and/or the offline replay.
    Loading,
    /// At least one load path found the record (or it was created locally).
    Loaded,
    /// Terminal: no load path found the record.
    Failed,
    /// Terminal: the record was unloaded.
    Destroyed,
}

/// One visible field mutation, delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub plural: String,
    pub id: String,
    pub field: String,
    /// New visible value; `None` when rollback unset the field.
    pub value: Option<Value>,
}

/// An owned one-shot closure that removes a subscription when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

type ListenerFn = dyn Fn(&FieldChange) + Send + Sync;

// ============================================================================
// RecordState
// ============================================================================

/// The mutable core of a record, always accessed under the record's lock.
#[derive(Default)]
pub(crate) struct RecordState {
    /// Current visible field values.
    pub fields: Fields,
    /// Per field, the meta of the action that set its current value.
    pub last_changed: HashMap<String, ActionMeta>,
    /// Per field, the newest meta whose effect is confirmed durable.
    pub last_processed: HashMap<String, ActionMeta>,
    /// Fields holding an optimistic value that has not yet been re-applied
    /// under its action's meta.
    pub provisional: BTreeSet<String>,
    /// Creation meta when the record was created locally.
    pub created_at: Option<ActionMeta>,
    /// Set when loading failed; teardown skips the unsubscribe then.
    pub load_failed: bool,
    pub load_error: Option<SyncMapError>,
}

// ============================================================================
// SyncedRecord
// ============================================================================

pub struct SyncedRecord {
    def: Arc<MapDef>,
    id: String,
    pub(crate) state: Mutex<RecordState>,
    load_tx: watch::Sender<LoadState>,
    listeners: Mutex<Vec<(u64, Arc<ListenerFn>)>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for SyncedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedRecord").field("id", &self.id).finish()
    }
}

impl SyncedRecord {
    pub(crate) fn new(def: Arc<MapDef>, id: &str) -> Arc<Self> {
        let (load_tx, _) = watch::channel(LoadState::Loading);
        Arc::new(Self {
            def,
            id: id.to_string(),
            state: Mutex::new(RecordState::default()),
            load_tx,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        })
    }

    pub fn def(&self) -> &Arc<MapDef> {
        &self.def
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn load_state(&self) -> LoadState {
        *self.load_tx.borrow()
    }

    /// Snapshot of the visible field values.
    pub fn fields(&self) -> Fields {
        self.state.lock().fields.clone()
    }

    /// Current value of one field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.state.lock().fields.get(field).cloned()
    }

    /// Is this field's value an optimistic write that has not yet passed
    /// through the merge engine under its action's meta?
    pub fn is_provisional(&self, field: &str) -> bool {
        self.state.lock().provisional.contains(field)
    }

    /// Creation meta, when this record was instantiated from a creation
    /// action.
    pub fn created_at(&self) -> Option<ActionMeta> {
        self.state.lock().created_at.clone()
    }

    /// Wait until loading settles. `Ok` once Loaded; the load failure
    /// otherwise. Unloading a still-loading record resolves the wait with
    /// [`SyncMapError::Unconfirmed`].
    pub async fn loading(&self) -> Result<()> {
        let mut rx = self.load_tx.subscribe();
        let settled = *rx
            .wait_for(|s| *s != LoadState::Loading)
            .await
            .map_err(|_| self.unconfirmed())?;
        match settled {
            LoadState::Loaded => Ok(()),
            LoadState::Failed => Err(self
                .state
                .lock()
                .load_error
                .clone()
                .unwrap_or_else(|| self.unconfirmed())),
            LoadState::Destroyed => Err(self.unconfirmed()),
            LoadState::Loading => unreachable!("wait_for excludes Loading"),
        }
    }

    /// Register a field-change listener.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&FieldChange) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let listener_id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((listener_id, Arc::new(callback)));
        let weak = Arc::downgrade(self);
        Box::new(move || {
            if let Some(record) = weak.upgrade() {
                record.listeners.lock().retain(|(lid, _)| *lid != listener_id);
            }
        })
    }

    // -----------------------------------------------------------------------
    // Engine-facing mutations
    // -----------------------------------------------------------------------

    /// Run field values through the merge engine and notify listeners of
    /// every visible change. Returns the names of the fields whose visible
    /// value changed.
    pub(crate) fn apply(&self, fields: &Fields, meta: Option<&ActionMeta>) -> Vec<String> {
        let changed = {
            let mut state = self.state.lock();
            merge::apply_if_newer(&mut state, fields, meta)
        };
        let mut names = Vec::with_capacity(changed.len());
        for (field, value) in changed {
            names.push(field.clone());
            self.emit(&FieldChange {
                plural: self.def.plural.clone(),
                id: self.id.clone(),
                field,
                value: Some(value),
            });
        }
        names
    }

    /// Unset fields rollback found no earlier value for.
    pub(crate) fn unset_fields<I: IntoIterator<Item = String>>(&self, keys: I) {
        for key in keys {
            let removed = {
                let mut state = self.state.lock();
                merge::unset(&mut state, &key)
            };
            if removed {
                self.emit(&FieldChange {
                    plural: self.def.plural.clone(),
                    id: self.id.clone(),
                    field: key,
                    value: None,
                });
            }
        }
    }

    /// Mark the record created: set `created_at` and resolve loading.
    pub(crate) fn mark_created(&self, meta: &ActionMeta) {
        self.state.lock().created_at = Some(meta.clone());
        self.resolve_loaded();
    }

    /// `Loading → Loaded`, exactly once. Returns whether this call made the
    /// transition — the guard that keeps the remote and offline load paths
    /// from double-resolving.
    pub(crate) fn resolve_loaded(&self) -> bool {
        let mut transitioned = false;
        self.load_tx.send_if_modified(|s| {
            if *s == LoadState::Loading {
                *s = LoadState::Loaded;
                transitioned = true;
                true
            } else {
                false
            }
        });
        if transitioned {
            tracing::debug!(plural = %self.def.plural, id = %self.id, "record loaded");
        }
        transitioned
    }

    /// `Loading → Failed`, exactly once.
    pub(crate) fn fail_loading(&self, error: SyncMapError) -> bool {
        let mut transitioned = false;
        {
            let mut state = self.state.lock();
            self.load_tx.send_if_modified(|s| {
                if *s == LoadState::Loading {
                    *s = LoadState::Failed;
                    transitioned = true;
                    true
                } else {
                    false
                }
            });
            if transitioned {
                state.load_failed = true;
                state.load_error = Some(error);
            }
        }
        if transitioned {
            tracing::debug!(plural = %self.def.plural, id = %self.id, "record load failed");
        }
        transitioned
    }

    /// Terminal teardown: listeners dropped, waiters resolved.
    pub(crate) fn destroy(&self) {
        self.load_tx.send_replace(LoadState::Destroyed);
        self.listeners.lock().clear();
    }

    fn emit(&self, change: &FieldChange) {
        // Snapshot under the lock, call with the lock released.
        let snapshot: Vec<Arc<ListenerFn>> = {
            let listeners = self.listeners.lock();
            listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(change);
        }
    }

    fn unconfirmed(&self) -> SyncMapError {
        SyncMapError::Unconfirmed {
            plural: self.def.plural.clone(),
            id: self.id.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
