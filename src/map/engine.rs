//! SyncMapEngine — lifecycle orchestration over the action log.
//!
//! All state transitions flow through an explicit dispatch table keyed by
//! `(action type name, record id)`, invoked at two phases:
//!   - **pre-add** — before the log stores an entry; handlers tag the draft
//!     meta with index tags and retention reasons.
//!   - **commit** — after the log accepted the entry; handlers apply field
//!     state and start confirmation follow-ups.
//!
//! Local writes enter through [`SyncMapEngine::add`]; actions observed from
//! elsewhere (server push, another process sharing the log) enter through
//! [`SyncMapEngine::receive`] and run the same two phases. Confirmation
//! actions (`processed`/`undo`) are the host's business to route into its
//! tracker — the engine only ever waits on them.
//!
//! # Threading
//!
//! Handlers run synchronously in the caller's turn; detached follow-ups
//! (confirmation waits, rollback) are spawned onto the Tokio runtime, so
//! `add`/`receive` and the lifecycle methods must be called from within one.
//! Internal locks are `parking_lot::Mutex` and are never held across an
//! `.await`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::{Action, ActionMeta, Fields};
use crate::error::{Result, SyncMapError};
use crate::log::{ActionLog, MetaHints, ScanControl};
use crate::map::definition::{MapDef, MapRegistry};
use crate::map::reasons;
use crate::map::record::SyncedRecord;
use crate::track::ConfirmationTracker;

// ============================================================================
// Dispatch table
// ============================================================================

type PreAddFn = dyn Fn(&Action, &mut ActionMeta) + Send + Sync;
type CommitFn = dyn Fn(&Action, &ActionMeta) + Send + Sync;

/// Phase a binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PreAdd,
    Commit,
}

/// Handle for removing one registered handler.
struct Binding {
    phase: Phase,
    key: (String, String),
    token: u64,
}

#[derive(Default)]
struct DispatchTable {
    next_token: u64,
    pre_add: HashMap<(String, String), Vec<(u64, Arc<PreAddFn>)>>,
    commit: HashMap<(String, String), Vec<(u64, Arc<CommitFn>)>>,
}

impl DispatchTable {
    fn add_pre_add(&mut self, key: (String, String), handler: Arc<PreAddFn>) -> Binding {
        self.next_token += 1;
        let token = self.next_token;
        self.pre_add.entry(key.clone()).or_default().push((token, handler));
        Binding {
            phase: Phase::PreAdd,
            key,
            token,
        }
    }

    fn add_commit(&mut self, key: (String, String), handler: Arc<CommitFn>) -> Binding {
        self.next_token += 1;
        let token = self.next_token;
        self.commit.entry(key.clone()).or_default().push((token, handler));
        Binding {
            phase: Phase::Commit,
            key,
            token,
        }
    }

    fn remove(&mut self, binding: &Binding) {
        match binding.phase {
            Phase::PreAdd => {
                if let Some(handlers) = self.pre_add.get_mut(&binding.key) {
                    handlers.retain(|(token, _)| *token != binding.token);
                    if handlers.is_empty() {
                        self.pre_add.remove(&binding.key);
                    }
                }
            }
            Phase::Commit => {
                if let Some(handlers) = self.commit.get_mut(&binding.key) {
                    handlers.retain(|(token, _)| *token != binding.token);
                    if handlers.is_empty() {
                        self.commit.remove(&binding.key);
                    }
                }
            }
        }
    }
}

// ============================================================================
// SyncMapEngine
// ============================================================================

pub struct SyncMapEngine {
    log: Arc<dyn ActionLog>,
    tracker: Arc<dyn ConfirmationTracker>,
    registry: MapRegistry,
    /// Live records by `"{plural}/{id}"`.
    records: Mutex<HashMap<String, Arc<SyncedRecord>>>,
    dispatch: Mutex<DispatchTable>,
    /// Bindings per live record, removed wholesale on unload.
    bound: Mutex<HashMap<String, Vec<Binding>>>,
}

impl SyncMapEngine {
    pub fn new(
        log: Arc<dyn ActionLog>,
        tracker: Arc<dyn ConfirmationTracker>,
        registry: MapRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            log,
            tracker,
            registry,
            records: Mutex::new(HashMap::new()),
            dispatch: Mutex::new(DispatchTable::default()),
            bound: Mutex::new(HashMap::new()),
        })
    }

    pub fn log(&self) -> &Arc<dyn ActionLog> {
        &self.log
    }

    pub fn tracker(&self) -> &Arc<dyn ConfirmationTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &MapRegistry {
        &self.registry
    }

    /// The live record for `(plural, id)`, if instantiated.
    pub fn record(&self, plural: &str, id: &str) -> Option<Arc<SyncedRecord>> {
        self.records.lock().get(&format!("{plural}/{id}")).cloned()
    }

    // -----------------------------------------------------------------------
    // Log admission
    // -----------------------------------------------------------------------

    /// Append a locally-originated action: build the envelope from `hints`,
    /// run the pre-add phase over the draft, store, run the commit phase.
    pub fn add(&self, action: Action, hints: MetaHints) -> Result<ActionMeta> {
        let mut meta = ActionMeta::new(self.log.new_id());
        if let Some(time) = hints.time {
            meta.time = time;
        }
        meta.sync = hints.sync;
        for index in hints.indexes {
            meta.add_index(index);
        }
        for reason in hints.reasons {
            meta.add_reason(reason);
        }
        self.run_pre_add(&action, &mut meta);
        match self.log.append(&action, meta)? {
            Some(meta) => {
                self.run_commit(&action, &meta);
                Ok(meta)
            }
            None => Err(SyncMapError::LogInconsistency(
                "freshly generated id collided in the log".to_string(),
            )),
        }
    }

    /// Process an action that originated elsewhere and already carries its
    /// envelope. Duplicate ids are skipped without re-running handlers.
    pub fn receive(&self, action: Action, mut meta: ActionMeta) -> Result<()> {
        self.run_pre_add(&action, &mut meta);
        match self.log.append(&action, meta)? {
            Some(meta) => {
                self.run_commit(&action, &meta);
                Ok(())
            }
            None => {
                tracing::debug!(action = %action.type_name(), "duplicate delivery skipped");
                Ok(())
            }
        }
    }

    fn run_pre_add(&self, action: &Action, meta: &mut ActionMeta) {
        let Some(handlers) = self.handlers_for(&self.dispatch.lock().pre_add, action) else {
            return;
        };
        for handler in handlers {
            handler(action, meta);
        }
    }

    fn run_commit(&self, action: &Action, meta: &ActionMeta) {
        let Some(handlers) = self.handlers_for(&self.dispatch.lock().commit, action) else {
            return;
        };
        for handler in handlers {
            handler(action, meta);
        }
    }

    /// Snapshot the handler list for an action so the dispatch lock is not
    /// held while handlers run (handlers may add/remove bindings).
    fn handlers_for<F: ?Sized>(
        &self,
        table: &HashMap<(String, String), Vec<(u64, Arc<F>)>>,
        action: &Action,
    ) -> Option<Vec<Arc<F>>> {
        let record_id = action.record_id()?;
        let key = (action.type_name(), record_id.to_string());
        table
            .get(&key)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
    }

    // -----------------------------------------------------------------------
    // Instantiation and loading
    // -----------------------------------------------------------------------

    /// Open (or return the already-open) record for `(plural, id)` and start
    /// its load paths. Idempotent per id while the record stays loaded.
    pub fn instantiate(self: &Arc<Self>, plural: &str, id: &str) -> Result<Arc<SyncedRecord>> {
        let def = self.registry.get(plural)?;
        let (record, fresh) = self.register(&def, id);
        if fresh {
            self.bind_record(&record);
            self.start_loading(&record);
        }
        Ok(record)
    }

    /// Open a record from a creation action already at hand (observed in the
    /// log or delivered by the server). The record is Loaded immediately.
    pub fn instantiate_from_creation(
        self: &Arc<Self>,
        plural: &str,
        id: &str,
        action: &Action,
        meta: &ActionMeta,
        already_subscribed: bool,
    ) -> Result<Arc<SyncedRecord>> {
        let def = self.registry.get(plural)?;
        let (record, fresh) = self.register(&def, id);
        if fresh {
            self.bind_record(&record);
        }
        let fields = action.fields().cloned().unwrap_or_default();
        let awaits_confirmation = matches!(action, Action::Create { .. });
        self.finish_creation(
            &record,
            &def,
            id,
            &fields,
            meta,
            awaits_confirmation,
            already_subscribed,
        );
        Ok(record)
    }

    /// Create a record locally: append the creation action and return the
    /// record, Loaded, with `created_at` set. Remote-backed types track the
    /// `create` intent and subscribe with the creation flag.
    pub fn create_record(
        self: &Arc<Self>,
        plural: &str,
        id: &str,
        fields: Fields,
    ) -> Result<Arc<SyncedRecord>> {
        let def = self.registry.get(plural)?;
        let (record, fresh) = self.register(&def, id);
        if fresh {
            self.bind_record(&record);
        }
        let action = if def.remote {
            Action::Create {
                plural: def.plural.clone(),
                id: id.to_string(),
                fields: fields.clone(),
            }
        } else {
            Action::Created {
                plural: def.plural.clone(),
                id: id.to_string(),
                fields: fields.clone(),
            }
        };
        let mut hints = MetaHints::indexed(def.indexes(id));
        hints.sync = def.remote;
        let meta = self.add(action, hints)?;
        self.finish_creation(&record, &def, id, &fields, &meta, def.remote, false);
        Ok(record)
    }

    /// Register a record in the live table. Returns `(record, fresh)`.
    fn register(&self, def: &Arc<MapDef>, id: &str) -> (Arc<SyncedRecord>, bool) {
        let key = def.channel(id);
        let mut records = self.records.lock();
        if let Some(existing) = records.get(&key) {
            return (existing.clone(), false);
        }
        let record = SyncedRecord::new(def.clone(), id);
        records.insert(key, record.clone());
        (record, true)
    }

    /// Shared tail of both creation paths: apply the creation fields under
    /// their meta, mark the record created, track the intent when it still
    /// needs server confirmation, and subscribe when remote-backed.
    #[allow(clippy::too_many_arguments)]
    fn finish_creation(
        self: &Arc<Self>,
        record: &Arc<SyncedRecord>,
        def: &Arc<MapDef>,
        id: &str,
        fields: &Fields,
        meta: &ActionMeta,
        awaits_confirmation: bool,
        already_subscribed: bool,
    ) {
        // Idempotent when the commit phase already applied the fields.
        record.apply(fields, Some(meta));
        record.mark_created(meta);
        if awaits_confirmation {
            let engine = self.clone();
            let record = record.clone();
            let def = def.clone();
            let id = id.to_string();
            let fields = fields.clone();
            let meta = meta.clone();
            tokio::spawn(async move {
                match engine.tracker.await_confirmation(&meta.id).await {
                    Ok(()) => {
                        let mut state = record.state.lock();
                        reasons::settle_and_prune(
                            engine.log.as_ref(),
                            &def,
                            &id,
                            &mut state,
                            &fields,
                            &meta,
                        );
                    }
                    Err(reason) => {
                        tracing::debug!(plural = %def.plural, id = %id, %reason, "create rejected");
                        let _ = engine.log.rewrite_reasons(&meta.id, Vec::new());
                    }
                }
            });
        }
        if def.remote && !already_subscribed {
            let subscribe = Action::Subscribe {
                channel: def.channel(id),
                creating: true,
            };
            if let Err(error) = self.add(subscribe, MetaHints::synced(Vec::new())) {
                tracing::warn!(plural = %def.plural, id = %id, %error, "creation subscribe failed");
            }
        }
    }

    /// Kick off the remote subscription and/or the offline replay for a
    /// freshly opened record. Whichever path finds the record first resolves
    /// loading; the transition guard in the record prevents double resolve.
    fn start_loading(self: &Arc<Self>, record: &Arc<SyncedRecord>) {
        let def = record.def().clone();
        let id = record.id().to_string();

        if def.remote {
            let engine = self.clone();
            let record = record.clone();
            let def = def.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let subscribe = Action::Subscribe {
                    channel: def.channel(&id),
                    creating: false,
                };
                let meta = match engine.add(subscribe, MetaHints::synced(Vec::new())) {
                    Ok(meta) => meta,
                    Err(error) => {
                        record.fail_loading(error);
                        return;
                    }
                };
                match engine.tracker.await_confirmation(&meta.id).await {
                    Ok(()) => {
                        record.resolve_loaded();
                    }
                    Err(reason) => {
                        record.fail_loading(SyncMapError::from_undo(
                            reason,
                            meta.id.clone(),
                            &def.plural,
                            &id,
                        ));
                    }
                }
            });
        }

        if def.offline {
            let engine = self.clone();
            let record = record.clone();
            let def = def.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut found = false;
                let index = def.channel(&id);
                let scan = engine
                    .log
                    .each_by_index(&index, &mut |action, meta| {
                        if action.record_id() != Some(id.as_str()) {
                            return ScanControl::Continue;
                        }
                        if action.is_constructive() {
                            if let Some(fields) = action.fields() {
                                record.apply(fields, Some(meta));
                                found = true;
                            }
                            ScanControl::Continue
                        } else if action.is_tombstone() {
                            ScanControl::Stop
                        } else {
                            ScanControl::Continue
                        }
                    })
                    .await;
                if let Err(error) = scan {
                    record.fail_loading(error);
                    return;
                }
                if found {
                    record.resolve_loaded();
                } else if !def.remote {
                    record.fail_loading(SyncMapError::NotFound {
                        plural: def.plural.clone(),
                        id: id.clone(),
                    });
                }
            });
        }

        if !def.remote && !def.offline {
            // No load path exists; a record of this shape only ever comes
            // from a creation action.
            record.fail_loading(SyncMapError::NotFound {
                plural: def.plural.clone(),
                id,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Append a creation intent without opening the record. Remote-backed
    /// types wait for the server's verdict.
    pub async fn request_create(self: &Arc<Self>, plural: &str, id: &str, fields: Fields) -> Result<()> {
        let def = self.registry.get(plural)?;
        let action = if def.remote {
            Action::Create {
                plural: def.plural.clone(),
                id: id.to_string(),
                fields,
            }
        } else {
            Action::Created {
                plural: def.plural.clone(),
                id: id.to_string(),
                fields,
            }
        };
        let mut hints = MetaHints::indexed(def.indexes(id));
        hints.sync = def.remote;
        let meta = self.add(action, hints)?;
        self.await_verdict(&def, &meta).await
    }

    /// Change fields: applied optimistically for immediate visibility when
    /// the record is open, then appended as `change` (remote) or `changed`
    /// (local fact). Remote-backed types wait for the server's verdict; a
    /// rejection reaches the caller here while the open record self-heals
    /// through rollback.
    pub async fn request_change(
        self: &Arc<Self>,
        plural: &str,
        id: &str,
        fields: Fields,
    ) -> Result<()> {
        let def = self.registry.get(plural)?;
        if let Some(record) = self.record(plural, id) {
            record.apply(&fields, None);
        }
        let action = if def.remote {
            Action::Change {
                plural: def.plural.clone(),
                id: id.to_string(),
                fields,
            }
        } else {
            Action::Changed {
                plural: def.plural.clone(),
                id: id.to_string(),
                fields,
            }
        };
        let mut hints = MetaHints::indexed(def.indexes(id));
        hints.sync = def.remote;
        let meta = self.add(action, hints)?;
        self.await_verdict(&def, &meta).await
    }

    /// Delete a record. The optimistic phase mutates no field values — the
    /// last known fields stay readable until teardown.
    pub async fn request_delete(self: &Arc<Self>, plural: &str, id: &str) -> Result<()> {
        let def = self.registry.get(plural)?;
        let action = if def.remote {
            Action::Delete {
                plural: def.plural.clone(),
                id: id.to_string(),
            }
        } else {
            Action::Deleted {
                plural: def.plural.clone(),
                id: id.to_string(),
            }
        };
        let mut hints = MetaHints::indexed(def.indexes(id));
        hints.sync = def.remote;
        let meta = self.add(action, hints)?;
        self.await_verdict(&def, &meta).await
    }

    async fn await_verdict(&self, def: &MapDef, meta: &ActionMeta) -> Result<()> {
        if !def.remote {
            return Ok(());
        }
        self.tracker
            .await_confirmation(&meta.id)
            .await
            .map_err(|reason| SyncMapError::Rejected {
                id: meta.id.clone(),
                reason,
            })
    }

    // -----------------------------------------------------------------------
    // Unload
    // -----------------------------------------------------------------------

    /// Tear a record down once its last observer detached: handlers removed,
    /// channel unsubscribed (unless loading itself failed), retention
    /// released when the type is not offline-capable.
    pub fn unload(&self, plural: &str, id: &str) -> Result<()> {
        let def = self.registry.get(plural)?;
        let key = def.channel(id);
        let Some(record) = self.records.lock().remove(&key) else {
            return Ok(());
        };
        let bindings = self.bound.lock().remove(&key).unwrap_or_default();
        {
            let mut table = self.dispatch.lock();
            for binding in &bindings {
                table.remove(binding);
            }
        }
        let load_failed = record.state.lock().load_failed;
        if def.remote && !load_failed {
            let unsubscribe = Action::Unsubscribe {
                channel: def.channel(id),
            };
            if let Err(error) = self.add(unsubscribe, MetaHints::synced(Vec::new())) {
                tracing::warn!(plural = %def.plural, id = %id, %error, "unsubscribe failed");
            }
        }
        if !def.offline {
            let state = record.state.lock();
            reasons::release_all(self.log.as_ref(), &def, id, &state);
        }
        record.destroy();
        tracing::debug!(plural = %def.plural, id = %id, "record unloaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatch bindings per record
    // -----------------------------------------------------------------------

    /// Register the record's handlers in the dispatch table. One registration
    /// per `(type, id)` pair, mirroring the lifecycle rules: index tagging
    /// and retention at pre-add, state application and confirmation
    /// follow-ups at commit.
    fn bind_record(self: &Arc<Self>, record: &Arc<SyncedRecord>) {
        let def = record.def().clone();
        let id = record.id().to_string();
        let plural = def.plural.clone();
        let mut bindings = Vec::new();
        let mut table = self.dispatch.lock();

        // Index tags for everything that must be findable by record index.
        for verb in ["change", "changed", "delete", "deleted"] {
            let def = def.clone();
            let id2 = id.clone();
            bindings.push(table.add_pre_add(
                (format!("{plural}/{verb}"), id.clone()),
                Arc::new(move |_action, meta| {
                    for index in def.indexes(&id2) {
                        meta.add_index(index);
                    }
                }),
            ));
        }

        // Retention reasons for constructive entries not yet superseded.
        for verb in ["created", "changed", "change"] {
            let def = def.clone();
            let id2 = id.clone();
            let record = record.clone();
            bindings.push(table.add_pre_add(
                (format!("{plural}/{verb}"), id.clone()),
                Arc::new(move |action, meta| {
                    if let Some(fields) = action.fields() {
                        let state = record.state.lock();
                        reasons::retain_for_processing(&def, &id2, &state, fields, meta);
                    }
                }),
            ));
        }

        // Confirmed facts: merge, then settle retention.
        for verb in ["created", "changed"] {
            let engine = Arc::downgrade(self);
            let def = def.clone();
            let id2 = id.clone();
            let record = record.clone();
            bindings.push(table.add_commit(
                (format!("{plural}/{verb}"), id.clone()),
                Arc::new(move |action, meta| {
                    let Some(engine) = engine.upgrade() else { return };
                    let Some(fields) = action.fields() else { return };
                    record.apply(fields, Some(meta));
                    let mut state = record.state.lock();
                    reasons::settle_and_prune(
                        engine.log.as_ref(),
                        &def,
                        &id2,
                        &mut state,
                        fields,
                        meta,
                    );
                }),
            ));
        }

        // Change intents: merge now, then settle on confirmation or clear
        // retention and roll back on rejection.
        {
            let engine = Arc::downgrade(self);
            let def = def.clone();
            let id2 = id.clone();
            let record = record.clone();
            bindings.push(table.add_commit(
                (format!("{plural}/change"), id.clone()),
                Arc::new(move |action, meta| {
                    let Some(engine) = engine.upgrade() else { return };
                    let Some(fields) = action.fields() else { return };
                    record.apply(fields, Some(meta));
                    let record = record.clone();
                    let def = def.clone();
                    let id3 = id2.clone();
                    let fields = fields.clone();
                    let meta = meta.clone();
                    tokio::spawn(async move {
                        engine.settle_change(&record, &def, &id3, &fields, &meta).await;
                    });
                }),
            ));
        }

        // Delete intents: release retention on confirmation, clear the
        // intent's own reasons on rejection (nothing was mutated).
        {
            let engine = Arc::downgrade(self);
            let def = def.clone();
            let id2 = id.clone();
            let record = record.clone();
            bindings.push(table.add_commit(
                (format!("{plural}/delete"), id.clone()),
                Arc::new(move |_action, meta| {
                    let Some(engine) = engine.upgrade() else { return };
                    let record = record.clone();
                    let def = def.clone();
                    let id3 = id2.clone();
                    let meta = meta.clone();
                    tokio::spawn(async move {
                        match engine.tracker.await_confirmation(&meta.id).await {
                            Ok(()) => {
                                let state = record.state.lock();
                                reasons::release_all(engine.log.as_ref(), &def, &id3, &state);
                            }
                            Err(reason) => {
                                tracing::debug!(plural = %def.plural, id = %id3, %reason, "delete rejected");
                                let _ = engine.log.rewrite_reasons(&meta.id, Vec::new());
                            }
                        }
                    });
                }),
            ));
        }

        // Confirmed deletes: release retention immediately.
        {
            let engine = Arc::downgrade(self);
            let def = def.clone();
            let id2 = id.clone();
            let record = record.clone();
            bindings.push(table.add_commit(
                (format!("{plural}/deleted"), id.clone()),
                Arc::new(move |_action, _meta| {
                    let Some(engine) = engine.upgrade() else { return };
                    let state = record.state.lock();
                    reasons::release_all(engine.log.as_ref(), &def, &id2, &state);
                }),
            ));
        }

        drop(table);
        self.bound.lock().insert(def.channel(&id), bindings);
    }

    // -----------------------------------------------------------------------
    // Change settlement and rollback
    // -----------------------------------------------------------------------

    /// Detached follow-up for one `change` intent.
    async fn settle_change(
        self: &Arc<Self>,
        record: &Arc<SyncedRecord>,
        def: &Arc<MapDef>,
        id: &str,
        fields: &Fields,
        meta: &ActionMeta,
    ) {
        match self.tracker.await_confirmation(&meta.id).await {
            Ok(()) => {
                {
                    let mut state = record.state.lock();
                    reasons::settle_and_prune(
                        self.log.as_ref(),
                        def,
                        id,
                        &mut state,
                        fields,
                        meta,
                    );
                }
                if def.offline {
                    // Leave a confirmed fact for offline replay, carrying the
                    // original causal time.
                    let echo = Action::Changed {
                        plural: def.plural.clone(),
                        id: id.to_string(),
                        fields: fields.clone(),
                    };
                    let mut hints = MetaHints::indexed(def.indexes(id));
                    hints.time = Some(meta.time);
                    if let Err(error) = self.add(echo, hints) {
                        tracing::warn!(plural = %def.plural, id = %id, %error, "changed echo failed");
                    }
                }
            }
            Err(reason) => {
                tracing::debug!(plural = %def.plural, id = %id, %reason, "change rejected, rolling back");
                let _ = self.log.rewrite_reasons(&meta.id, Vec::new());
                self.rollback(record, def, id, fields, meta).await;
            }
        }
    }

    /// Revert each field touched by a rejected change to the nearest earlier
    /// log entry's value, or to unset when history has none. A tombstone in
    /// the scan halts everything — the record was deleted.
    ///
    /// The scan trusts log iteration order (newest-to-oldest per record
    /// index); it does not re-check each entry's clock against the rejected
    /// meta.
    async fn rollback(
        &self,
        record: &Arc<SyncedRecord>,
        def: &Arc<MapDef>,
        id: &str,
        fields: &Fields,
        rejected: &ActionMeta,
    ) {
        let mut reverting: BTreeSet<String> = fields.keys().cloned().collect();
        let index = def.channel(id);
        let scan = self
            .log
            .each_by_index(&index, &mut |action, meta| {
                if action.record_id() != Some(id) || meta.id == rejected.id {
                    return ScanControl::Continue;
                }
                if action.is_constructive() {
                    let Some(entry_fields) = action.fields() else {
                        return ScanControl::Continue;
                    };
                    if !entry_fields.keys().any(|key| reverting.contains(key)) {
                        return ScanControl::Continue;
                    }
                    let mut revert = Fields::new();
                    {
                        let mut state = record.state.lock();
                        for (key, value) in entry_fields {
                            if reverting.remove(key) {
                                // Forget the rejected write so the historical
                                // value is admitted again.
                                state.last_changed.remove(key);
                                revert.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    record.apply(&revert, Some(meta));
                    if reverting.is_empty() {
                        ScanControl::Stop
                    } else {
                        ScanControl::Continue
                    }
                } else if action.is_tombstone() {
                    ScanControl::Stop
                } else {
                    ScanControl::Continue
                }
            })
            .await;
        if let Err(error) = scan {
            tracing::warn!(plural = %def.plural, id = %id, %error, "rollback scan failed");
        }
        // No earlier write found: the fields go back to unset.
        record.unset_fields(reverting);
    }
}
