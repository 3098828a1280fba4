//! Reason ledger — which log entries are still needed to rebuild state.
//!
//! A log entry tagged `"{plural}/{id}/{field}"` is retained exactly while
//! it may still be needed to recompute that field after a restart, i.e.
//! until a confirmed later action on the field supersedes it.

use crate::action::{ActionMeta, Fields};
use crate::clock::is_newer;
use crate::log::ActionLog;
use crate::map::definition::MapDef;

use super::record::RecordState;

/// Pre-add phase: tag the draft meta with a retention reason for every
/// field this action could still matter for — everything not already
/// superseded by a confirmed (`last_processed`) later write.
pub(crate) fn retain_for_processing(
    def: &MapDef,
    id: &str,
    state: &RecordState,
    fields: &Fields,
    meta: &mut ActionMeta,
) {
    for key in fields.keys() {
        if is_newer(state.last_processed.get(key), meta) {
            meta.add_reason(def.field_reason(id, key));
        }
    }
}

/// Confirmation phase: advance `last_processed` for every touched field the
/// confirming meta is newer for, then tell the log to drop retained entries
/// older than the new frontier. The frontier entry itself stays — it is the
/// one replay rebuilds from.
pub(crate) fn settle_and_prune(
    log: &dyn ActionLog,
    def: &MapDef,
    id: &str,
    state: &mut RecordState,
    fields: &Fields,
    meta: &ActionMeta,
) {
    for key in fields.keys() {
        if is_newer(state.last_processed.get(key), meta) {
            state.last_processed.insert(key.clone(), meta.clone());
        }
        log.release_reason(&def.field_reason(id, key), state.last_processed.get(key));
    }
}

/// Drop every retention tag for every field of the record. Used on unload
/// of non-offline records and after a confirmed delete.
pub(crate) fn release_all(log: &dyn ActionLog, def: &MapDef, id: &str, state: &RecordState) {
    for key in state.last_changed.keys() {
        log.release_reason(&def.field_reason(id, key), None);
    }
}

// ============================================================================
// Tests
// ============================================================================
