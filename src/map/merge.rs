//! Field merge engine — per-field last-writer-wins.
//!
//! Every write to a record's fields goes through [`apply_if_newer`]. With a
//! meta, a field is written only when the meta causally follows whatever
//! set the field's current value; without one, the write is an optimistic
//! local overwrite that leaves `last_changed` untouched and tags the field
//! provisional until its action's meta comes back through.
//!
//! The merge is idempotent under re-application of the same `(field, meta)`
//! pair and commutative per field: deliver any set of updates in any order
//! and the surviving value is the causally newest.

use serde_json::Value;

use crate::action::{ActionMeta, Fields};
use crate::clock::is_newer;

use super::record::RecordState;

/// Apply `fields` to the record state, per-field, keeping only causally
/// newer writes. Returns the `(field, value)` pairs whose *visible* value
/// changed, for listener notification.
pub(crate) fn apply_if_newer(
    state: &mut RecordState,
    fields: &Fields,
    meta: Option<&ActionMeta>,
) -> Vec<(String, Value)> {
    // Admission first, writes second: last_changed for one field must not
    // influence the decision for another mid-loop.
    let mut accepted: Vec<(&String, &Value)> = Vec::new();
    for (key, value) in fields {
        let admit = match meta {
            Some(m) => is_newer(state.last_changed.get(key), m),
            None => true,
        };
        if admit {
            accepted.push((key, value));
        }
    }

    let mut changed = Vec::new();
    for (key, value) in accepted {
        match meta {
            Some(m) => {
                state.last_changed.insert(key.clone(), m.clone());
                state.provisional.remove(key);
            }
            None => {
                state.provisional.insert(key.clone());
            }
        }
        let previous = state.fields.insert(key.clone(), value.clone());
        if previous.as_ref() != Some(value) {
            changed.push((key.clone(), value.clone()));
        }
    }
    changed
}

/// Remove a field's visible value (rollback found no earlier write).
/// Returns whether a value was actually removed.
pub(crate) fn unset(state: &mut RecordState, key: &str) -> bool {
    state.provisional.remove(key);
    state.fields.remove(key).is_some()
}

// ============================================================================
// Tests
// ============================================================================
