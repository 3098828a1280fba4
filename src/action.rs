//! Actions and their log envelope.
//!
//! An [`Action`] is one intended or confirmed state change; [`ActionMeta`]
//! is the envelope the log stores alongside it. Metas are immutable once
//! written except for `reasons`, which retention bookkeeping may clear or
//! replace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::ActionId;
use crate::error::UndoReason;

/// Field name → value mapping carried by constructive actions.
pub type Fields = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// ActionMeta
// ---------------------------------------------------------------------------

/// The log envelope for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    pub id: ActionId,
    /// Timestamp used for causal comparison. Defaults to `id.time`, but a
    /// confirmed `changed` fact reuses the original action's time.
    pub time: i64,
    /// Retention tags. The entry stays in the log while this is non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Index tags enabling per-record iteration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<String>,
    /// Whether the action must reach the server.
    #[serde(default)]
    pub sync: bool,
}

impl ActionMeta {
    /// Envelope with `time` taken from the id and no tags.
    pub fn new(id: ActionId) -> Self {
        let time = id.time;
        Self {
            id,
            time,
            reasons: Vec::new(),
            indexes: Vec::new(),
            sync: false,
        }
    }

    /// Add an index tag, keeping the list free of duplicates.
    pub fn add_index(&mut self, index: String) {
        if !self.indexes.contains(&index) {
            self.indexes.push(index);
        }
    }

    /// Add a retention reason, keeping the list free of duplicates.
    pub fn add_reason(&mut self, reason: String) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One intended or confirmed state change, tagged by type.
///
/// The `create`/`change`/`delete` verbs are client intents that require
/// server confirmation; `created`/`changed`/`deleted` are confirmed facts.
/// `subscribe`/`unsubscribe` manage server channels, and `processed`/`undo`
/// confirm or reject a previously-sent action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Create {
        plural: String,
        id: String,
        fields: Fields,
    },
    Created {
        plural: String,
        id: String,
        fields: Fields,
    },
    Change {
        plural: String,
        id: String,
        fields: Fields,
    },
    Changed {
        plural: String,
        id: String,
        fields: Fields,
    },
    Delete {
        plural: String,
        id: String,
    },
    Deleted {
        plural: String,
        id: String,
    },
    Subscribe {
        channel: String,
        #[serde(default)]
        creating: bool,
    },
    Unsubscribe {
        channel: String,
    },
    Processed {
        id: ActionId,
    },
    Undo {
        id: ActionId,
        reason: UndoReason,
    },
}

impl Action {
    /// The wire type tag: `"{plural}/{verb}"` for record actions, the bare
    /// verb for protocol actions. Dispatch-table keys use this form.
    pub fn type_name(&self) -> String {
        match self {
            Self::Create { plural, .. } => format!("{plural}/create"),
            Self::Created { plural, .. } => format!("{plural}/created"),
            Self::Change { plural, .. } => format!("{plural}/change"),
            Self::Changed { plural, .. } => format!("{plural}/changed"),
            Self::Delete { plural, .. } => format!("{plural}/delete"),
            Self::Deleted { plural, .. } => format!("{plural}/deleted"),
            Self::Subscribe { .. } => "subscribe".to_string(),
            Self::Unsubscribe { .. } => "unsubscribe".to_string(),
            Self::Processed { .. } => "processed".to_string(),
            Self::Undo { .. } => "undo".to_string(),
        }
    }

    /// The record id a map action is scoped to, if any.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Create { id, .. }
            | Self::Created { id, .. }
            | Self::Change { id, .. }
            | Self::Changed { id, .. }
            | Self::Delete { id, .. }
            | Self::Deleted { id, .. } => Some(id),
            _ => None,
        }
    }

    /// The field mapping of a constructive action, if any.
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Self::Create { fields, .. }
            | Self::Created { fields, .. }
            | Self::Change { fields, .. }
            | Self::Changed { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Does this action build record state? (`create`/`created`/`change`/
    /// `changed` — the entries offline replay and rollback feed on.)
    pub fn is_constructive(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Created { .. } | Self::Change { .. } | Self::Changed { .. }
        )
    }

    /// Is this a `delete`/`deleted` tombstone? Encountering one halts
    /// history scans for the record.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Delete { .. } | Self::Deleted { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
