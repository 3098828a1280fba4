//! Error taxonomy for the synced-map engine.
//!
//! Load failures surface to callers as typed errors; change/delete
//! rejections are recovered locally (rollback) and reach the caller only
//! through the future returned by the request that caused them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::ActionId;

// ---------------------------------------------------------------------------
// UndoReason
// ---------------------------------------------------------------------------

/// Reason code carried by an `undo` confirmation.
///
/// Serializes to the wire codes `"notFound"`, `"denied"` and `"error"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UndoReason {
    /// The server does not know the record or channel.
    NotFound,
    /// The server refused the action for this client.
    Denied,
    /// The server failed while processing the action.
    Error,
}

impl std::fmt::Display for UndoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "notFound"),
            Self::Denied => write!(f, "denied"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncMapError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SyncMapError {
    /// Loading found no record: no remote backing and the offline replay
    /// came up empty, or the server reported the channel absent.
    #[error("Record not found: {plural}/{id}")]
    NotFound { plural: String, id: String },

    /// The server refused a subscribe, create, change or delete.
    #[error("Access denied for {plural}/{id}")]
    AccessDenied { plural: String, id: String },

    /// The server undid an action. Carries the undone action's id and the
    /// server-provided reason code.
    #[error("Action {id} was undone by the server ({reason})")]
    Rejected { id: ActionId, reason: UndoReason },

    /// The record was torn down while an outcome was still pending. Not a
    /// protocol failure — confirmation waits have no timeout.
    #[error("{plural}/{id} was unloaded before its outcome arrived")]
    Unconfirmed { plural: String, id: String },

    /// A map type was used without being registered first.
    #[error("Unknown map type \"{0}\" — register it before use")]
    UnknownMap(String),

    /// An index or reason invariant the engine relies on was violated.
    /// Indicates a collaborator or programming defect, never user input.
    #[error("Log inconsistency: {0}")]
    LogInconsistency(String),
}

impl SyncMapError {
    /// Translate a server undo into the load-failure taxonomy for a
    /// specific record.
    pub fn from_undo(reason: UndoReason, undone: ActionId, plural: &str, id: &str) -> Self {
        match reason {
            UndoReason::NotFound => Self::NotFound {
                plural: plural.to_string(),
                id: id.to_string(),
            },
            UndoReason::Denied => Self::AccessDenied {
                plural: plural.to_string(),
                id: id.to_string(),
            },
            UndoReason::Error => Self::Rejected {
                id: undone,
                reason: UndoReason::Error,
            },
        }
    }
}

/// Convenience alias — the default error type is `SyncMapError`.
pub type Result<T, E = SyncMapError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
