//! Logical-clock identifiers and the causal comparison every merge and
//! rollback decision rests on.
//!
//! The order is total and identical on every client without coordination:
//! wall-clock milliseconds first, then the per-client counter, then the
//! client identifier lexicographically. No drift correction is applied —
//! convergence depends on this deterministic tie-break, not on real time.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::action::ActionMeta;

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Identifier of one log entry: `(timestamp, per-client counter, client)`.
///
/// The derived `Ord` (field order is significant) is the cross-client total
/// order. `Display` renders the conventional `"{time} {seq} {client}"` form.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ActionId {
    /// Milliseconds since the Unix epoch at generation time.
    pub time: i64,
    /// Monotonic counter distinguishing ids generated in the same millisecond.
    pub seq: u64,
    /// Opaque client identifier; the final lexicographic tie-break.
    pub client: String,
}

impl ActionId {
    pub fn new(time: i64, seq: u64, client: impl Into<String>) -> Self {
        Self {
            time,
            seq,
            client: client.into(),
        }
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.time, self.seq, self.client)
    }
}

// ---------------------------------------------------------------------------
// is_newer
// ---------------------------------------------------------------------------

/// Does `next` causally follow `prev`?
///
/// `None` always loses — a field that was never written accepts any write.
/// Equal metas are NOT newer, which makes re-application of the same
/// `(field, meta)` pair a no-op.
///
/// The meta's own `time` is compared before the id's counter: a `changed`
/// fact appended later but stamped with the original action's time sorts
/// with the original, not with its append position.
pub fn is_newer(prev: Option<&ActionMeta>, next: &ActionMeta) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    match prev.time.cmp(&next.time) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => match prev.id.seq.cmp(&next.id.seq) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => prev.id.client < next.id.client,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
