//! The synced-map core: definitions, records, merge, retention, lifecycle.

pub mod definition;
pub mod engine;
pub(crate) mod merge;
pub(crate) mod reasons;
pub mod record;

pub use definition::{sync_map, MapDef, MapDefBuilder, MapRegistry};
pub use engine::SyncMapEngine;
pub use record::{FieldChange, LoadState, SyncedRecord, Unsubscribe};
