//! Synced maps — optimistically-updated, server-owned records over an
//! append-only action log.
//!
//! A [`map::SyncMapEngine`] turns a stream of timestamped, causally-ordered
//! actions into consistent field-level record state. Local writes apply
//! immediately (offline or before server acknowledgment); concurrent edits
//! from other clients converge deterministically through per-field
//! last-writer-wins merge; rejected optimistic writes roll back from the
//! log's history; and log entries are garbage-collected once no longer
//! needed to reconstruct state after a restart.
//!
//! The engine consumes two collaborators through narrow traits: the
//! [`log::ActionLog`] (append, indexed iteration, reason-scoped retention)
//! and the [`track::ConfirmationTracker`] (the fate of actions sent to the
//! server). In-process implementations of both ship with the crate.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use sync_map::log::MemoryLog;
//! use sync_map::map::{sync_map, MapRegistry, SyncMapEngine};
//! use sync_map::track::ConfirmationHub;
//!
//! # async fn demo() -> sync_map::error::Result<()> {
//! let mut registry = MapRegistry::new();
//! registry.register(sync_map("tasks").offline(true).remote(false).build());
//!
//! let engine = SyncMapEngine::new(
//!     Arc::new(MemoryLog::with_random_client()),
//!     Arc::new(ConfirmationHub::new()),
//!     registry,
//! );
//!
//! let task = engine.create_record(
//!     "tasks",
//!     "t1",
//!     [("title".to_string(), json!("write docs"))].into(),
//! )?;
//! engine
//!     .request_change("tasks", "t1", [("done".to_string(), json!(true))].into())
//!     .await?;
//! assert_eq!(task.get("done"), Some(json!(true)));
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod clock;
pub mod error;
pub mod log;
pub mod map;
pub mod track;

pub use action::{Action, ActionMeta, Fields};
pub use clock::{is_newer, ActionId};
pub use error::{Result, SyncMapError, UndoReason};
pub use log::{ActionLog, MemoryLog, MetaHints, ScanControl};
pub use map::{sync_map, FieldChange, LoadState, MapDef, MapRegistry, SyncMapEngine, SyncedRecord};
pub use track::{ConfirmationHub, ConfirmationTracker};
