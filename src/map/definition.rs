//! Map-type definitions and their registry.
//!
//! A [`MapDef`] fixes the plural name and the `offline`/`remote` capability
//! flags for every record of one type. Definitions are built once with the
//! fluent [`sync_map`] builder and owned by an explicit [`MapRegistry`] —
//! no process-wide ambient state.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{Result, SyncMapError};

// ============================================================================
// Name validation
// ============================================================================

static PLURAL_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn plural_regex() -> &'static regex::Regex {
    PLURAL_REGEX.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_-]*$").expect("plural regex is valid")
    })
}

// ============================================================================
// MapDef
// ============================================================================

/// Definition of one synced-map record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDef {
    /// Plural type name — the first segment of every wire tag, index tag
    /// and retention reason for this type.
    pub plural: String,
    /// Whether records of this type are reconstructable from the local log
    /// alone. Offline-capable records keep their per-field retention
    /// reasons across unload.
    pub offline: bool,
    /// Whether authoritative state lives on a server. Remote-backed records
    /// subscribe on load and send `create`/`change`/`delete` intents that
    /// wait for confirmation.
    pub remote: bool,
}

impl MapDef {
    /// Server channel for one record: `"{plural}/{id}"`.
    pub fn channel(&self, id: &str) -> String {
        format!("{}/{}", self.plural, id)
    }

    /// Index tags for one record's log entries: the type-wide tag plus the
    /// per-record tag the replay and rollback scans iterate on.
    pub fn indexes(&self, id: &str) -> Vec<String> {
        vec![self.plural.clone(), self.channel(id)]
    }

    /// Retention reason tag for one field: `"{plural}/{id}/{field}"`.
    pub fn field_reason(&self, id: &str, field: &str) -> String {
        format!("{}/{}/{}", self.plural, id, field)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent builder for a [`MapDef`]. Defaults: `remote = true`,
/// `offline = false`.
pub struct MapDefBuilder {
    plural: String,
    offline: bool,
    remote: bool,
}

/// Start defining a map type. Panics if `plural` is not a valid type name
/// (letters, digits, `_`, `-`; must not start with a digit or `-`).
pub fn sync_map(plural: &str) -> MapDefBuilder {
    assert!(
        plural_regex().is_match(plural),
        "Invalid map type name {plural:?}"
    );
    MapDefBuilder {
        plural: plural.to_string(),
        offline: false,
        remote: true,
    }
}

impl MapDefBuilder {
    /// Keep records of this type reconstructable from the local log.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Whether the type is server-backed. `remote(false)` makes every write
    /// a confirmed local fact.
    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn build(self) -> Arc<MapDef> {
        Arc::new(MapDef {
            plural: self.plural,
            offline: self.offline,
            remote: self.remote,
        })
    }
}

// ============================================================================
// MapRegistry
// ============================================================================

/// Explicit owner of the map-type definitions an engine serves.
#[derive(Default)]
pub struct MapRegistry {
    defs: HashMap<String, Arc<MapDef>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Re-registering the same plural replaces the
    /// previous definition (useful for test setup).
    pub fn register(&mut self, def: Arc<MapDef>) -> &mut Self {
        self.defs.insert(def.plural.clone(), def);
        self
    }

    pub fn get(&self, plural: &str) -> Result<Arc<MapDef>> {
        self.defs
            .get(plural)
            .cloned()
            .ok_or_else(|| SyncMapError::UnknownMap(plural.to_string()))
    }

    pub fn contains(&self, plural: &str) -> bool {
        self.defs.contains_key(plural)
    }
}

// ============================================================================
// Tests
// ============================================================================
