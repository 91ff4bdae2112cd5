//! The lab state aggregate and its persistence.
//!
//! [`LabState`] owns four name-keyed collections (hosts, benches, instruments and
//! devices) plus the list of connections between ports. It is persisted as a single
//! JSON document that carries a schema version, a SHA-256 digest of its content, the
//! name of the last user who saved it, and a save timestamp.
//!
//! ## Submodules
//!
//! - **`registry`**: typed mutations and lookups (`upsert_host`, `insert_instrument`,
//!   `update_connections`, ...).
//! - **`document`**: the explicit on-disk schema, canonical rendering and digests.
//! - **`store`**: `load`/`save` with integrity verification and optimistic-concurrency
//!   conflict detection.
//! - **`migration`**: the ordered table of forward-only schema patches.
//! - **`global`**: the process-wide handle that loads the default file on first use.
//!
//! ## Concurrency
//!
//! A `LabState` is a plain value; mutations take `&mut self`. Across processes the
//! only coordination is the digest comparison performed by [`LabState::save`]. No file
//! lock is held between that comparison and the write, so another process saving in
//! that narrow window goes undetected.

pub mod document;
pub mod global;
pub mod migration;
pub mod registry;
pub mod store;

pub use document::LabDocument;
pub use migration::{MigrationContext, MigrationTable, CURRENT_VERSION};
pub use store::{LoadOptions, SaveOptions, SaveOutcome, VerifyReport};

use crate::laboratory::{Bench, Connection, Device, Host, Instrument};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where an in-memory state stands relative to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStatus {
    /// Freshly constructed or loaded, no mutation since.
    #[default]
    Unmodified,
    /// Mutated since the last load or save.
    Dirty,
    /// Written to disk by the last save.
    Saved,
    /// The last save was refused because the file changed underneath us.
    Conflict,
}

/// Metadata stamped on a document when it is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMetadata {
    /// Schema version of the in-memory representation.
    pub version: u32,
    /// Digest recorded at the last successful load or save.
    pub sha256: Option<String>,
    /// Account name of the last saver.
    pub user: Option<String>,
    /// Human readable timestamp of the last save.
    pub datetime: Option<String>,
}

/// The versioned, hash-verified record of everything in the lab.
#[derive(Debug, Clone)]
pub struct LabState {
    pub(crate) hosts: BTreeMap<String, Host>,
    pub(crate) benches: BTreeMap<String, Bench>,
    pub(crate) instruments: BTreeMap<String, Instrument>,
    pub(crate) devices: BTreeMap<String, Device>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) meta: StateMetadata,
    pub(crate) path: Option<PathBuf>,
    pub(crate) status: SaveStatus,
}

impl Default for LabState {
    fn default() -> Self {
        Self::new()
    }
}

impl LabState {
    /// An empty lab at the current schema version, not yet associated with a file.
    pub fn new() -> Self {
        Self {
            hosts: BTreeMap::new(),
            benches: BTreeMap::new(),
            instruments: BTreeMap::new(),
            devices: BTreeMap::new(),
            connections: Vec::new(),
            meta: StateMetadata {
                version: CURRENT_VERSION,
                ..Default::default()
            },
            path: None,
            status: SaveStatus::Unmodified,
        }
    }

    /// An empty lab that saves to `path` by default.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Hosts keyed by name.
    pub fn hosts(&self) -> &BTreeMap<String, Host> {
        &self.hosts
    }

    /// Benches keyed by name.
    pub fn benches(&self) -> &BTreeMap<String, Bench> {
        &self.benches
    }

    /// Instruments keyed by name.
    pub fn instruments(&self) -> &BTreeMap<String, Instrument> {
        &self.instruments
    }

    /// Devices keyed by name.
    pub fn devices(&self) -> &BTreeMap<String, Device> {
        &self.devices
    }

    /// All connections, in insertion order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Save metadata from the last load or save.
    pub fn metadata(&self) -> &StateMetadata {
        &self.meta
    }

    /// Digest recorded at the last load or save, if any.
    pub fn sha256(&self) -> Option<&str> {
        self.meta.sha256.as_deref()
    }

    /// File this state was last loaded from or saved to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Associates the state with a file without touching the disk.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// Current position in the save state machine.
    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.status = SaveStatus::Dirty;
    }

    fn sorted_connections(&self) -> Vec<&Connection> {
        let mut connections: Vec<_> = self.connections.iter().collect();
        connections.sort();
        connections
    }
}

/// Structural equality over the entity collections and the set of connections.
///
/// Metadata, file path and save status are ignored, as is connection order.
impl PartialEq for LabState {
    fn eq(&self, other: &Self) -> bool {
        self.hosts == other.hosts
            && self.benches == other.benches
            && self.instruments == other.instruments
            && self.devices == other.devices
            && self.sorted_connections() == other.sorted_connections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laboratory::EntityRef;

    #[test]
    fn new_state_is_empty_and_current() {
        let lab = LabState::new();
        assert!(lab.hosts().is_empty());
        assert!(lab.connections().is_empty());
        assert_eq!(lab.metadata().version, CURRENT_VERSION);
        assert_eq!(lab.status(), SaveStatus::Unmodified);
        assert!(lab.sha256().is_none());
    }

    #[test]
    fn equality_ignores_connection_order_and_metadata() {
        let a_conn = Connection::new(
            EntityRef::instrument("laser").port("out"),
            EntityRef::device("chip").port("in"),
        );
        let b_conn = Connection::new(
            EntityRef::instrument("scope").port("ch1"),
            EntityRef::device("chip").port("out"),
        );

        let mut first = LabState::new();
        first.connections = vec![a_conn.clone(), b_conn.clone()];
        let mut second = LabState::with_path("/tmp/other.json");
        second.connections = vec![b_conn, a_conn];
        second.meta.sha256 = Some("00".repeat(32));

        assert_eq!(first, second);
    }
}
