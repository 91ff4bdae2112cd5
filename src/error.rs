//! Custom error types for the lab state store.
//!
//! This module defines the primary error type, `LabStateError`, shared by the entity
//! registry, the document layer, the save protocol and the migration engine. Using the
//! `thiserror` crate, it gives every failure a stable variant that callers can match on.
//!
//! ## Error Hierarchy
//!
//! - **Registry errors** (`DuplicateName`, `NotFound`, `InvalidPort`, `UnknownEntity`,
//!   `LoopbackConnection`):
//!   raised by mutations of a `LabState`. The mutation is aborted and the registry is left
//!   exactly as it was before the call.
//! - **Document errors** (`Integrity`, `UnsupportedVersion`, `MigrationNotFound`,
//!   `UnresolvedReference`, `MalformedDocument`): raised while loading a state file.
//!   These are never repaired automatically and require operator action.
//! - **`Conflict`**: the file on disk was changed by someone else since this process
//!   last loaded or saved it. Nothing is written.
//! - **Wrapped errors** (`Io`, `Json`, `Config`): created through `#[from]` so the `?`
//!   operator works across the crate.

use crate::laboratory::{Binding, EntityRef};
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the lab state error type.
pub type AppResult<T> = std::result::Result<T, LabStateError>;

#[derive(Error, Debug)]
pub enum LabStateError {
    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Expected exactly one {kind} named '{name}', found none")]
    NotFound { kind: &'static str, name: String },

    #[error("Port '{port}' is not in {entity}: {available:?}")]
    InvalidPort {
        entity: EntityRef,
        port: String,
        available: Vec<String>,
    },

    #[error("Connection endpoint {0} is not registered")]
    UnknownEntity(EntityRef),

    #[error("Connection joins port {0} to itself")]
    LoopbackConnection(Binding),

    #[error("{from} references unknown {target}")]
    UnresolvedReference { from: String, target: String },

    #[error("Labstate is corrupted. {expected} vs {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Stored labstate version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("No migration registered from labstate version {from}")]
    MigrationNotFound { from: u32 },

    #[error("{}'s hash does not match the one loaded in memory, refusing to overwrite", .path.display())]
    Conflict { path: PathBuf },

    #[error("State has no associated file path")]
    NoPath,

    #[error("Malformed labstate document: {0}")]
    MalformedDocument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for LabStateError {
    fn from(value: figment::Error) -> Self {
        LabStateError::Config(Box::new(value))
    }
}

impl LabStateError {
    /// Returns `true` for failures that mean "there is no usable file here yet":
    /// the file is missing or unreadable, or its text is not JSON at all.
    ///
    /// These are the only failures the deferred global loader turns into an empty
    /// state. Integrity, version and migration failures are not in this set.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, LabStateError::Io(_) | LabStateError::Json(_))
    }

    /// Returns `true` if this is an I/O error for a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LabStateError::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}
