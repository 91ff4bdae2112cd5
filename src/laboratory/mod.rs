//! Laboratory entities.
//!
//! The physical topology of a lab is described by four kinds of named entities and the
//! cabling between their ports:
//!
//! - [`Host`]: a computer that talks to instruments. At most one host is the local one.
//! - [`Bench`]: a named physical grouping. Instruments and devices point at their bench.
//! - [`Instrument`]: an actively controlled piece of equipment with named ports.
//! - [`Device`]: a passive device under test with named ports.
//! - [`Connection`]: an unordered pair of `(entity, port)` [`Binding`]s.
//!
//! Cross references between entities are plain names. The registry in
//! [`crate::state::LabState`] is the single source of truth for whether a referenced
//! entity exists; an entity never owns the things it points at.
//!
//! Instrument drivers live outside this crate. An instrument only carries the opaque
//! name of its driver and a free-form parameter map that the driver layer owns.

mod connection;
mod entities;

pub use connection::{Binding, Connection};
pub use entities::{Bench, Device, Host, Instrument, Params};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier for one end of a [`Connection`].
///
/// Serializes as `{"instrument": "<name>"}` or `{"device": "<name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRef {
    /// An instrument, by name.
    Instrument(String),
    /// A device, by name.
    Device(String),
}

impl EntityRef {
    /// Reference to the instrument called `name`.
    pub fn instrument(name: impl Into<String>) -> Self {
        EntityRef::Instrument(name.into())
    }

    /// Reference to the device called `name`.
    pub fn device(name: impl Into<String>) -> Self {
        EntityRef::Device(name.into())
    }

    /// The referenced entity's name.
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Instrument(name) | EntityRef::Device(name) => name,
        }
    }

    /// Human readable entity kind, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Instrument(_) => "instrument",
            EntityRef::Device(_) => "device",
        }
    }

    /// Binds this entity to one of its ports.
    pub fn port(&self, port: impl Into<String>) -> Binding {
        Binding::new(self.clone(), port)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.name())
    }
}
