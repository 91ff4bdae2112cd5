//! Forward-only schema migrations.
//!
//! Every historical schema version `n` has one registered step that rewrites a document
//! of version `n` into version `n + 1`. Loading an old file runs the steps in ascending
//! order until the document reaches [`CURRENT_VERSION`]. A gap in the chain fails the
//! whole load with [`LabStateError::MigrationNotFound`]; a partially migrated document
//! is never returned.
//!
//! Steps operate on the document content with the metadata keys already stripped and
//! deserialize it into an explicit schema struct for the version they understand, so
//! each one can be tested on its own.

use crate::error::{AppResult, LabStateError};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// A single step from version `n` to `n + 1`.
pub type MigrationFn = fn(Value, &MigrationContext) -> AppResult<Value>;

/// Facts about the running environment that a migration may need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationContext {
    /// Name given to the local host when an old schema had no explicit one.
    pub local_host_name: String,
}

impl MigrationContext {
    /// Context built from the machine we are running on.
    pub fn from_environment() -> Self {
        let local_host_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self { local_host_name }
    }
}

/// Ordered table of migration steps keyed by the version they start from.
#[derive(Debug, Clone, Default)]
pub struct MigrationTable {
    steps: BTreeMap<u32, MigrationFn>,
}

impl MigrationTable {
    /// A table with no steps.
    pub fn new() -> Self {
        Self::default()
    }

    /// The steps shipped with this build.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(1, v1::to_v2);
        table
    }

    /// Registers the step that upgrades documents of version `from`.
    pub fn register(&mut self, from: u32, step: MigrationFn) -> &mut Self {
        self.steps.insert(from, step);
        self
    }

    /// Upgrades `document` from version `from` to version `to`.
    pub fn migrate(
        &self,
        from: u32,
        to: u32,
        mut document: Value,
        ctx: &MigrationContext,
    ) -> AppResult<Value> {
        for version in from..to {
            let step = self
                .steps
                .get(&version)
                .ok_or(LabStateError::MigrationNotFound { from: version })?;
            warn!(from = version, to, "Attempting labstate patch");
            document = step(document, ctx)?;
        }
        Ok(document)
    }
}

/// Upgrades `document` from `from` to [`CURRENT_VERSION`] with the standard table.
pub fn migrate(from: u32, document: Value, ctx: &MigrationContext) -> AppResult<Value> {
    MigrationTable::standard().migrate(from, CURRENT_VERSION, document, ctx)
}

/// Version 1: instruments and devices were embedded in bench and host records.
pub mod v1 {
    use super::MigrationContext;
    use crate::error::{AppResult, LabStateError};
    use crate::laboratory::{
        Bench, Binding, Connection, Device, EntityRef, Host, Instrument, Params,
    };
    use crate::state::LabDocument;
    use serde::Deserialize;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use tracing::{info, warn};

    /// Version 1 document.
    #[derive(Debug, Deserialize)]
    pub struct LabDocumentV1 {
        /// Hosts, each listing the instruments it drives.
        #[serde(default)]
        pub hosts: Vec<HostV1>,
        /// Benches, each listing the instruments and devices on it.
        #[serde(default)]
        pub benches: Vec<BenchV1>,
        /// Connections, same shape as in version 2.
        #[serde(default)]
        pub connections: Vec<Connection>,
    }

    /// Version 1 host.
    #[derive(Debug, Deserialize)]
    pub struct HostV1 {
        /// Host name.
        pub name: String,
        /// Network address.
        #[serde(default)]
        pub hostname: Option<String>,
        /// Hardware address.
        #[serde(default)]
        pub mac_address: Option<String>,
        /// Operating system.
        #[serde(default)]
        pub os: Option<String>,
        /// Instruments driven by this host.
        #[serde(default)]
        pub instruments: Vec<InstrumentV1>,
    }

    /// Version 1 bench.
    #[derive(Debug, Deserialize)]
    pub struct BenchV1 {
        /// Bench name.
        pub name: String,
        /// Instruments on this bench.
        #[serde(default)]
        pub instruments: Vec<InstrumentV1>,
        /// Devices on this bench.
        #[serde(default)]
        pub devices: Vec<DeviceV1>,
    }

    /// Version 1 instrument, with no bench or host reference of its own.
    #[derive(Debug, Clone, Deserialize)]
    pub struct InstrumentV1 {
        /// Instrument name. Not unique in version 1.
        pub name: String,
        /// Declared ports.
        #[serde(default)]
        pub ports: Vec<String>,
        /// Bus address.
        #[serde(default)]
        pub address: Option<String>,
        /// Driver identifier.
        #[serde(default)]
        pub driver: Option<String>,
        /// Hardware identification string.
        #[serde(default)]
        pub id_string: Option<String>,
        /// Driver-owned settings.
        #[serde(default)]
        pub params: Params,
    }

    /// Version 1 device.
    #[derive(Debug, Clone, Deserialize)]
    pub struct DeviceV1 {
        /// Device name. Not unique in version 1.
        pub name: String,
        /// Declared ports.
        #[serde(default)]
        pub ports: Vec<String>,
        /// Descriptive parameters.
        #[serde(default)]
        pub params: Params,
    }

    impl InstrumentV1 {
        /// Copies this record's own fields over `target`, keeping its references.
        fn merge_into(self, target: &mut Instrument) {
            target.ports = self.ports;
            target.address = self.address;
            target.driver = self.driver;
            target.id_string = self.id_string;
            target.params.extend(self.params);
        }
    }

    /// Flattens bench- and host-embedded entities into the top-level collections and
    /// adds an explicit local host.
    ///
    /// Repeated names are merged: the later record's fields win while bench and host
    /// references accumulate. Any host that happens to share the local host's name is
    /// replaced by the local host.
    pub fn to_v2(document: Value, ctx: &MigrationContext) -> AppResult<Value> {
        let old: LabDocumentV1 = serde_json::from_value(document)
            .map_err(|e| LabStateError::MalformedDocument(format!("version 1: {e}")))?;

        let mut benches = BTreeMap::new();
        let mut hosts = BTreeMap::new();
        let mut instruments: BTreeMap<String, Instrument> = BTreeMap::new();
        let mut devices: BTreeMap<String, Device> = BTreeMap::new();

        for old_bench in old.benches {
            benches.insert(old_bench.name.clone(), Bench::new(old_bench.name.clone()));
            for record in old_bench.instruments {
                let entry = instruments
                    .entry(record.name.clone())
                    .or_insert_with(|| Instrument::new(record.name.clone()));
                record.merge_into(entry);
                entry.bench = Some(old_bench.name.clone());
            }
            for record in old_bench.devices {
                let entry = devices
                    .entry(record.name.clone())
                    .or_insert_with(|| Device::new(record.name.clone()));
                entry.ports = record.ports;
                entry.params.extend(record.params);
                entry.bench = Some(old_bench.name.clone());
            }
        }

        for old_host in old.hosts {
            let host = Host {
                name: old_host.name.clone(),
                hostname: old_host.hostname,
                mac_address: old_host.mac_address,
                os: old_host.os,
                is_local: false,
            };
            hosts.insert(host.name.clone(), host);
            for record in old_host.instruments {
                let entry = instruments
                    .entry(record.name.clone())
                    .or_insert_with(|| Instrument::new(record.name.clone()));
                record.merge_into(entry);
                entry.host = Some(old_host.name.clone());
            }
        }

        info!(host = %ctx.local_host_name, "Adding explicit local host");
        hosts.insert(
            ctx.local_host_name.clone(),
            Host::local(ctx.local_host_name.clone()),
        );

        let connections = carry_connections(old.connections, &instruments, &devices);

        let document = LabDocument {
            hosts: hosts.into_values().collect(),
            benches: benches.into_values().collect(),
            instruments: instruments.into_values().collect(),
            devices: devices.into_values().collect(),
            connections,
        };
        Ok(serde_json::to_value(document)?)
    }

    /// Keeps the connections that still fit the flattened entities.
    ///
    /// Merging repeated records can drop a port that a connection was plugged into; such
    /// connections are discarded. A port used by several connections keeps the last one,
    /// as replaying them through the registry would.
    fn carry_connections(
        connections: Vec<Connection>,
        instruments: &BTreeMap<String, Instrument>,
        devices: &BTreeMap<String, Device>,
    ) -> Vec<Connection> {
        let declared = |end: &Binding| match &end.entity {
            EntityRef::Instrument(name) => instruments.get(name).is_some_and(|i| i.has_port(&end.port)),
            EntityRef::Device(name) => devices.get(name).is_some_and(|d| d.has_port(&end.port)),
        };

        let mut kept: Vec<Connection> = Vec::new();
        for connection in connections {
            let [a, b] = connection.ends();
            if a == b || !declared(a) || !declared(b) {
                warn!(connection = %connection, "Dropping connection to an undeclared port");
                continue;
            }
            kept.retain(|existing| {
                let keep = !existing.shares_binding(&connection);
                if !keep {
                    warn!(connection = %existing, "Dropping connection superseded on the same port");
                }
                keep
            });
            kept.push(connection);
        }
        kept
    }
}
