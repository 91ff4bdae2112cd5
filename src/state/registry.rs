//! Typed mutations and lookups on [`LabState`].
//!
//! Hosts and benches are upserted: a record with an existing name overwrites the old
//! one. Instruments and devices are inserted: a second record with the same name is
//! rejected with [`LabStateError::DuplicateName`] and must be deleted explicitly first.
//!
//! Every successful mutation moves the state to [`super::SaveStatus::Dirty`].

use super::LabState;
use crate::error::{AppResult, LabStateError};
use crate::laboratory::{Bench, Binding, Connection, Device, EntityRef, Host, Instrument};
use tracing::{debug, info, warn};

impl LabState {
    /// Inserts or overwrites hosts by name.
    ///
    /// At most one host may be local. An incoming local host whose name differs from
    /// the current local host is skipped with a warning; the rest of the batch is still
    /// applied. Overwriting the local host with a non-local record is allowed but
    /// warned about.
    ///
    /// Returns the names of the hosts that were rejected.
    pub fn upsert_host<I>(&mut self, hosts: I) -> Vec<String>
    where
        I: IntoIterator<Item = Host>,
    {
        let mut local_name: Option<String> = None;
        for host in self.hosts.values().filter(|h| h.is_local) {
            if let Some(existing) = &local_name {
                warn!(first = %existing, second = %host.name, "Duplicate local host found in lab hosts");
            }
            local_name = Some(host.name.clone());
        }

        let mut rejected = Vec::new();
        for host in hosts {
            if host.is_local {
                match &local_name {
                    Some(current) if *current != host.name => {
                        warn!(
                            local = %current,
                            host = %host.name,
                            "Local host is already present, not updating host"
                        );
                        rejected.push(host.name);
                        continue;
                    }
                    _ => local_name = Some(host.name.clone()),
                }
            }

            if self.hosts.contains_key(&host.name) {
                info!(host = %host.name, "Overwriting host");
                if local_name.as_deref() == Some(host.name.as_str()) && !host.is_local {
                    warn!(host = %host.name, "Overwrite removes the local host");
                    local_name = None;
                }
            }
            self.hosts.insert(host.name.clone(), host);
            self.mark_dirty();
        }

        if local_name.is_none() {
            warn!("Local host not yet present");
        }
        rejected
    }

    /// Inserts or overwrites benches by name.
    pub fn upsert_bench<I>(&mut self, benches: I)
    where
        I: IntoIterator<Item = Bench>,
    {
        for bench in benches {
            self.benches.insert(bench.name.clone(), bench);
            self.mark_dirty();
        }
    }

    /// Adds an instrument, registering its bench and host if they are new.
    pub fn insert_instrument(&mut self, instrument: Instrument) -> AppResult<()> {
        if self.instruments.contains_key(&instrument.name) {
            return Err(LabStateError::DuplicateName {
                kind: "instrument",
                name: instrument.name,
            });
        }
        if let Some(bench) = &instrument.bench {
            self.register_missing_bench(bench);
        }
        if let Some(host) = &instrument.host {
            if !self.hosts.contains_key(host) {
                warn!(host = %host, instrument = %instrument.name, "Inserting *new* host");
                self.hosts.insert(host.clone(), Host::new(host.clone()));
            }
        }
        self.instruments.insert(instrument.name.clone(), instrument);
        self.mark_dirty();
        Ok(())
    }

    /// Adds a device, registering its bench if it is new.
    pub fn insert_device(&mut self, device: Device) -> AppResult<()> {
        if self.devices.contains_key(&device.name) {
            return Err(LabStateError::DuplicateName {
                kind: "device",
                name: device.name,
            });
        }
        if let Some(bench) = &device.bench {
            self.register_missing_bench(bench);
        }
        self.devices.insert(device.name.clone(), device);
        self.mark_dirty();
        Ok(())
    }

    fn register_missing_bench(&mut self, bench: &str) {
        if !self.benches.contains_key(bench) {
            warn!(bench = %bench, "Inserting *new* bench");
            self.benches.insert(bench.to_string(), Bench::new(bench));
        }
    }

    /// Removes the instrument called `name` and every connection that uses it.
    pub fn delete_instrument_by_name(&mut self, name: &str) -> AppResult<Instrument> {
        let instrument = self
            .instruments
            .remove(name)
            .ok_or_else(|| LabStateError::NotFound {
                kind: "instrument",
                name: name.to_string(),
            })?;
        self.retire_connections_of(&instrument.entity_ref());
        self.mark_dirty();
        Ok(instrument)
    }

    /// Removes the device called `name` and every connection that uses it.
    pub fn delete_device_by_name(&mut self, name: &str) -> AppResult<Device> {
        let device = self
            .devices
            .remove(name)
            .ok_or_else(|| LabStateError::NotFound {
                kind: "device",
                name: name.to_string(),
            })?;
        self.retire_connections_of(&device.entity_ref());
        self.mark_dirty();
        Ok(device)
    }

    fn retire_connections_of(&mut self, entity: &EntityRef) {
        self.connections.retain(|conn| {
            let keep = !conn.touches(entity);
            if !keep {
                warn!(connection = %conn, "Deleting connection of removed {}", entity.kind());
            }
            keep
        });
    }

    /// Applies a batch of connections.
    ///
    /// Every port in the batch is validated before anything changes, so a single bad
    /// port leaves the existing connections untouched. Each connection then replaces
    /// any existing connection that shares one of its `(entity, port)` bindings, since a
    /// port carries at most one cable.
    pub fn update_connections<I>(&mut self, connections: I) -> AppResult<()>
    where
        I: IntoIterator<Item = Connection>,
    {
        let connections: Vec<Connection> = connections.into_iter().collect();
        for connection in &connections {
            self.validate_connection(connection)?;
        }

        for connection in connections {
            if self.connections.contains(&connection) {
                debug!(connection = %connection, "Connection already exists");
                continue;
            }
            self.connections.retain(|existing| {
                let keep = !existing.shares_binding(&connection);
                if !keep {
                    warn!(connection = %existing, "Deleting existing connection");
                }
                keep
            });
            self.connections.push(connection);
            self.mark_dirty();
        }
        Ok(())
    }

    /// Checks that both ends name registered entities and declared ports, and that the
    /// two ends are different ports.
    pub(crate) fn validate_connection(&self, connection: &Connection) -> AppResult<()> {
        let [a, b] = connection.ends();
        if a == b {
            let err = LabStateError::LoopbackConnection(a.clone());
            tracing::error!("{err}");
            return Err(err);
        }
        self.validate_binding(a)?;
        self.validate_binding(b)
    }

    fn validate_binding(&self, binding: &Binding) -> AppResult<()> {
        let ports = self
            .ports_of(&binding.entity)
            .ok_or_else(|| LabStateError::UnknownEntity(binding.entity.clone()))?;
        if ports.iter().any(|p| *p == binding.port) {
            Ok(())
        } else {
            let err = LabStateError::InvalidPort {
                entity: binding.entity.clone(),
                port: binding.port.clone(),
                available: ports.to_vec(),
            };
            tracing::error!("{err}");
            Err(err)
        }
    }

    /// Declared ports of a registered instrument or device.
    pub fn ports_of(&self, entity: &EntityRef) -> Option<&[String]> {
        match entity {
            EntityRef::Instrument(name) => self.instruments.get(name).map(|i| i.ports.as_slice()),
            EntityRef::Device(name) => self.devices.get(name).map(|d| d.ports.as_slice()),
        }
    }

    /// Connections with at least one end on `entity`.
    pub fn connections_of<'a>(
        &'a self,
        entity: &'a EntityRef,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |conn| conn.touches(entity))
    }

    /// The connection plugged into `binding`, if any.
    pub fn connection_at(&self, binding: &Binding) -> Option<&Connection> {
        self.connections.iter().find(|conn| conn.involves(binding))
    }

    /// Instrument by name.
    pub fn instrument(&self, name: &str) -> Option<&Instrument> {
        self.instruments.get(name)
    }

    /// Device by name.
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    /// The host marked local, if there is one.
    pub fn local_host(&self) -> Option<&Host> {
        self.hosts.values().find(|h| h.is_local)
    }

    /// Bench the instrument sits on.
    pub fn bench_of_instrument(&self, instrument: &Instrument) -> Option<&Bench> {
        instrument.bench.as_ref().and_then(|b| self.benches.get(b))
    }

    /// Bench the device sits on.
    pub fn bench_of_device(&self, device: &Device) -> Option<&Bench> {
        device.bench.as_ref().and_then(|b| self.benches.get(b))
    }

    /// Host that communicates with the instrument.
    pub fn host_of_instrument(&self, instrument: &Instrument) -> Option<&Host> {
        instrument.host.as_ref().and_then(|h| self.hosts.get(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SaveStatus;
    use tracing_test::traced_test;

    fn lab_with_cabling() -> LabState {
        let mut lab = LabState::new();
        lab.insert_instrument(Instrument::new("laser").with_ports(["out", "monitor"]))
            .unwrap();
        lab.insert_device(Device::new("chip_b").with_ports(["in", "out"]))
            .unwrap();
        lab.insert_device(Device::new("chip_c").with_ports(["in", "drop"]))
            .unwrap();
        lab
    }

    #[test]
    #[traced_test]
    fn second_local_host_is_rejected() {
        let mut lab = LabState::new();
        assert!(lab.upsert_host([Host::local("alpha")]).is_empty());

        let rejected = lab.upsert_host([Host::local("beta"), Host::new("gamma")]);

        assert_eq!(rejected, vec!["beta".to_string()]);
        assert_eq!(lab.local_host().map(|h| h.name.as_str()), Some("alpha"));
        assert!(!lab.hosts().contains_key("beta"));
        assert!(lab.hosts().contains_key("gamma"));
        assert!(logs_contain("Local host is already present"));
    }

    #[test]
    #[traced_test]
    fn overwriting_local_host_with_remote_warns_but_proceeds() {
        let mut lab = LabState::new();
        let _ = lab.upsert_host([Host::local("alpha")]);
        let rejected = lab.upsert_host([Host::new("alpha").with_os("linux")]);

        assert!(rejected.is_empty());
        assert!(lab.local_host().is_none());
        assert_eq!(lab.hosts()["alpha"].os.as_deref(), Some("linux"));
        assert!(logs_contain("Overwrite removes the local host"));
        assert!(logs_contain("Local host not yet present"));
    }

    #[test]
    fn same_local_host_can_be_updated() {
        let mut lab = LabState::new();
        let _ = lab.upsert_host([Host::local("alpha")]);
        let rejected = lab.upsert_host([Host::local("alpha").with_hostname("alpha.lab")]);
        assert!(rejected.is_empty());
        assert_eq!(
            lab.local_host().and_then(|h| h.hostname.as_deref()),
            Some("alpha.lab")
        );
    }

    #[test]
    #[traced_test]
    fn insert_instrument_registers_bench_and_host() {
        let mut lab = LabState::new();
        lab.insert_instrument(Instrument::new("scope").on_bench("b1").on_host("remote"))
            .unwrap();

        assert!(lab.benches().contains_key("b1"));
        assert!(!lab.hosts()["remote"].is_local);
        assert_eq!(lab.status(), SaveStatus::Dirty);
        let scope = lab.instrument("scope").unwrap();
        assert_eq!(lab.bench_of_instrument(scope), Some(&Bench::new("b1")));
        assert_eq!(lab.host_of_instrument(scope).map(|h| h.name.as_str()), Some("remote"));
        assert!(logs_contain("Inserting *new* bench"));
    }

    #[test]
    fn duplicate_instrument_is_rejected() {
        let mut lab = LabState::new();
        lab.insert_instrument(Instrument::new("scope").with_ports(["ch1"]))
            .unwrap();
        let err = lab
            .insert_instrument(Instrument::new("scope").with_ports(["ch2"]))
            .unwrap_err();

        assert!(matches!(err, LabStateError::DuplicateName { kind: "instrument", .. }));
        assert_eq!(lab.instrument("scope").unwrap().ports, vec!["ch1".to_string()]);
    }

    #[test]
    fn duplicate_device_is_rejected() {
        let mut lab = LabState::new();
        lab.insert_device(Device::new("chip")).unwrap();
        let err = lab.insert_device(Device::new("chip")).unwrap_err();
        assert!(matches!(err, LabStateError::DuplicateName { kind: "device", .. }));
    }

    #[test]
    fn delete_requires_existing_name() {
        let mut lab = lab_with_cabling();
        let err = lab.delete_instrument_by_name("missing").unwrap_err();
        assert!(matches!(err, LabStateError::NotFound { .. }));

        let removed = lab.delete_instrument_by_name("laser").unwrap();
        assert_eq!(removed.name, "laser");
        assert!(lab.instrument("laser").is_none());
    }

    #[test]
    fn deleting_entity_retires_its_connections() {
        let mut lab = lab_with_cabling();
        lab.update_connections([Connection::new(
            EntityRef::instrument("laser").port("out"),
            EntityRef::device("chip_b").port("in"),
        )])
        .unwrap();

        lab.delete_device_by_name("chip_b").unwrap();
        assert!(lab.connections().is_empty());
    }

    #[test]
    fn reused_port_replaces_old_connection() {
        let mut lab = lab_with_cabling();
        let laser_out = EntityRef::instrument("laser").port("out");

        lab.update_connections([Connection::new(
            laser_out.clone(),
            EntityRef::device("chip_b").port("in"),
        )])
        .unwrap();
        lab.update_connections([Connection::new(
            laser_out.clone(),
            EntityRef::device("chip_c").port("in"),
        )])
        .unwrap();

        let on_port: Vec<_> = lab
            .connections()
            .iter()
            .filter(|c| c.involves(&laser_out))
            .collect();
        assert_eq!(on_port.len(), 1);
        assert_eq!(
            on_port[0].other_end(&laser_out),
            Some(&EntityRef::device("chip_c").port("in"))
        );
        assert_eq!(lab.connections().len(), 1);
    }

    #[test]
    fn invalid_port_aborts_whole_batch() {
        let mut lab = lab_with_cabling();
        let existing = Connection::new(
            EntityRef::instrument("laser").port("out"),
            EntityRef::device("chip_b").port("in"),
        );
        lab.update_connections([existing.clone()]).unwrap();

        let err = lab
            .update_connections([
                Connection::new(
                    EntityRef::instrument("laser").port("out"),
                    EntityRef::device("chip_c").port("in"),
                ),
                Connection::new(
                    EntityRef::instrument("laser").port("monitor"),
                    EntityRef::device("chip_c").port("nonexistent"),
                ),
            ])
            .unwrap_err();

        assert!(matches!(err, LabStateError::InvalidPort { ref port, .. } if port == "nonexistent"));
        assert_eq!(lab.connections(), &[existing]);
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let mut lab = lab_with_cabling();
        let err = lab
            .update_connections([Connection::new(
                EntityRef::instrument("ghost").port("out"),
                EntityRef::device("chip_b").port("in"),
            )])
            .unwrap_err();
        assert!(matches!(err, LabStateError::UnknownEntity(EntityRef::Instrument(ref n)) if n == "ghost"));
    }

    #[test]
    fn identical_connection_is_not_duplicated() {
        let mut lab = lab_with_cabling();
        let conn = Connection::new(
            EntityRef::instrument("laser").port("out"),
            EntityRef::device("chip_b").port("in"),
        );
        lab.update_connections([conn.clone()]).unwrap();
        lab.update_connections([conn.clone()]).unwrap();
        assert_eq!(lab.connections(), &[conn]);

        let chip = EntityRef::device("chip_b");
        assert_eq!(lab.connections_of(&chip).count(), 1);
        assert!(lab
            .connection_at(&EntityRef::device("chip_b").port("in"))
            .is_some());
    }

    #[test]
    fn port_cannot_be_connected_to_itself() {
        let mut lab = lab_with_cabling();
        let laser_out = EntityRef::instrument("laser").port("out");
        let err = lab
            .update_connections([Connection::new(laser_out.clone(), laser_out.clone())])
            .unwrap_err();

        assert!(matches!(err, LabStateError::LoopbackConnection(ref b) if *b == laser_out));
        assert!(lab.connections().is_empty());
    }
}
