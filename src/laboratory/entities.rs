use super::EntityRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Driver-owned settings attached to an instrument or device.
///
/// The core stores and hashes these values but never interprets them.
pub type Params = BTreeMap<String, serde_json::Value>;

/// A compute node that runs instrument communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Unique host name.
    pub name: String,
    /// Network address or DNS name.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Hardware address of the host's network interface.
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Operating system, e.g. `"linux-ubuntu"`.
    #[serde(default)]
    pub os: Option<String>,
    /// Whether this is the host the lab software runs on.
    #[serde(default)]
    pub is_local: bool,
}

impl Host {
    /// A remote host with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: None,
            mac_address: None,
            os: None,
            is_local: false,
        }
    }

    /// The local host.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            is_local: true,
            ..Self::new(name)
        }
    }

    /// Sets the network address.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Sets the hardware address.
    pub fn with_mac_address(mut self, mac_address: impl Into<String>) -> Self {
        self.mac_address = Some(mac_address.into());
        self
    }

    /// Sets the operating system.
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }
}

/// A named physical grouping of instruments and devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bench {
    /// Unique bench name.
    pub name: String,
}

impl Bench {
    /// Creates a bench.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// An actively controlled piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Unique instrument name.
    pub name: String,
    /// Declared ports, in the order the driver lists them.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Name of the bench the instrument sits on.
    #[serde(default)]
    pub bench: Option<String>,
    /// Name of the host that communicates with the instrument.
    #[serde(default)]
    pub host: Option<String>,
    /// Bus address, e.g. `"GPIB0::23::INSTR"`.
    #[serde(default)]
    pub address: Option<String>,
    /// Opaque identifier of the driver that controls this instrument.
    #[serde(default)]
    pub driver: Option<String>,
    /// Identification string reported by the hardware.
    #[serde(default)]
    pub id_string: Option<String>,
    /// Driver-owned settings.
    #[serde(default)]
    pub params: Params,
}

impl Instrument {
    /// Creates an instrument with no ports and no references.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            bench: None,
            host: None,
            address: None,
            driver: None,
            id_string: None,
            params: Params::new(),
        }
    }

    /// Declares the instrument's ports.
    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Places the instrument on a bench.
    pub fn on_bench(mut self, bench: impl Into<String>) -> Self {
        self.bench = Some(bench.into());
        self
    }

    /// Assigns the host that talks to the instrument.
    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the bus address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Names the driver.
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Adds a driver parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Stable reference to this instrument.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Instrument(self.name.clone())
    }

    /// Returns `true` if `port` is one of the declared ports.
    pub fn has_port(&self, port: &str) -> bool {
        self.ports.iter().any(|p| p == port)
    }
}

/// A passive device under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device name.
    pub name: String,
    /// Declared ports.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Name of the bench the device sits on.
    #[serde(default)]
    pub bench: Option<String>,
    /// Free-form description of the device.
    #[serde(default)]
    pub params: Params,
}

impl Device {
    /// Creates a device with no ports and no bench.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            bench: None,
            params: Params::new(),
        }
    }

    /// Declares the device's ports.
    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    /// Places the device on a bench.
    pub fn on_bench(mut self, bench: impl Into<String>) -> Self {
        self.bench = Some(bench.into());
        self
    }

    /// Adds a descriptive parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Stable reference to this device.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Device(self.name.clone())
    }

    /// Returns `true` if `port` is one of the declared ports.
    pub fn has_port(&self, port: &str) -> bool {
        self.ports.iter().any(|p| p == port)
    }
}
