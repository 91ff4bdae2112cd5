//! On-disk document schema, canonical rendering and content digests.
//!
//! A saved file is a single JSON object:
//!
//! ```text
//! {
//!     "__datetime__": "Monday, 12. October 2026 03:41PM",
//!     "__sha256__": "<64 hex chars>",
//!     "__user__": "alice",
//!     "__version__": 2,
//!     "benches": [...],
//!     "connections": [...],
//!     "devices": [...],
//!     "hosts": [...],
//!     "instruments": [...]
//! }
//! ```
//!
//! The digest is SHA-256 over the canonical rendering of the object with `__sha256__`,
//! `__user__` and `__datetime__` removed. Canonical means: keys sorted at every level,
//! collections sorted by name, connections sorted, four-space indentation. Two states
//! that compare equal therefore always produce the same digest, whatever order their
//! entities were inserted in.

use super::LabState;
use crate::error::{AppResult, LabStateError};
use crate::laboratory::{Bench, Connection, Device, Host, Instrument};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Key holding the schema version.
pub const VERSION_KEY: &str = "__version__";
/// Key holding the content digest.
pub const SHA256_KEY: &str = "__sha256__";
/// Key holding the name of the last saver.
pub const USER_KEY: &str = "__user__";
/// Key holding the save timestamp.
pub const DATETIME_KEY: &str = "__datetime__";

const DATETIME_FORMAT: &str = "%A, %d. %B %Y %I:%M%p";

/// Current-version content of a state file.
///
/// Cross references are names. [`LabState::from_document`] resolves them against the
/// collections after the whole document has been read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabDocument {
    /// Hosts, sorted by name.
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Benches, sorted by name.
    #[serde(default)]
    pub benches: Vec<Bench>,
    /// Instruments, sorted by name.
    #[serde(default)]
    pub instruments: Vec<Instrument>,
    /// Devices, sorted by name.
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Connections, sorted.
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl LabDocument {
    /// Flattens a state into its document form.
    pub fn from_state(state: &LabState) -> Self {
        let mut connections = state.connections.clone();
        connections.sort();
        Self {
            hosts: state.hosts.values().cloned().collect(),
            benches: state.benches.values().cloned().collect(),
            instruments: state.instruments.values().cloned().collect(),
            devices: state.devices.values().cloned().collect(),
            connections,
        }
    }

    /// The document as a JSON object tagged with `version`, ready to be digested.
    pub fn to_content(&self, version: u32) -> AppResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.insert(VERSION_KEY.to_string(), Value::from(version));
                Ok(map)
            }
            other => Err(LabStateError::MalformedDocument(format!(
                "expected a JSON object, serialized {other}"
            ))),
        }
    }
}

impl LabState {
    /// Rebuilds a state from a document, resolving every name reference.
    ///
    /// Fails with [`LabStateError::DuplicateName`] if a collection repeats a name and
    /// with [`LabStateError::UnresolvedReference`] if an instrument, device or
    /// connection points at something that is not in the document. Connections are held
    /// to the same rules as [`LabState::update_connections`]: declared ports only, and
    /// each port carries at most one connection.
    pub fn from_document(document: LabDocument) -> AppResult<Self> {
        let mut state = LabState::new();
        state.hosts = keyed("host", document.hosts, |h| &h.name)?;
        state.benches = keyed("bench", document.benches, |b| &b.name)?;
        state.instruments = keyed("instrument", document.instruments, |i| &i.name)?;
        state.devices = keyed("device", document.devices, |d| &d.name)?;

        if state.hosts.values().filter(|h| h.is_local).count() > 1 {
            warn!("Duplicate local host found in lab hosts");
        }

        for instrument in state.instruments.values() {
            if let Some(bench) = &instrument.bench {
                require(state.benches.contains_key(bench), &instrument.name, "bench", bench)?;
            }
            if let Some(host) = &instrument.host {
                require(state.hosts.contains_key(host), &instrument.name, "host", host)?;
            }
        }
        for device in state.devices.values() {
            if let Some(bench) = &device.bench {
                require(state.benches.contains_key(bench), &device.name, "bench", bench)?;
            }
        }
        let mut used = HashSet::new();
        for connection in &document.connections {
            for end in connection.ends() {
                if state.ports_of(&end.entity).is_none() {
                    return Err(LabStateError::UnresolvedReference {
                        from: format!("connection {connection}"),
                        target: end.entity.to_string(),
                    });
                }
            }
            state.validate_connection(connection)?;
            for end in connection.ends() {
                if !used.insert(end) {
                    return Err(LabStateError::MalformedDocument(format!(
                        "port {end} is used by more than one connection"
                    )));
                }
            }
        }
        state.connections = document.connections;
        Ok(state)
    }

    /// Current content as a digestable JSON object.
    pub fn to_content(&self) -> AppResult<Map<String, Value>> {
        LabDocument::from_state(self).to_content(self.meta.version)
    }

    /// SHA-256 of the current in-memory content.
    pub fn digest(&self) -> AppResult<String> {
        content_digest(&self.to_content()?)
    }

    /// Full document with digest, author and timestamp stamped on.
    ///
    /// Returns the document and its digest.
    pub fn to_stamped_document(&self, author: &str) -> AppResult<(Map<String, Value>, String)> {
        let mut content = self.to_content()?;
        let sha256 = content_digest(&content)?;
        content.insert(SHA256_KEY.to_string(), Value::from(sha256.clone()));
        content.insert(USER_KEY.to_string(), Value::from(author));
        content.insert(DATETIME_KEY.to_string(), Value::from(save_timestamp()));
        Ok((content, sha256))
    }
}

fn keyed<T>(
    kind: &'static str,
    items: Vec<T>,
    name: impl Fn(&T) -> &String,
) -> AppResult<BTreeMap<String, T>> {
    let mut map = BTreeMap::new();
    for item in items {
        let key = name(&item).clone();
        if map.contains_key(&key) {
            return Err(LabStateError::DuplicateName { kind, name: key });
        }
        map.insert(key, item);
    }
    Ok(map)
}

fn require(present: bool, from: &str, kind: &str, name: &str) -> AppResult<()> {
    if present {
        Ok(())
    } else {
        Err(LabStateError::UnresolvedReference {
            from: from.to_string(),
            target: format!("{kind} '{name}'"),
        })
    }
}

/// Digest of a document object, ignoring the digest, author and timestamp keys.
pub fn content_digest(document: &Map<String, Value>) -> AppResult<String> {
    let mut content = document.clone();
    content.remove(SHA256_KEY);
    content.remove(USER_KEY);
    content.remove(DATETIME_KEY);
    let rendered = render(&Value::Object(content))?;
    Ok(hash_sha256(&rendered))
}

/// Hex encoded SHA-256 of `text`.
pub fn hash_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical text of a JSON value: keys sorted at every level, four-space indent.
pub fn render(value: &Value) -> AppResult<String> {
    let canonical = canonicalize(value);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    canonical.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(|e| LabStateError::MalformedDocument(e.to_string()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn save_timestamp() -> String {
    chrono::Local::now().format(DATETIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laboratory::EntityRef;
    use serde_json::json;

    fn sample(reverse: bool) -> LabState {
        let mut lab = LabState::new();
        let mut instruments = vec![
            Instrument::new("laser").with_ports(["out"]).on_bench("b1"),
            Instrument::new("scope").with_ports(["ch1", "ch2"]).on_bench("b2"),
        ];
        let mut devices = vec![
            Device::new("chip_a").with_ports(["in"]),
            Device::new("chip_b").with_ports(["in"]),
        ];
        if reverse {
            instruments.reverse();
            devices.reverse();
        }
        for i in instruments {
            lab.insert_instrument(i).unwrap();
        }
        for d in devices {
            lab.insert_device(d).unwrap();
        }
        let mut connections = vec![
            Connection::new(
                EntityRef::instrument("laser").port("out"),
                EntityRef::device("chip_a").port("in"),
            ),
            Connection::new(
                EntityRef::device("chip_b").port("in"),
                EntityRef::instrument("scope").port("ch1"),
            ),
        ];
        if reverse {
            connections.reverse();
        }
        lab.update_connections(connections).unwrap();
        lab
    }

    #[test]
    fn digest_is_independent_of_insertion_order() {
        let forward = sample(false);
        let backward = sample(true);
        assert_eq!(forward, backward);
        assert_eq!(forward.digest().unwrap(), backward.digest().unwrap());
        assert_eq!(forward.digest().unwrap().len(), 64);
    }

    #[test]
    fn digest_ignores_author_and_timestamp() {
        let lab = sample(false);
        let (mut doc, sha) = lab.to_stamped_document("alice").unwrap();
        assert_eq!(content_digest(&doc).unwrap(), sha);

        doc.insert(USER_KEY.to_string(), json!("mallory"));
        doc.insert(DATETIME_KEY.to_string(), json!("yesterday"));
        assert_eq!(content_digest(&doc).unwrap(), sha);
    }

    #[test]
    fn digest_covers_version() {
        let lab = sample(false);
        let mut content = lab.to_content().unwrap();
        let before = content_digest(&content).unwrap();
        content.insert(VERSION_KEY.to_string(), json!(1));
        assert_ne!(content_digest(&content).unwrap(), before);
    }

    #[test]
    fn render_sorts_nested_keys() {
        let value = json!({ "b": { "z": 1, "a": 2 }, "a": [ { "y": 0, "x": 1 } ] });
        let text = render(&value).unwrap();
        let a = text.find("\"a\"").unwrap();
        let b = text.find("\"b\"").unwrap();
        assert!(a < b);
        assert!(text.find("\"x\"").unwrap() < text.find("\"y\"").unwrap());
        assert!(text.contains("\n    \"a\""));
    }

    #[test]
    fn known_digest_of_text() {
        assert_eq!(
            hash_sha256("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn from_document_rejects_dangling_bench() {
        let document = LabDocument {
            instruments: vec![Instrument::new("scope").on_bench("nowhere")],
            ..Default::default()
        };
        let err = LabState::from_document(document).unwrap_err();
        assert!(matches!(err, LabStateError::UnresolvedReference { .. }));
    }

    #[test]
    fn from_document_rejects_repeated_names() {
        let document = LabDocument {
            benches: vec![Bench::new("b1"), Bench::new("b1")],
            ..Default::default()
        };
        let err = LabState::from_document(document).unwrap_err();
        assert!(matches!(err, LabStateError::DuplicateName { kind: "bench", .. }));
    }

    #[test]
    fn document_round_trips_through_state() {
        let lab = sample(false);
        let rebuilt = LabState::from_document(LabDocument::from_state(&lab)).unwrap();
        assert_eq!(rebuilt, lab);
    }

    #[test]
    fn from_document_rejects_undeclared_port() {
        let document = LabDocument {
            instruments: vec![Instrument::new("laser").with_ports(["out"])],
            devices: vec![Device::new("chip").with_ports(["in"])],
            connections: vec![Connection::new(
                EntityRef::instrument("laser").port("bogus"),
                EntityRef::device("chip").port("in"),
            )],
            ..Default::default()
        };
        let err = LabState::from_document(document).unwrap_err();
        assert!(matches!(err, LabStateError::InvalidPort { ref port, .. } if port == "bogus"));
    }

    #[test]
    fn from_document_rejects_port_with_two_cables() {
        let document = LabDocument {
            instruments: vec![Instrument::new("laser").with_ports(["out"])],
            devices: vec![
                Device::new("chip").with_ports(["in"]),
                Device::new("ring").with_ports(["in"]),
            ],
            connections: vec![
                Connection::new(
                    EntityRef::instrument("laser").port("out"),
                    EntityRef::device("chip").port("in"),
                ),
                Connection::new(
                    EntityRef::instrument("laser").port("out"),
                    EntityRef::device("ring").port("in"),
                ),
            ],
            ..Default::default()
        };
        let err = LabState::from_document(document).unwrap_err();
        assert!(matches!(err, LabStateError::MalformedDocument(ref msg) if msg.contains("more than one")));
    }
}
