use super::EntityRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One end of a cable: an entity and one of its ports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Binding {
    /// The instrument or device.
    pub entity: EntityRef,
    /// Port name, which must be declared by the entity.
    pub port: String,
}

impl Binding {
    /// Creates a binding.
    pub fn new(entity: EntityRef, port: impl Into<String>) -> Self {
        Self {
            entity,
            port: port.into(),
        }
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: {}}}", self.entity, self.port)
    }
}

/// An unordered pair of bindings.
///
/// The two ends are stored sorted, so `Connection::new(a, b) == Connection::new(b, a)`
/// and the serialized form does not depend on the order the caller used.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "[Binding; 2]", into = "[Binding; 2]")]
pub struct Connection {
    ends: [Binding; 2],
}

impl Connection {
    /// Connects two bindings.
    pub fn new(a: Binding, b: Binding) -> Self {
        let ends = if a <= b { [a, b] } else { [b, a] };
        Self { ends }
    }

    /// Both ends, in canonical order.
    pub fn ends(&self) -> &[Binding; 2] {
        &self.ends
    }

    /// Returns `true` if either end is `binding`.
    pub fn involves(&self, binding: &Binding) -> bool {
        self.ends.iter().any(|end| end == binding)
    }

    /// Returns `true` if the two connections use a common `(entity, port)` pair.
    pub fn shares_binding(&self, other: &Connection) -> bool {
        other.ends.iter().any(|end| self.involves(end))
    }

    /// Returns `true` if either end belongs to `entity`.
    pub fn touches(&self, entity: &EntityRef) -> bool {
        self.ends.iter().any(|end| &end.entity == entity)
    }

    /// The end opposite to `binding`, if `binding` is one end of this connection.
    pub fn other_end(&self, binding: &Binding) -> Option<&Binding> {
        match &self.ends {
            [a, b] if a == binding => Some(b),
            [a, b] if b == binding => Some(a),
            _ => None,
        }
    }
}

impl From<[Binding; 2]> for Connection {
    fn from([a, b]: [Binding; 2]) -> Self {
        Connection::new(a, b)
    }
}

impl From<Connection> for [Binding; 2] {
    fn from(value: Connection) -> Self {
        value.ends
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ends[0], self.ends[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laser_to_chip() -> (Binding, Binding) {
        (
            EntityRef::instrument("laser").port("out"),
            EntityRef::device("chip").port("in"),
        )
    }

    #[test]
    fn connection_is_unordered() {
        let (a, b) = laser_to_chip();
        assert_eq!(
            Connection::new(a.clone(), b.clone()),
            Connection::new(b, a)
        );
    }

    #[test]
    fn shares_binding_detects_reused_port() {
        let (a, b) = laser_to_chip();
        let first = Connection::new(a.clone(), b);
        let second = Connection::new(a, EntityRef::device("other").port("in"));
        let unrelated = Connection::new(
            EntityRef::instrument("scope").port("ch1"),
            EntityRef::device("other").port("out"),
        );

        assert!(first.shares_binding(&second));
        assert!(!first.shares_binding(&unrelated));
    }

    #[test]
    fn other_end_walks_the_cable() {
        let (a, b) = laser_to_chip();
        let conn = Connection::new(a.clone(), b.clone());
        assert_eq!(conn.other_end(&a), Some(&b));
        assert_eq!(conn.other_end(&b), Some(&a));
        assert_eq!(conn.other_end(&EntityRef::device("x").port("y")), None);
    }

    #[test]
    fn deserialization_normalizes_order() {
        let json = r#"[
            {"entity": {"device": "chip"}, "port": "in"},
            {"entity": {"instrument": "laser"}, "port": "out"}
        ]"#;
        let conn: Connection = serde_json::from_str(json).unwrap();
        let (a, b) = laser_to_chip();
        assert_eq!(conn, Connection::new(a, b));
        assert_eq!(conn.ends()[0].entity, EntityRef::instrument("laser"));
    }
}
