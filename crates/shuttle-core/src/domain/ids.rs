//! Domain identifiers (strongly-typed IDs).
//!
//! Every identifier is minted from a ULID, so ids created later sort after ids
//! created earlier, and travels on the wire as a plain UUID string so that
//! processes which know nothing about ULIDs can still read envelopes.
//!
//! `Id<T>` carries a zero-sized marker `T`; an `EnvelopeId` and a
//! `CorrelationId` share one implementation but cannot be mixed up.
//! (型が違うので、取り違えはコンパイル時に弾かれる)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

/// Marker trait for the different id kinds.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "env-").
    fn prefix() -> &'static str;
}

/// Generic identifier.
///
/// `T` only exists at compile time; `Id<T>` has the size of a UUID.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    uuid: Uuid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self::from_uuid(Uuid::from(ulid))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> From<Uuid> for Id<T> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = uuid::Error;

    /// Accepts a bare UUID, optionally carrying the display prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Uuid::parse_str(raw).map(Self::from_uuid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.uuid)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.uuid.serialize(serializer)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

// ========================================
// Markers
// ========================================

/// Marker for the identity of a single envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Envelope {}

impl IdMarker for Envelope {
    fn prefix() -> &'static str {
        "env-"
    }
}

/// Marker for the id that ties one request to one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Correlation {}

impl IdMarker for Correlation {
    fn prefix() -> &'static str {
        "corr-"
    }
}

/// Identity of one envelope; assigned at creation, never reused.
pub type EnvelopeId = Id<Envelope>;

/// Links exactly one request envelope with exactly one response envelope.
pub type CorrelationId = Id<Correlation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid = Ulid::new();

        let envelope = EnvelopeId::from_ulid(ulid);
        let correlation = CorrelationId::from_ulid(ulid);

        assert_eq!(envelope.as_uuid(), correlation.as_uuid());
        assert!(envelope.to_string().starts_with("env-"));
        assert!(correlation.to_string().starts_with("corr-"));

        // let _: EnvelopeId = correlation; // <- does not compile
    }

    #[test]
    fn ulid_ids_keep_creation_order() {
        let id1 = CorrelationId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = CorrelationId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_plain_uuid_string() {
        let id = CorrelationId::from_ulid(Ulid::new());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let back: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parses_with_or_without_prefix() {
        let id = EnvelopeId::from_ulid(Ulid::new());

        assert_eq!(id.to_string().parse::<EnvelopeId>().unwrap(), id);
        assert_eq!(id.as_uuid().to_string().parse::<EnvelopeId>().unwrap(), id);
        assert!("env-not-a-uuid".parse::<EnvelopeId>().is_err());
    }

    #[test]
    fn phantom_marker_is_free() {
        assert_eq!(std::mem::size_of::<EnvelopeId>(), std::mem::size_of::<Uuid>());
    }
}
