//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::validation;

/// Position of an event within its partition. The first event is 1; 0 means "nothing applied".
pub type SequenceId = u64;

/// Natural identifier that scopes event ordering, snapshots and cursors
/// (an offer id, an application name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Parse and validate a partition key (object-name rules).
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validation::object_name("partition_key", &value)
            .map_err(|e| DomainError::invalid_id(e.to_string()))?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PartitionKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PartitionKey> for String {
    fn from(value: PartitionKey) -> Self {
        value.0
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Globally unique identifier of one stored event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

/// Identifier of one compacted snapshot row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(EventId, "EventId");
impl_uuid_newtype!(SnapshotId, "SnapshotId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_accepts_object_names() {
        let key = PartitionKey::parse("foo-offer_01").unwrap();
        assert_eq!(key.as_str(), "foo-offer_01");
        assert_eq!(key.to_string(), "foo-offer_01");
    }

    #[test]
    fn partition_key_rejects_empty_and_illegal_characters() {
        for bad in ["", "   ", "has space", "slash/inside", "ünïcode"] {
            let err = PartitionKey::parse(bad).unwrap_err();
            match err {
                DomainError::InvalidId(_) => {}
                other => panic!("Expected InvalidId for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn partition_key_rejects_overlong_names() {
        let long = "a".repeat(validation::OBJECT_NAME_MAX + 1);
        assert!(PartitionKey::parse(long).is_err());
    }

    #[test]
    fn partition_key_serde_validates() {
        let ok: PartitionKey = serde_json::from_str("\"foo\"").unwrap();
        assert_eq!(ok.as_str(), "foo");
        assert!(serde_json::from_str::<PartitionKey>("\"not valid\"").is_err());
    }

    #[test]
    fn event_id_round_trips_through_display() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("nope".parse::<EventId>().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every name built from the allowed alphabet parses back unchanged.
            #[test]
            fn valid_names_parse(name in "[A-Za-z0-9_-]{1,128}") {
                let key = PartitionKey::parse(name.clone()).unwrap();
                prop_assert_eq!(key.as_str(), name.as_str());
            }

            /// Property: any whitespace makes the key invalid.
            #[test]
            fn whitespace_is_rejected(prefix in "[a-z]{0,10}", suffix in "[a-z]{0,10}") {
                let name = format!("{prefix} {suffix}");
                prop_assert!(PartitionKey::parse(name).is_err());
            }
        }
    }
}
