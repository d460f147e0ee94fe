//! Versioned event content codec.
//!
//! Content is stored as plain JSON without any embedded type information. The
//! `(event_type, version)` pair stored next to it selects the decoder from an
//! explicit [`DecoderTable`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use marketsync_core::ErrorKind;

use crate::Event;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown event type '{event_type}' v{version}")]
    UnknownEventType { event_type: String, version: u32 },

    #[error("malformed content for '{event_type}' v{version}: {reason}")]
    Malformed {
        event_type: String,
        version: u32,
        reason: String,
    },

    #[error("failed to serialize '{event_type}': {reason}")]
    Serialize { event_type: String, reason: String },
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // Content we wrote ourselves should always decode.
            CodecError::UnknownEventType { .. }
            | CodecError::Malformed { .. }
            | CodecError::Serialize { .. } => ErrorKind::ServerInvariantViolation,
        }
    }
}

/// An event type with a closed set of versioned variants.
pub trait EventCodec: Event + Sized {
    /// Serialize the variant's content (no tag, no type names).
    fn encode(&self) -> Result<JsonValue, CodecError>;

    /// Decoders for every `(event_type, version)` this type can read.
    fn decoder_table() -> DecoderTable<Self>;
}

/// Serialize `content` for `event_type`, mapping failures into [`CodecError`].
pub fn encode_content<T: Serialize>(event_type: &str, content: &T) -> Result<JsonValue, CodecError> {
    serde_json::to_value(content).map_err(|e| CodecError::Serialize {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

type Decoder<E> = Box<dyn Fn(JsonValue) -> Result<E, serde_json::Error> + Send + Sync>;

/// Explicit dispatch table from `(event_type, version)` to a typed decoder.
pub struct DecoderTable<E> {
    decoders: BTreeMap<(String, u32), Decoder<E>>,
}

impl<E> DecoderTable<E> {
    pub fn new() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Register a decoder: content deserializes into `T`, then `wrap` lifts it into `E`.
    pub fn register<T, F>(mut self, event_type: &str, version: u32, wrap: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) -> E + Send + Sync + 'static,
    {
        let decoder: Decoder<E> =
            Box::new(move |content| serde_json::from_value::<T>(content).map(&wrap));
        self.decoders
            .insert((event_type.to_string(), version), decoder);
        self
    }

    pub fn contains(&self, event_type: &str, version: u32) -> bool {
        self.decoders.contains_key(&(event_type.to_string(), version))
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Registered `(event_type, version)` pairs, sorted.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.decoders.keys().map(|(t, v)| (t.as_str(), *v))
    }

    pub fn decode(&self, event_type: &str, version: u32, content: JsonValue) -> Result<E, CodecError> {
        let decoder = self
            .decoders
            .get(&(event_type.to_string(), version))
            .ok_or_else(|| CodecError::UnknownEventType {
                event_type: event_type.to_string(),
                version,
            })?;
        decoder(content).map_err(|e| CodecError::Malformed {
            event_type: event_type.to_string(),
            version,
            reason: e.to_string(),
        })
    }
}

impl<E> Default for DecoderTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> core::fmt::Debug for DecoderTable<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.decoders.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Renamed {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct RenamedV2 {
        name: String,
        reason: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Sample {
        Renamed(Renamed),
        RenamedV2(RenamedV2),
    }

    fn table() -> DecoderTable<Sample> {
        DecoderTable::new()
            .register("sample.renamed", 1, Sample::Renamed)
            .register("sample.renamed", 2, Sample::RenamedV2)
    }

    #[test]
    fn decode_dispatches_on_type_and_version() {
        let t = table();
        let v1 = t.decode("sample.renamed", 1, json!({"name": "a"})).unwrap();
        assert_eq!(v1, Sample::Renamed(Renamed { name: "a".into() }));

        let v2 = t
            .decode("sample.renamed", 2, json!({"name": "a", "reason": "typo"}))
            .unwrap();
        assert!(matches!(v2, Sample::RenamedV2(_)));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = table().decode("sample.renamed", 3, json!({})).unwrap_err();
        match err {
            CodecError::UnknownEventType { version, .. } => assert_eq!(version, 3),
            other => panic!("Expected UnknownEventType, got {other:?}"),
        }
    }

    #[test]
    fn malformed_content_is_reported() {
        let err = table()
            .decode("sample.renamed", 2, json!({"name": "a"}))
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
        assert_eq!(err.kind(), ErrorKind::ServerInvariantViolation);
    }

    #[test]
    fn entries_are_sorted() {
        let t = table();
        let entries: Vec<_> = t.entries().collect();
        assert_eq!(entries, vec![("sample.renamed", 1), ("sample.renamed", 2)]);
        assert_eq!(t.len(), 2);
        assert!(t.contains("sample.renamed", 1));
        assert!(!t.contains("sample.other", 1));
    }
}
