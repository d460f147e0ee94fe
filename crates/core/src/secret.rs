//! References to values kept in the external secret store.
//!
//! Credential-shaped fields never appear in event content or aggregate state;
//! only the secret name does.

use serde::{Deserialize, Serialize};

use crate::id::EventId;

/// Secret name prefix for webhook authentication values.
pub const WEBHOOK_AUTH_PREFIX: &str = "whk-";
/// Secret name prefix for application master keys.
pub const APPLICATION_MASTER_KEY_PREFIX: &str = "amk-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretRef {
    pub secret_name: String,
}

impl SecretRef {
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
        }
    }

    /// Deterministic name for a secret produced while deciding `event_id`.
    ///
    /// `slot` separates several secrets written by one event.
    pub fn for_event(prefix: &str, event_id: EventId, slot: &str) -> Self {
        Self::new(format!("{prefix}{slot}-{}", event_id.as_uuid().simple()))
    }
}

/// A pending write to the secret store.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretWrite {
    pub name: String,
    pub value: String,
}

impl SecretWrite {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// Values stay out of logs.
impl core::fmt::Debug for SecretWrite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecretWrite")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_event_is_deterministic() {
        let id = EventId::new();
        let a = SecretRef::for_event(WEBHOOK_AUTH_PREFIX, id, "step");
        let b = SecretRef::for_event(WEBHOOK_AUTH_PREFIX, id, "step");
        assert_eq!(a, b);
        assert!(a.secret_name.starts_with("whk-step-"));
        assert_ne!(a, SecretRef::for_event(WEBHOOK_AUTH_PREFIX, id, "other"));
    }

    #[test]
    fn secret_write_debug_redacts_value() {
        let w = SecretWrite::new("amk-primary-x", "super-secret");
        let rendered = format!("{w:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("amk-primary-x"));
    }
}
