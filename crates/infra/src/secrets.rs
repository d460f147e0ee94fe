//! Secret store boundary for credential-shaped values (webhook auth, master keys).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use marketsync_core::ErrorKind;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

impl SecretStoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransientIo
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>, SecretStoreError>;

    async fn set(&self, name: &str, value: &str) -> Result<(), SecretStoreError>;

    /// Deleting a missing secret is not an error.
    async fn delete(&self, name: &str) -> Result<(), SecretStoreError>;
}

#[async_trait]
impl<S> SecretStore for Arc<S>
where
    S: SecretStore + ?Sized,
{
    async fn get(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        (**self).get(name).await
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        (**self).set(name, value).await
    }

    async fn delete(&self, name: &str) -> Result<(), SecretStoreError> {
        (**self).delete(name).await
    }
}

#[derive(Default)]
pub struct InMemorySecretStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for InMemorySecretStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemorySecretStore")
            .field("len", &self.len())
            .finish()
    }
}

fn poisoned<T>(_: T) -> SecretStoreError {
    SecretStoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        Ok(self.values.read().map_err(poisoned)?.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        self.values
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), SecretStoreError> {
        self.values.write().map_err(poisoned)?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = InMemorySecretStore::new();
        store.set("whk-auth-1", "s3cr3t").await.unwrap();
        assert_eq!(store.get("whk-auth-1").await.unwrap().as_deref(), Some("s3cr3t"));

        store.delete("whk-auth-1").await.unwrap();
        store.delete("whk-auth-1").await.unwrap();
        assert_eq!(store.get("whk-auth-1").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn debug_does_not_print_values() {
        let store = InMemorySecretStore::new();
        store
            .values
            .write()
            .unwrap()
            .insert("amk-primary-x".into(), "hunter2".into());
        assert!(!format!("{store:?}").contains("hunter2"));
    }
}
