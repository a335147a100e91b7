//! In-memory secret store for tests.

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;

use crate::error::{RotationError, RotationResult};
use crate::store::SecretStore;

/// [`SecretStore`] backed by a map, with the same optimistic-concurrency
/// behavior as the Kubernetes API: every write bumps `resourceVersion`, and
/// an update whose `resourceVersion` no longer matches the stored one is
/// rejected as a conflict.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: DashMap<(String, String), Secret>,
}

impl MemorySecretStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether the store holds no secrets.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

fn key_of(secret: &Secret) -> RotationResult<(String, String)> {
    let namespace = secret.metadata.namespace.clone().unwrap_or_default();
    let name = secret.metadata.name.clone().unwrap_or_default();
    if namespace.is_empty() || name.is_empty() {
        return Err(RotationError::persistence(
            namespace,
            name,
            "secret is missing namespace or name",
        ));
    }
    Ok((namespace, name))
}

fn bump_version(secret: &mut Secret) {
    let next = secret
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    secret.metadata.resource_version = Some(next.to_string());
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> RotationResult<Option<Secret>> {
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn create(&self, secret: &Secret) -> RotationResult<()> {
        let key = key_of(secret)?;
        if self.secrets.contains_key(&key) {
            return Err(RotationError::conflict(&key.0, &key.1, "secret already exists"));
        }
        let mut stored = secret.clone();
        bump_version(&mut stored);
        self.secrets.insert(key, stored);
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> RotationResult<()> {
        let key = key_of(secret)?;
        let Some(mut entry) = self.secrets.get_mut(&key) else {
            return Err(RotationError::persistence(&key.0, &key.1, "secret not found"));
        };
        if entry.metadata.resource_version != secret.metadata.resource_version {
            return Err(RotationError::conflict(
                &key.0,
                &key.1,
                "resourceVersion does not match",
            ));
        }
        let mut stored = secret.clone();
        bump_version(&mut stored);
        *entry = stored;
        Ok(())
    }
}
