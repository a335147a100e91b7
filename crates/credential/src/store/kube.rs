//! Kubernetes-backed secret store.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::{Client, Error};

use crate::error::{RotationError, RotationResult};
use crate::store::SecretStore;

/// [`SecretStore`] over the Kubernetes API.
///
/// Writes rely on the API server's optimistic concurrency: `update` replaces
/// the object with the `resourceVersion` obtained from the preceding `get`,
/// and an HTTP 409 surfaces as a conflict-flagged persistence error for the
/// upsert helper to retry.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Store backed by the given client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn secret_identity(secret: &Secret) -> (&str, &str) {
    (
        secret.metadata.namespace.as_deref().unwrap_or_default(),
        secret.metadata.name.as_deref().unwrap_or_default(),
    )
}

fn classify(namespace: &str, name: &str, operation: &str, err: &Error) -> RotationError {
    match err {
        Error::Api(response) if response.code == 409 => {
            RotationError::conflict(namespace, name, format!("{operation} conflicted: {err}"))
        }
        _ => RotationError::persistence(namespace, name, format!("{operation} failed: {err}")),
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> RotationResult<Option<Secret>> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(Error::Api(response)) if response.code == 404 => Ok(None),
            Err(err) => Err(RotationError::persistence(
                namespace,
                name,
                format!("get failed: {err}"),
            )),
        }
    }

    async fn create(&self, secret: &Secret) -> RotationResult<()> {
        let (namespace, name) = secret_identity(secret);
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|err| classify(namespace, name, "create", &err))
    }

    async fn update(&self, secret: &Secret) -> RotationResult<()> {
        let (namespace, name) = secret_identity(secret);
        self.secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|err| classify(namespace, name, "update", &err))
    }
}
