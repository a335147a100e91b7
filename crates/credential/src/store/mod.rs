//! Generated-secret naming, annotations, and persistence.
//!
//! Every exchange-configured policy owns exactly one generated secret,
//! deterministically named from the policy name. The secret's data holds the
//! provider-specific credential blob; its expiration travels as an RFC 3339
//! annotation, parsed into a typed timestamp at this boundary.
//!
//! Persistence goes through the [`SecretStore`] trait so rotators are
//! independent of the Kubernetes client: [`KubeSecretStore`] backs
//! production, [`MemorySecretStore`] backs tests.

mod kube;
mod memory;

pub use kube::KubeSecretStore;
pub use memory::MemorySecretStore;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use zenith_api::PolicyRef;

use crate::error::{RotationError, RotationResult};

/// Annotation carrying the credential expiration, RFC 3339 to the second.
pub const EXPIRATION_TIME_ANNOTATION: &str = "zenith.credential/expiration-time";

/// Prefix of every generated secret name.
pub const SECRET_NAME_PREFIX: &str = "zenith-cred-";

/// Data key under which referenced OIDC client secrets store their value.
pub const CLIENT_SECRET_KEY: &str = "client-secret";

/// Deterministic name of the generated secret for a policy. Stable across
/// reconciliations and reversible for debugging; also used by the pod
/// mutator to mount the secret.
pub fn rotation_secret_name(policy_name: &str) -> String {
    format!("{SECRET_NAME_PREFIX}{policy_name}")
}

/// Minimal secret persistence interface.
///
/// `update` performs an optimistic replace: the secret's `resourceVersion`
/// must still match, otherwise the implementation returns a conflict-flagged
/// [`RotationError::Persistence`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> RotationResult<Option<Secret>>;

    /// Create a secret that must not exist yet.
    async fn create(&self, secret: &Secret) -> RotationResult<()>;

    /// Replace an existing secret read via [`SecretStore::get`].
    async fn update(&self, secret: &Secret) -> RotationResult<()>;
}

/// Record the expiration annotation on a secret.
pub fn set_expiration_time(secret: &mut Secret, expires_at: DateTime<Utc>) {
    secret
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            EXPIRATION_TIME_ANNOTATION.to_string(),
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
}

/// Read the expiration annotation back. A present secret without a parseable
/// annotation is malformed and reported as a configuration error rather than
/// silently treated as expired.
pub fn expiration_time(secret: &Secret) -> RotationResult<DateTime<Utc>> {
    let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    let raw = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(EXPIRATION_TIME_ANNOTATION))
        .ok_or_else(|| {
            RotationError::configuration(format!(
                "secret {namespace}/{name} is missing the {EXPIRATION_TIME_ANNOTATION} annotation"
            ))
        })?;
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|err| {
        RotationError::configuration(format!(
            "secret {namespace}/{name} has a malformed {EXPIRATION_TIME_ANNOTATION} annotation {raw:?}: {err}"
        ))
    })?;
    Ok(parsed.with_timezone(&Utc))
}

/// Store a UTF-8 value under a data key.
pub fn insert_data(secret: &mut Secret, key: &str, value: &str) {
    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
}

/// Read a UTF-8 value from a secret's data.
pub fn data_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
}

/// Resolve a referenced secret and read one key out of it, with
/// configuration errors that name exactly what is missing.
pub async fn read_secret_key(
    store: &dyn SecretStore,
    namespace: &str,
    name: &str,
    key: &str,
) -> RotationResult<String> {
    let secret = store.get(namespace, name).await?.ok_or_else(|| {
        RotationError::configuration(format!("referenced secret {namespace}/{name} not found"))
    })?;
    data_value(&secret, key).ok_or_else(|| {
        RotationError::configuration(format!("secret {namespace}/{name} is missing key {key}"))
    })
}

/// Pre-rotation time for a policy's generated secret: the stored expiration
/// minus `window`. An absent secret yields the Unix epoch — always expired,
/// forcing the initial rotation.
pub async fn lookup_pre_rotation_time(
    store: &dyn SecretStore,
    namespace: &str,
    secret_name: &str,
    window: Duration,
) -> RotationResult<DateTime<Utc>> {
    match store.get(namespace, secret_name).await? {
        None => Ok(DateTime::<Utc>::UNIX_EPOCH),
        Some(secret) => {
            let expires_at = expiration_time(&secret)?;
            let window =
                chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
            Ok(expires_at - window)
        }
    }
}

/// Create-or-update the generated secret for `owner`, retrying the whole
/// read-modify-write sequence on conflicts up to `conflict_retries` times.
///
/// `populate` receives the secret with identity and owner reference already
/// in place and fills in data and annotations. The owner reference is
/// (re)applied on updates too, so a secret that lost it is repaired rather
/// than orphaned.
pub async fn upsert_rotation_secret<F>(
    store: &dyn SecretStore,
    owner: &PolicyRef,
    conflict_retries: u32,
    populate: F,
) -> RotationResult<()>
where
    F: Fn(&mut Secret),
{
    let namespace = owner.namespace.as_str();
    let name = rotation_secret_name(&owner.name);

    let mut attempt = 0u32;
    loop {
        let result = match store.get(namespace, &name).await? {
            None => {
                tracing::info!(namespace = %namespace, name = %name, "creating credential secret");
                let mut secret = new_rotation_secret(namespace, &name, owner);
                populate(&mut secret);
                store.create(&secret).await
            }
            Some(mut secret) => {
                tracing::info!(namespace = %namespace, name = %name, "updating credential secret");
                ensure_owner_reference(&mut secret, owner);
                populate(&mut secret);
                store.update(&secret).await
            }
        };

        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.is_conflict() && attempt < conflict_retries => {
                attempt += 1;
                tracing::debug!(
                    namespace = %namespace,
                    name = %name,
                    attempt,
                    "credential secret write conflicted, retrying"
                );
            }
            Err(err) => return Err(err),
        }
    }
}

fn new_rotation_secret(namespace: &str, name: &str, owner: &PolicyRef) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner.owner_reference()]),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::new()),
        ..Secret::default()
    }
}

fn ensure_owner_reference(secret: &mut Secret, owner: &PolicyRef) {
    let references = secret.metadata.owner_references.get_or_insert_with(Vec::new);
    if !references.iter().any(|reference| reference.uid == owner.uid) {
        references.push(owner.owner_reference());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn secret(namespace: &str, name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[test]
    fn secret_name_is_deterministic_and_reversible() {
        assert_eq!(rotation_secret_name("bedrock"), "zenith-cred-bedrock");
        assert_eq!(rotation_secret_name("bedrock"), rotation_secret_name("bedrock"));
        assert_eq!(
            rotation_secret_name("bedrock").strip_prefix(SECRET_NAME_PREFIX),
            Some("bedrock")
        );
    }

    #[test]
    fn expiration_annotation_round_trips_to_the_second() {
        let expires_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let mut secret = secret("default", "zenith-cred-x");
        set_expiration_time(&mut secret, expires_at);

        let stored = secret.metadata.annotations.as_ref().unwrap()[EXPIRATION_TIME_ANNOTATION]
            .clone();
        assert_eq!(stored, "2026-03-14T09:26:53Z");
        assert_eq!(expiration_time(&secret).unwrap(), expires_at);
    }

    #[test]
    fn missing_annotation_is_a_configuration_error() {
        let err = expiration_time(&secret("default", "zenith-cred-x")).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("zenith-cred-x"));
        assert!(err.to_string().contains(EXPIRATION_TIME_ANNOTATION));
    }

    #[test]
    fn malformed_annotation_is_a_configuration_error() {
        let mut malformed = secret("default", "zenith-cred-x");
        malformed
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(EXPIRATION_TIME_ANNOTATION.to_string(), "yesterday".to_string());
        let err = expiration_time(&malformed).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn data_round_trips_utf8() {
        let mut s = secret("default", "zenith-cred-x");
        insert_data(&mut s, "credentials", "[default]\n");
        assert_eq!(data_value(&s, "credentials").as_deref(), Some("[default]\n"));
        assert_eq!(data_value(&s, "missing"), None);
    }

    #[tokio::test]
    async fn absent_secret_means_rotate_now() {
        let store = MemorySecretStore::new();
        let t = lookup_pre_rotation_time(&store, "default", "zenith-cred-x", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(t, DateTime::<Utc>::UNIX_EPOCH);
        assert!(Utc::now() >= t);
    }

    #[tokio::test]
    async fn pre_rotation_time_subtracts_the_window() {
        let store = MemorySecretStore::new();
        let expires_at = Utc::now() + chrono::Duration::hours(2);
        let mut s = secret("default", "zenith-cred-x");
        set_expiration_time(&mut s, expires_at);
        store.create(&s).await.unwrap();

        let t = lookup_pre_rotation_time(&store, "default", "zenith-cred-x", Duration::from_secs(300))
            .await
            .unwrap();
        // The annotation is truncated to whole seconds, so compare at that
        // granularity.
        let expected = expires_at - chrono::Duration::minutes(5);
        assert_eq!(t.timestamp(), expected.timestamp());
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_in_place() {
        let store = MemorySecretStore::new();
        let owner = PolicyRef {
            name: "bedrock".into(),
            namespace: "default".into(),
            uid: "u-1".into(),
        };

        upsert_rotation_secret(&store, &owner, 3, |s| insert_data(s, "credentials", "v1"))
            .await
            .unwrap();
        upsert_rotation_secret(&store, &owner, 3, |s| insert_data(s, "credentials", "v2"))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get("default", "zenith-cred-bedrock").await.unwrap().unwrap();
        assert_eq!(data_value(&stored, "credentials").as_deref(), Some("v2"));
        let owners = stored.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "u-1");
        assert_eq!(owners[0].kind, "CredentialPolicy");
    }

    #[tokio::test]
    async fn upsert_repairs_a_lost_owner_reference() {
        let store = MemorySecretStore::new();
        let owner = PolicyRef {
            name: "bedrock".into(),
            namespace: "default".into(),
            uid: "u-1".into(),
        };
        store.create(&secret("default", "zenith-cred-bedrock")).await.unwrap();

        upsert_rotation_secret(&store, &owner, 3, |_| {}).await.unwrap();

        let stored = store.get("default", "zenith-cred-bedrock").await.unwrap().unwrap();
        assert_eq!(stored.metadata.owner_references.unwrap()[0].uid, "u-1");
    }
}
