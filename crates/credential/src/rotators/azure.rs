//! Azure token rotator.
//!
//! The simplest of the three: a single client-credentials round trip, and
//! the returned bearer token is itself the usable credential — stored
//! verbatim, no format translation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zenith_api::PolicyRef;

use crate::error::RotationResult;
use crate::rotators::{Rotator, ensure_future_expiry};
use crate::store::{
    SecretStore, insert_data, lookup_pre_rotation_time, rotation_secret_name,
    set_expiration_time, upsert_rotation_secret,
};
use crate::token::TokenProvider;

/// Data key of the bearer token in the generated secret.
pub const AZURE_ACCESS_TOKEN_KEY: &str = "azureAccessToken";

/// Rotator storing an Azure access token obtained via a client-credentials
/// grant.
pub struct AzureTokenRotator {
    store: Arc<dyn SecretStore>,
    token_provider: Arc<dyn TokenProvider>,
    policy: PolicyRef,
    pre_rotation_window: Duration,
    conflict_retries: u32,
}

impl AzureTokenRotator {
    pub fn new(
        store: Arc<dyn SecretStore>,
        token_provider: Arc<dyn TokenProvider>,
        policy: PolicyRef,
        pre_rotation_window: Duration,
        conflict_retries: u32,
    ) -> Self {
        Self { store, token_provider, policy, pre_rotation_window, conflict_retries }
    }
}

#[async_trait]
impl Rotator for AzureTokenRotator {
    async fn pre_rotation_time(&self) -> RotationResult<DateTime<Utc>> {
        lookup_pre_rotation_time(
            self.store.as_ref(),
            &self.policy.namespace,
            &rotation_secret_name(&self.policy.name),
            self.pre_rotation_window,
        )
        .await
    }

    async fn rotate(&self) -> RotationResult<DateTime<Utc>> {
        let started_at = Utc::now();
        tracing::info!(policy = %self.policy, "rotating azure access token");

        let token = self.token_provider.fetch_token().await?;
        ensure_future_expiry(started_at, token.expires_at, "azure access token")?;

        upsert_rotation_secret(self.store.as_ref(), &self.policy, self.conflict_retries, |secret| {
            set_expiration_time(secret, token.expires_at);
            insert_data(secret, AZURE_ACCESS_TOKEN_KEY, &token.token);
        })
        .await?;

        tracing::info!(policy = %self.policy, expires_at = %token.expires_at, "azure access token rotated");
        Ok(token.expires_at)
    }
}
