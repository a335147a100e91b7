//! The `Rotator` contract and its AWS / Azure / GCP implementations.
//!
//! Each rotator wraps one provider's token exchange behind a uniform
//! interface and knows how to encode its credential material into the
//! generated secret. The provider set is closed; selection happens in the
//! orchestrator's match over the policy spec.

mod aws;
mod azure;
mod gcp;

pub use aws::{
    AWS_CREDENTIALS_KEY, AssumeRoleRequest, AwsOidcRotator, SdkStsClient, StsClient,
    StsCredentials,
};
pub use azure::{AZURE_ACCESS_TOKEN_KEY, AzureTokenRotator};
pub use gcp::{
    GCP_ACCESS_TOKEN_KEY, GCP_PROJECT_NAME_KEY, GCP_REGION_KEY, GCP_SERVICE_ACCOUNT_KEY,
    GcpOidcTokenRotator, GcpTokenExchanger,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RotationError, RotationResult};

/// Uniform credential rotation contract.
///
/// A rotator is constructed per reconcile with freshly resolved
/// configuration and holds no state across calls beyond its configuration
/// and clients. Callers must not issue concurrent [`Rotator::rotate`] calls
/// for the same policy; the engine relies on the reconciler's per-resource
/// serialization.
#[async_trait]
pub trait Rotator: Send + Sync {
    /// Whether rotation is due: true iff the current time is at or after
    /// `pre_rotation_time`. Pure function of wall-clock time.
    fn is_expired(&self, pre_rotation_time: DateTime<Utc>) -> bool {
        Utc::now() >= pre_rotation_time
    }

    /// The stored expiration minus the pre-rotation window. The Unix epoch
    /// when no generated secret exists yet, forcing the initial rotation; an
    /// error when the secret exists but its expiration annotation is
    /// missing or malformed.
    async fn pre_rotation_time(&self) -> RotationResult<DateTime<Utc>>;

    /// Perform the provider exchange and create-or-update the generated
    /// secret. Returns the new credential's expiration. Writes happen only
    /// after every exchange step succeeded, so a failure leaves the previous
    /// secret untouched.
    async fn rotate(&self) -> RotationResult<DateTime<Utc>>;
}

/// Reject credentials that are not strictly in the future relative to the
/// rotation's start; persisting one would immediately violate the schedule.
pub(crate) fn ensure_future_expiry(
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    what: &str,
) -> RotationResult<()> {
    if expires_at <= started_at {
        return Err(RotationError::exchange(format!(
            "{what} expired at {expires_at} before rotation started at {started_at}"
        )));
    }
    Ok(())
}
