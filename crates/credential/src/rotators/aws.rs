//! AWS OIDC rotator: web-identity exchange against STS.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zenith_api::PolicyRef;

use crate::error::{RotationError, RotationResult};
use crate::rotators::{Rotator, ensure_future_expiry};
use crate::store::{
    SecretStore, insert_data, lookup_pre_rotation_time, rotation_secret_name,
    set_expiration_time, upsert_rotation_secret,
};
use crate::token::TokenProvider;

/// Data key of the AWS credentials file blob in the generated secret.
pub const AWS_CREDENTIALS_KEY: &str = "credentials";

/// Profile name written into the credentials blob.
const DEFAULT_PROFILE: &str = "default";

/// STS caps role session names at 64 characters.
const MAX_SESSION_NAME_LEN: usize = 64;

/// Parameters of an `AssumeRoleWithWebIdentity` call.
#[derive(Clone, Debug)]
pub struct AssumeRoleRequest {
    /// IAM role to assume.
    pub role_arn: String,
    /// OIDC JWT presented as the web identity.
    pub web_identity_token: String,
    /// Session name recorded in CloudTrail.
    pub session_name: String,
}

/// Temporary security credentials returned by STS.
#[derive(Clone)]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for StsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// STS operations needed by the rotator. A trait seam so tests can exchange
/// against canned credentials instead of AWS.
#[async_trait]
pub trait StsClient: Send + Sync {
    /// Exchange an OIDC token for temporary AWS credentials.
    async fn assume_role_with_web_identity(
        &self,
        request: AssumeRoleRequest,
    ) -> RotationResult<StsCredentials>;
}

/// [`StsClient`] backed by the AWS SDK.
pub struct SdkStsClient {
    inner: aws_sdk_sts::Client,
}

impl SdkStsClient {
    /// Client for the given region, using the default credential/config
    /// chain for everything else.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self { inner: aws_sdk_sts::Client::new(&config) }
    }
}

#[async_trait]
impl StsClient for SdkStsClient {
    async fn assume_role_with_web_identity(
        &self,
        request: AssumeRoleRequest,
    ) -> RotationResult<StsCredentials> {
        let output = self
            .inner
            .assume_role_with_web_identity()
            .role_arn(&request.role_arn)
            .web_identity_token(&request.web_identity_token)
            .role_session_name(&request.session_name)
            .send()
            .await
            .map_err(|err| {
                RotationError::exchange(format!(
                    "failed to assume role {}: {}",
                    request.role_arn,
                    aws_sdk_sts::error::DisplayErrorContext(&err)
                ))
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            RotationError::exchange(format!(
                "sts returned no credentials for role {}",
                request.role_arn
            ))
        })?;
        let expiration = credentials.expiration();
        let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| {
                RotationError::exchange(format!(
                    "sts returned an out-of-range expiration for role {}",
                    request.role_arn
                ))
            })?;

        Ok(StsCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

/// Render the credentials as an AWS credentials-file profile block, with the
/// region appended so the data plane needs no separate region source.
fn credentials_file(profile: &str, credentials: &StsCredentials, region: &str) -> String {
    format!(
        "[{profile}]\naws_access_key_id = {}\naws_secret_access_key = {}\naws_session_token = {}\nregion = {region}\n",
        credentials.access_key_id, credentials.secret_access_key, credentials.session_token,
    )
}

fn session_name(policy_name: &str) -> String {
    let mut name = format!("zenith-credential-{policy_name}");
    name.truncate(MAX_SESSION_NAME_LEN);
    name
}

/// Rotator exchanging an OIDC identity token for temporary AWS credentials
/// via STS `AssumeRoleWithWebIdentity`.
pub struct AwsOidcRotator {
    store: Arc<dyn SecretStore>,
    sts: Arc<dyn StsClient>,
    token_provider: Arc<dyn TokenProvider>,
    policy: PolicyRef,
    pre_rotation_window: Duration,
    conflict_retries: u32,
    role_arn: String,
    region: String,
}

impl AwsOidcRotator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SecretStore>,
        sts: Arc<dyn StsClient>,
        token_provider: Arc<dyn TokenProvider>,
        policy: PolicyRef,
        pre_rotation_window: Duration,
        conflict_retries: u32,
        role_arn: String,
        region: String,
    ) -> Self {
        Self {
            store,
            sts,
            token_provider,
            policy,
            pre_rotation_window,
            conflict_retries,
            role_arn,
            region,
        }
    }
}

#[async_trait]
impl Rotator for AwsOidcRotator {
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
        tracing::info!(policy = %self.policy, role_arn = %self.role_arn, "rotating aws credentials");

        let identity = self.token_provider.fetch_token().await?;
        let credentials = self
            .sts
            .assume_role_with_web_identity(AssumeRoleRequest {
                role_arn: self.role_arn.clone(),
                web_identity_token: identity.token,
                session_name: session_name(&self.policy.name),
            })
            .await?;
        ensure_future_expiry(started_at, credentials.expiration, "sts credentials")?;

        let blob = credentials_file(DEFAULT_PROFILE, &credentials, &self.region);
        upsert_rotation_secret(self.store.as_ref(), &self.policy, self.conflict_retries, |secret| {
            set_expiration_time(secret, credentials.expiration);
            insert_data(secret, AWS_CREDENTIALS_KEY, &blob);
        })
        .await?;

        tracing::info!(
            policy = %self.policy,
            expires_at = %credentials.expiration,
            "aws credentials rotated"
        );
        Ok(credentials.expiration)
    }
}
