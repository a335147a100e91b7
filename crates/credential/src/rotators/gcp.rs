//! GCP workload-identity-federation rotator.
//!
//! The full flow: mint an OIDC identity token, exchange it at the GCP
//! Security Token Service for a federated access token, then — when
//! impersonation is configured — trade that for a service-account access
//! token via the IAM Credentials API. The final token lands in the generated
//! secret together with project name and region, which the config generator
//! reads back alongside it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use zenith_api::{GcpServiceAccountImpersonation, GcpWorkloadIdentityFederation, PolicyRef};

use crate::error::{RotationError, RotationResult};
use crate::rotators::{Rotator, ensure_future_expiry};
use crate::store::{
    SecretStore, insert_data, lookup_pre_rotation_time, rotation_secret_name,
    set_expiration_time, upsert_rotation_secret,
};
use crate::token::{TokenExpiry, TokenProvider};

/// Data key of the access token in the generated secret.
pub const GCP_ACCESS_TOKEN_KEY: &str = "gcpAccessToken";
/// Data key of the project name in the generated secret.
pub const GCP_PROJECT_NAME_KEY: &str = "projectName";
/// Data key of the region in the generated secret.
pub const GCP_REGION_KEY: &str = "region";
/// Key under which a static service-account key secret stores its JSON.
pub const GCP_SERVICE_ACCOUNT_KEY: &str = "service_account.json";

const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";
/// Scope requested for the federated token; impersonation only needs IAM.
const IAM_SCOPE: &str = "https://www.googleapis.com/auth/iam";
/// Scope requested for the impersonated service-account token.
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Production endpoint of the GCP Security Token Service.
pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.googleapis.com";
/// Production endpoint of the IAM Credentials API.
pub const DEFAULT_IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

/// GCP STS token-exchange response (OAuth-style field names).
#[derive(Debug, Deserialize)]
struct StsTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// IAM Credentials `generateAccessToken` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    /// RFC 3339.
    expire_time: String,
}

/// Stateless client for the two GCP exchanges.
///
/// Endpoints are injectable so tests can point the exchanger at a mock
/// server.
#[derive(Clone)]
pub struct GcpTokenExchanger {
    http: reqwest::Client,
    sts_endpoint: String,
    iam_endpoint: String,
}

impl GcpTokenExchanger {
    /// Exchanger against the production Google endpoints.
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_endpoints(http, DEFAULT_STS_ENDPOINT, DEFAULT_IAM_CREDENTIALS_ENDPOINT)
    }

    /// Exchanger with explicit STS and IAM Credentials endpoints.
    pub fn with_endpoints(
        http: reqwest::Client,
        sts_endpoint: impl Into<String>,
        iam_endpoint: impl Into<String>,
    ) -> Self {
        Self { http, sts_endpoint: sts_endpoint.into(), iam_endpoint: iam_endpoint.into() }
    }

    /// Exchange an OIDC JWT for a federated access token.
    pub async fn exchange_jwt_for_sts_token(
        &self,
        jwt: &str,
        wif: &GcpWorkloadIdentityFederation,
    ) -> RotationResult<TokenExpiry> {
        let audience = format!(
            "//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
            wif.project_id, wif.workload_identity_pool_name, wif.workload_identity_provider_name,
        );
        let body = serde_json::json!({
            "grantType": GRANT_TYPE_TOKEN_EXCHANGE,
            "audience": audience,
            "scope": IAM_SCOPE,
            "requestedTokenType": TOKEN_TYPE_ACCESS_TOKEN,
            "subjectToken": jwt,
            "subjectTokenType": TOKEN_TYPE_JWT,
        });

        let url = format!("{}/v1/token", self.sts_endpoint);
        let started_at = Utc::now();
        let result: RotationResult<StsTokenResponse> = async {
            let response = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|err| RotationError::exchange(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(RotationError::exchange(format!("HTTP {status} from {url}")));
            }
            response
                .json()
                .await
                .map_err(|err| RotationError::exchange(format!("malformed response: {err}")))
        }
        .await;

        let token = result.map_err(|err| sts_exchange_error(wif, &err))?;
        let expires_in = token
            .expires_in
            .filter(|&seconds| seconds > 0)
            .ok_or_else(|| {
                sts_exchange_error(wif, &RotationError::exchange("response is missing expires_in"))
            })?;

        Ok(TokenExpiry::new(
            token.access_token,
            started_at + chrono::Duration::seconds(expires_in),
        ))
    }

    /// Trade a federated token for an access token acting as the target
    /// service account.
    pub async fn impersonate_service_account(
        &self,
        sts_token: &str,
        target: &GcpServiceAccountImpersonation,
    ) -> RotationResult<TokenExpiry> {
        let email = target.email();
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{email}:generateAccessToken",
            self.iam_endpoint
        );
        let body = serde_json::json!({ "scope": [CLOUD_PLATFORM_SCOPE] });

        let result: RotationResult<GenerateAccessTokenResponse> = async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(sts_token)
                .json(&body)
                .send()
                .await
                .map_err(|err| RotationError::exchange(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(RotationError::exchange(format!("HTTP {status} from {url}")));
            }
            response
                .json()
                .await
                .map_err(|err| RotationError::exchange(format!("malformed response: {err}")))
        }
        .await;

        let token = result.map_err(|err| impersonation_error(&email, &err))?;
        let expires_at = DateTime::parse_from_rfc3339(&token.expire_time)
            .map_err(|err| {
                impersonation_error(
                    &email,
                    &RotationError::exchange(format!(
                        "malformed expireTime {:?}: {err}",
                        token.expire_time
                    )),
                )
            })?
            .with_timezone(&Utc);

        Ok(TokenExpiry::new(token.access_token, expires_at))
    }
}

fn sts_exchange_error(wif: &GcpWorkloadIdentityFederation, cause: &RotationError) -> RotationError {
    RotationError::exchange(format!(
        "failed to exchange JWT for STS token (project: {}, pool: {}): {cause}",
        wif.project_id, wif.workload_identity_pool_name,
    ))
}

fn impersonation_error(email: &str, cause: &RotationError) -> RotationError {
    RotationError::exchange(format!("failed to impersonate service account {email}: {cause}"))
}

/// Rotator for GCP workload identity federation, with optional
/// service-account impersonation.
pub struct GcpOidcTokenRotator {
    store: Arc<dyn SecretStore>,
    token_provider: Arc<dyn TokenProvider>,
    exchanger: GcpTokenExchanger,
    policy: PolicyRef,
    pre_rotation_window: Duration,
    conflict_retries: u32,
    project_name: String,
    region: String,
    wif: GcpWorkloadIdentityFederation,
}

impl GcpOidcTokenRotator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SecretStore>,
        token_provider: Arc<dyn TokenProvider>,
        exchanger: GcpTokenExchanger,
        policy: PolicyRef,
        pre_rotation_window: Duration,
        conflict_retries: u32,
        project_name: String,
        region: String,
        wif: GcpWorkloadIdentityFederation,
    ) -> Self {
        Self {
            store,
            token_provider,
            exchanger,
            policy,
            pre_rotation_window,
            conflict_retries,
            project_name,
            region,
            wif,
        }
    }
}

#[async_trait]
impl Rotator for GcpOidcTokenRotator {
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
        tracing::info!(
            policy = %self.policy,
            provider = %self.wif.workload_identity_provider_name,
            "rotating gcp access token"
        );

        let subject = self.token_provider.fetch_token().await?;
        let federated = self.exchanger.exchange_jwt_for_sts_token(&subject.token, &self.wif).await?;
        let access = match &self.wif.service_account_impersonation {
            Some(target) => {
                self.exchanger.impersonate_service_account(&federated.token, target).await?
            }
            None => federated,
        };
        ensure_future_expiry(started_at, access.expires_at, "gcp access token")?;

        upsert_rotation_secret(self.store.as_ref(), &self.policy, self.conflict_retries, |secret| {
            set_expiration_time(secret, access.expires_at);
            insert_data(secret, GCP_ACCESS_TOKEN_KEY, &access.token);
            insert_data(secret, GCP_PROJECT_NAME_KEY, &self.project_name);
            insert_data(secret, GCP_REGION_KEY, &self.region);
        })
        .await?;

        tracing::info!(policy = %self.policy, expires_at = %access.expires_at, "gcp access token rotated");
        Ok(access.expires_at)
    }
}
