//! Per-policy rotation decision logic.
//!
//! The orchestrator is the single entry point the reconcile loop calls: it
//! classifies the policy, builds the matching rotator with freshly resolved
//! configuration, decides whether rotation is due, and folds the outcome
//! into a [`Disposition`] the reconciler can turn into a requeue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use zenith_api::{
    AwsAuth, AwsOidcExchangeToken, CredentialPolicy, CredentialPolicySpec, GcpCredentials,
    GcpCredentialsFile, GcpCredentialsSource, GcpWorkloadIdentityFederation,
};

use crate::config::RotationConfig;
use crate::error::{RotationError, RotationResult};
use crate::oidc::OidcTokenProvider;
use crate::rotators::{
    AwsOidcRotator, AzureTokenRotator, GCP_SERVICE_ACCOUNT_KEY, GcpOidcTokenRotator,
    GcpTokenExchanger, Rotator, SdkStsClient, StsClient,
};
use crate::store::SecretStore;

/// Proxy for all reqwest-based exchanges (OIDC, GCP STS, IAM Credentials).
/// The AWS SDK keeps its own standard proxy handling.
const EXCHANGE_PROXY_ENV: &str = "ZENITH_EXCHANGE_PROXY_URL";

/// What the reconciler should do after a rotation cycle.
#[derive(Debug)]
pub enum Disposition {
    /// The policy has no exchange configuration; nothing was rotated and no
    /// timer-driven requeue is needed.
    Static,
    /// Rotation ran (or was skipped as not yet due); reconcile again after
    /// the given duration.
    Scheduled {
        /// Time until the next rotation is due, clamped to zero.
        requeue_after: Duration,
    },
    /// The cycle failed; reconcile again after the fixed retry interval and
    /// report the error on the policy status.
    Failed {
        /// Fixed retry interval from [`RotationConfig`].
        requeue_after: Duration,
        /// The failure, self-diagnosing for status conditions.
        error: RotationError,
    },
}

impl Disposition {
    /// The requeue duration, if any.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Static => None,
            Self::Scheduled { requeue_after } | Self::Failed { requeue_after, .. } => {
                Some(*requeue_after)
            }
        }
    }

    /// The surfaced error, if the cycle failed.
    pub fn error(&self) -> Option<&RotationError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Builds rotators per policy and runs due rotations.
pub struct RotationOrchestrator {
    store: Arc<dyn SecretStore>,
    http: reqwest::Client,
    config: RotationConfig,
    /// Test seam: production resolves an [`SdkStsClient`] per cycle.
    sts_override: Option<Arc<dyn StsClient>>,
    /// Test seam: (STS, IAM Credentials) endpoint pair.
    gcp_endpoints: Option<(String, String)>,
}

impl RotationOrchestrator {
    /// Orchestrator over the given secret store.
    pub fn new(store: Arc<dyn SecretStore>, config: RotationConfig) -> RotationResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            http: exchange_http_client()?,
            config,
            sts_override: None,
            gcp_endpoints: None,
        })
    }

    /// Replace the STS client used for AWS exchanges.
    pub fn with_sts_client(mut self, sts: Arc<dyn StsClient>) -> Self {
        self.sts_override = Some(sts);
        self
    }

    /// Point GCP exchanges at explicit STS / IAM Credentials endpoints.
    pub fn with_gcp_endpoints(
        mut self,
        sts_endpoint: impl Into<String>,
        iam_endpoint: impl Into<String>,
    ) -> Self {
        self.gcp_endpoints = Some((sts_endpoint.into(), iam_endpoint.into()));
        self
    }

    /// Run one rotation cycle for `policy`.
    ///
    /// Never returns an error: failures are folded into
    /// [`Disposition::Failed`] with the fixed retry interval, so a broken
    /// policy cannot stall the reconcile loop or turn into a retry storm.
    pub async fn reconcile(&self, policy: &CredentialPolicy) -> Disposition {
        match self.try_reconcile(policy).await {
            Ok(disposition) => disposition,
            Err(error) => {
                tracing::error!(
                    policy = %policy.metadata,
                    error = %error,
                    "credential rotation failed, retrying after fixed interval"
                );
                Disposition::Failed { requeue_after: self.config.retry_interval, error }
            }
        }
    }

    async fn try_reconcile(&self, policy: &CredentialPolicy) -> RotationResult<Disposition> {
        match &policy.spec {
            CredentialPolicySpec::ApiKey { .. } => Ok(Disposition::Static),
            CredentialPolicySpec::Aws(aws) => match &aws.auth {
                AwsAuth::CredentialsFile(_) => Ok(Disposition::Static),
                AwsAuth::OidcExchangeToken(exchange) => {
                    let rotator = self.aws_rotator(policy, &aws.region, exchange).await?;
                    self.run(policy, &rotator).await
                }
            },
            CredentialPolicySpec::Azure(azure) => {
                let provider = self.oidc_provider(policy, &azure.oidc).await?;
                let rotator = AzureTokenRotator::new(
                    self.store.clone(),
                    provider,
                    policy.metadata.clone(),
                    self.config.pre_rotation_window,
                    self.config.conflict_retries,
                );
                self.run(policy, &rotator).await
            }
            CredentialPolicySpec::Gcp(gcp) => {
                validate_gcp_credentials(gcp)?;
                match &gcp.source {
                    GcpCredentialsSource::CredentialsFile(file) => {
                        self.ensure_gcp_service_account_key(policy, file).await?;
                        Ok(Disposition::Static)
                    }
                    GcpCredentialsSource::WorkloadIdentityFederationConfig(wif) => {
                        let rotator = self.gcp_rotator(policy, gcp, wif).await?;
                        self.run(policy, &rotator).await
                    }
                }
            }
        }
    }

    /// The due-check-then-rotate step shared by every provider.
    async fn run(
        &self,
        policy: &CredentialPolicy,
        rotator: &dyn Rotator,
    ) -> RotationResult<Disposition> {
        let pre_rotation_time = rotator.pre_rotation_time().await?;
        if rotator.is_expired(pre_rotation_time) {
            let expires_at = rotator.rotate().await?;
            let next_rotation = expires_at - window_as_chrono(self.config.pre_rotation_window);
            tracing::info!(
                policy = %policy.metadata,
                next_rotation = %next_rotation,
                "credential rotated"
            );
            Ok(Disposition::Scheduled { requeue_after: until(next_rotation) })
        } else {
            tracing::debug!(
                policy = %policy.metadata,
                pre_rotation_time = %pre_rotation_time,
                "credential not yet due for rotation"
            );
            Ok(Disposition::Scheduled { requeue_after: until(pre_rotation_time) })
        }
    }

    async fn oidc_provider(
        &self,
        policy: &CredentialPolicy,
        oidc: &zenith_api::OidcConfig,
    ) -> RotationResult<Arc<OidcTokenProvider>> {
        Ok(Arc::new(
            OidcTokenProvider::discover(
                self.http.clone(),
                self.store.clone(),
                oidc,
                &policy.metadata.namespace,
            )
            .await?,
        ))
    }

    async fn aws_rotator(
        &self,
        policy: &CredentialPolicy,
        region: &str,
        exchange: &AwsOidcExchangeToken,
    ) -> RotationResult<AwsOidcRotator> {
        let provider = self.oidc_provider(policy, &exchange.oidc).await?;
        let sts: Arc<dyn StsClient> = match &self.sts_override {
            Some(sts) => sts.clone(),
            None => Arc::new(SdkStsClient::new(region).await),
        };
        Ok(AwsOidcRotator::new(
            self.store.clone(),
            sts,
            provider,
            policy.metadata.clone(),
            self.config.pre_rotation_window,
            self.config.conflict_retries,
            exchange.aws_role_arn.clone(),
            region.to_string(),
        ))
    }

    async fn gcp_rotator(
        &self,
        policy: &CredentialPolicy,
        gcp: &GcpCredentials,
        wif: &GcpWorkloadIdentityFederation,
    ) -> RotationResult<GcpOidcTokenRotator> {
        let provider = self.oidc_provider(policy, &wif.oidc_exchange_token).await?;
        let exchanger = match &self.gcp_endpoints {
            Some((sts, iam)) => {
                GcpTokenExchanger::with_endpoints(self.http.clone(), sts.clone(), iam.clone())
            }
            None => GcpTokenExchanger::new(self.http.clone()),
        };
        Ok(GcpOidcTokenRotator::new(
            self.store.clone(),
            provider,
            exchanger,
            policy.metadata.clone(),
            self.config.pre_rotation_window,
            self.config.conflict_retries,
            gcp.project_name.clone(),
            gcp.region.clone(),
            wif.clone(),
        ))
    }

    /// The non-rotating GCP mode: a pre-provisioned service-account key. No
    /// rotator and no generated secret — only verify the referenced secret
    /// exists and carries the expected JSON key, so a typo surfaces on the
    /// policy instead of at request time.
    async fn ensure_gcp_service_account_key(
        &self,
        policy: &CredentialPolicy,
        file: &GcpCredentialsFile,
    ) -> RotationResult<()> {
        let namespace = file.secret_ref.namespace_or(&policy.metadata.namespace);
        let secret = self
            .store
            .get(namespace, &file.secret_ref.name)
            .await?
            .ok_or_else(|| {
                RotationError::configuration(format!(
                    "gcp service account key secret {namespace}/{} not found",
                    file.secret_ref.name
                ))
            })?;
        let has_key = secret
            .data
            .as_ref()
            .is_some_and(|data| data.contains_key(GCP_SERVICE_ACCOUNT_KEY));
        if !has_key {
            return Err(RotationError::configuration(format!(
                "missing gcp service account key {GCP_SERVICE_ACCOUNT_KEY}"
            )));
        }
        Ok(())
    }
}

/// Field-level validation of a GCP credential declaration. The source
/// exclusivity (credentials file vs workload identity federation) is already
/// guaranteed by the policy type itself.
pub fn validate_gcp_credentials(gcp: &GcpCredentials) -> RotationResult<()> {
    if gcp.project_name.is_empty() {
        return Err(RotationError::configuration(
            "invalid GCP credentials configuration: projectName cannot be empty",
        ));
    }
    if gcp.region.is_empty() {
        return Err(RotationError::configuration(
            "invalid GCP credentials configuration: region cannot be empty",
        ));
    }
    if let GcpCredentialsSource::WorkloadIdentityFederationConfig(wif) = &gcp.source {
        if wif.project_id.is_empty() {
            return Err(RotationError::configuration(
                "invalid GCP Workload Identity Federation configuration: projectID cannot be empty",
            ));
        }
        if wif.workload_identity_pool_name.is_empty() {
            return Err(RotationError::configuration(
                "invalid GCP Workload Identity Federation configuration: workloadIdentityPoolName cannot be empty",
            ));
        }
        if wif.workload_identity_provider_name.is_empty() {
            return Err(RotationError::configuration(
                "invalid GCP Workload Identity Federation configuration: workloadIdentityProviderName cannot be empty",
            ));
        }
    }
    Ok(())
}

/// Shared HTTP client for all reqwest-based exchanges, honoring the proxy
/// override.
fn exchange_http_client() -> RotationResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Ok(proxy_url) = std::env::var(EXCHANGE_PROXY_ENV)
        && !proxy_url.is_empty()
    {
        let proxy = reqwest::Proxy::all(&proxy_url).map_err(|err| {
            RotationError::configuration(format!(
                "invalid {EXCHANGE_PROXY_ENV} value {proxy_url:?}: {err}"
            ))
        })?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|err| RotationError::configuration(format!("failed to build http client: {err}")))
}

fn window_as_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Duration from now until `at`, clamped to zero for past instants.
fn until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
