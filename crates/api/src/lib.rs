//! Object model for the `CredentialPolicy` custom resource.
//!
//! A `CredentialPolicy` declares how the gateway obtains credentials for one
//! upstream LLM backend: either a static reference to an existing secret, or
//! an exchange configuration that the credential rotation engine turns into
//! short-lived cloud credentials.
//!
//! The engine treats these types as read-only input; the surrounding
//! reconciler owns fetching, caching, and status updates. Mutually exclusive
//! sub-modes (`credentialsFile` vs `oidcExchangeToken`, and the GCP source
//! selection) are modeled as enums so an invalid combination cannot be
//! represented once a policy has deserialized.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};

/// API group of the `CredentialPolicy` resource.
pub const POLICY_GROUP: &str = "gateway.zenith.dev";
/// API version of the `CredentialPolicy` resource.
pub const POLICY_VERSION: &str = "v1alpha1";
/// Kind of the `CredentialPolicy` resource.
pub const POLICY_KIND: &str = "CredentialPolicy";

/// A `CredentialPolicy` object as handed to the rotation engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialPolicy {
    /// Object identity, used for secret naming and ownership.
    pub metadata: PolicyRef,
    /// Declared credential source.
    pub spec: CredentialPolicySpec,
}

/// Identity of a policy object: enough to name generated secrets and to set
/// an owner reference on them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRef {
    pub name: String,
    pub namespace: String,
    /// Object UID, required for owner references.
    pub uid: String,
}

impl PolicyRef {
    /// Owner reference pointing at this policy, marked as the controller so
    /// generated secrets are garbage-collected with the policy.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: format!("{POLICY_GROUP}/{POLICY_VERSION}"),
            kind: POLICY_KIND.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            ..OwnerReference::default()
        }
    }
}

impl std::fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Per-provider credential declaration.
///
/// The provider set is closed: each variant carries a materially different
/// wire protocol, so new providers are added here rather than through any
/// open-ended registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CredentialPolicySpec {
    /// Static API key, consumed directly from the referenced secret.
    #[serde(rename = "APIKey", rename_all = "camelCase")]
    ApiKey {
        /// Secret holding the key material.
        secret_ref: SecretRef,
    },
    /// AWS credentials, static file or STS web-identity exchange.
    #[serde(rename = "AWSCredentials")]
    Aws(AwsCredentials),
    /// Azure bearer token obtained via an OAuth2 client-credentials grant.
    #[serde(rename = "AzureCredentials")]
    Azure(AzureCredentials),
    /// GCP access token via workload identity federation, or a static
    /// service-account key file.
    #[serde(rename = "GCPCredentials")]
    Gcp(GcpCredentials),
}

impl CredentialPolicySpec {
    /// Whether this policy needs the rotation engine at all. Static
    /// references are consumed as-is by the config generator.
    pub fn requires_rotation(&self) -> bool {
        match self {
            Self::ApiKey { .. } => false,
            Self::Aws(aws) => matches!(aws.auth, AwsAuth::OidcExchangeToken(_)),
            Self::Azure(_) => true,
            Self::Gcp(gcp) => matches!(
                gcp.source,
                GcpCredentialsSource::WorkloadIdentityFederationConfig(_)
            ),
        }
    }
}

/// Reference to a Kubernetes secret. The namespace defaults to the policy's
/// own namespace when absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl SecretRef {
    /// Namespace to resolve this reference in, falling back to `default_ns`.
    pub fn namespace_or<'a>(&'a self, default_ns: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_ns)
    }
}

/// OIDC provider configuration for a client-credentials token request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    /// Issuer URL; its discovery document supplies the token endpoint unless
    /// `token_endpoint` overrides it.
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Secret holding the OIDC client secret under the `client-secret` key.
    pub client_secret_ref: SecretRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// AWS credential declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCredentials {
    /// Region the exchanged credentials are scoped to.
    pub region: String,
    #[serde(flatten)]
    pub auth: AwsAuth,
}

/// Exactly one AWS authentication source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AwsAuth {
    /// Pre-provisioned credentials file; no rotation.
    CredentialsFile(AwsCredentialsFile),
    /// STS `AssumeRoleWithWebIdentity` exchange driven by an OIDC token.
    OidcExchangeToken(AwsOidcExchangeToken),
}

/// Static AWS credentials file referenced from a secret keyed on
/// `credentials`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCredentialsFile {
    pub secret_ref: SecretRef,
    #[serde(default = "default_aws_profile")]
    pub profile: String,
}

fn default_aws_profile() -> String {
    "default".to_string()
}

/// OIDC-to-STS exchange parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsOidcExchangeToken {
    #[serde(flatten)]
    pub oidc: OidcConfig,
    /// IAM role assumed with the exchanged web-identity token.
    pub aws_role_arn: String,
}

/// Azure credential declaration. The access token returned by the grant is
/// itself the usable credential, so this carries only the OAuth2 client
/// configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AzureCredentials {
    #[serde(flatten)]
    pub oidc: OidcConfig,
}

/// GCP credential declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpCredentials {
    /// Human-facing GCP project name, stored alongside the token for the
    /// config generator.
    pub project_name: String,
    pub region: String,
    #[serde(flatten)]
    pub source: GcpCredentialsSource,
}

/// Exactly one GCP credential source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GcpCredentialsSource {
    /// Pre-provisioned service-account key file; no rotation.
    CredentialsFile(GcpCredentialsFile),
    /// Workload identity federation exchange.
    WorkloadIdentityFederationConfig(GcpWorkloadIdentityFederation),
}

/// Static service-account key referenced from a secret keyed on
/// `service_account.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpCredentialsFile {
    pub secret_ref: SecretRef,
}

/// Workload identity federation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpWorkloadIdentityFederation {
    /// Numeric or alphanumeric project identifier used in the STS audience.
    #[serde(rename = "projectID")]
    pub project_id: String,
    pub workload_identity_pool_name: String,
    /// External identity provider registered in the pool.
    pub workload_identity_provider_name: String,
    /// OIDC configuration that mints the subject token for the exchange.
    pub oidc_exchange_token: OidcConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_impersonation: Option<GcpServiceAccountImpersonation>,
}

/// Service account to impersonate with the federated token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpServiceAccountImpersonation {
    pub service_account_name: String,
    pub service_account_project_name: String,
}

impl GcpServiceAccountImpersonation {
    /// Fully-qualified service account email.
    pub fn email(&self) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            self.service_account_name, self.service_account_project_name
        )
    }
}
