//! OIDC discovery and client-credentials token provider.
//!
//! The provider resolves its token endpoint once at construction — from the
//! issuer's discovery document unless the policy overrides it — and then
//! performs one `client_credentials` grant per [`TokenProvider::fetch_token`]
//! call. The client secret is re-read from its referenced Kubernetes secret
//! on every call, so secret updates take effect without a restart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use zenith_api::OidcConfig;

use crate::error::{RotationError, RotationResult};
use crate::store::{CLIENT_SECRET_KEY, SecretStore, read_secret_key};
use crate::token::{TokenExpiry, TokenProvider};

/// Issuer-relative path of the discovery document.
const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Relevant slice of an OIDC discovery document.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    issuer: String,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    scopes_supported: Vec<String>,
}

/// OAuth2 token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// [`TokenProvider`] performing an OAuth2 client-credentials grant against
/// an OIDC provider.
pub struct OidcTokenProvider {
    http: reqwest::Client,
    store: Arc<dyn SecretStore>,
    oidc: OidcConfig,
    /// Namespace the client-secret reference resolves in when it carries
    /// none of its own.
    policy_namespace: String,
    token_endpoint: String,
    scopes: Vec<String>,
}

// `store` is a trait object that does not implement `Debug`; skip it.
impl std::fmt::Debug for OidcTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcTokenProvider")
            .field("oidc", &self.oidc)
            .field("policy_namespace", &self.policy_namespace)
            .field("token_endpoint", &self.token_endpoint)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl OidcTokenProvider {
    /// Resolve the provider configuration, running OIDC discovery against
    /// the issuer unless the policy pins a token endpoint.
    ///
    /// Scopes advertised by the provider are merged into the requested set,
    /// mirroring providers that reject requests missing a mandatory scope.
    pub async fn discover(
        http: reqwest::Client,
        store: Arc<dyn SecretStore>,
        oidc: &OidcConfig,
        policy_namespace: &str,
    ) -> RotationResult<Self> {
        let (token_endpoint, discovered_scopes) = match &oidc.token_endpoint {
            Some(endpoint) => (endpoint.clone(), Vec::new()),
            None => Self::fetch_discovery(&http, &oidc.issuer).await?,
        };

        let mut scopes = oidc.scopes.clone();
        for scope in discovered_scopes {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        Ok(Self {
            http,
            store,
            oidc: oidc.clone(),
            policy_namespace: policy_namespace.to_string(),
            token_endpoint,
            scopes,
        })
    }

    /// Token endpoint the provider will post grants to.
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Scopes requested on each grant, after discovery merging.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    async fn fetch_discovery(
        http: &reqwest::Client,
        issuer: &str,
    ) -> RotationResult<(String, Vec<String>)> {
        let url = format!("{}{DISCOVERY_PATH}", issuer.trim_end_matches('/'));
        let response = http.get(&url).send().await.map_err(|err| {
            RotationError::exchange(format!("failed to fetch oidc discovery document {url}: {err}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RotationError::exchange(format!(
                "oidc discovery request {url} returned HTTP {status}"
            )));
        }
        let document: DiscoveryDocument = response.json().await.map_err(|err| {
            RotationError::exchange(format!("failed to parse oidc discovery document {url}: {err}"))
        })?;

        if document.issuer.is_empty() {
            return Err(RotationError::configuration(
                "issuer is required in oidc provider config",
            ));
        }
        let token_endpoint = document.token_endpoint.filter(|e| !e.is_empty()).ok_or_else(|| {
            RotationError::configuration("token_endpoint is required in oidc provider config")
        })?;

        Ok((token_endpoint, document.scopes_supported))
    }
}

#[async_trait]
impl TokenProvider for OidcTokenProvider {
    async fn fetch_token(&self) -> RotationResult<TokenExpiry> {
        let reference = &self.oidc.client_secret_ref;
        let secret_namespace = reference.namespace_or(&self.policy_namespace);
        let client_secret =
            read_secret_key(self.store.as_ref(), secret_namespace, &reference.name, CLIENT_SECRET_KEY)
                .await?;

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.oidc.client_id.clone()),
            ("client_secret", client_secret),
        ];
        let scope = self.scopes.join(" ");
        if !scope.is_empty() {
            form.push(("scope", scope));
        }

        tracing::debug!(
            endpoint = %self.token_endpoint,
            client_id = %self.oidc.client_id,
            "requesting oidc token"
        );

        let started_at = Utc::now();
        let response = self.http.post(&self.token_endpoint).form(&form).send().await.map_err(
            |err| {
                RotationError::exchange(format!(
                    "oidc token request to {} failed: {err}",
                    self.token_endpoint
                ))
            },
        )?;
        let status = response.status();
        if !status.is_success() {
            // Body intentionally not logged: error payloads from some
            // providers echo the client credentials back.
            return Err(RotationError::exchange(format!(
                "oidc token request to {} returned HTTP {status}",
                self.token_endpoint
            )));
        }
        let token: TokenResponse = response.json().await.map_err(|err| {
            RotationError::exchange(format!(
                "failed to parse oidc token response from {}: {err}",
                self.token_endpoint
            ))
        })?;

        let expires_in = token.expires_in.filter(|&seconds| seconds > 0).ok_or_else(|| {
            RotationError::exchange(format!(
                "oidc token response from {} is missing expires_in",
                self.token_endpoint
            ))
        })?;

        Ok(TokenExpiry::new(
            token.access_token,
            started_at + chrono::Duration::seconds(expires_in),
        ))
    }
}
