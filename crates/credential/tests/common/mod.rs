//! Shared fixtures for the rotation scenario tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zenith_api::{OidcConfig, PolicyRef, SecretRef};

/// A secret with UTF-8 data entries.
pub fn secret_with_data(namespace: &str, name: &str, entries: &[(&str, &str)]) -> Secret {
    let data: BTreeMap<String, ByteString> = entries
        .iter()
        .map(|(key, value)| ((*key).to_string(), ByteString(value.as_bytes().to_vec())))
        .collect();
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Secret::default()
    }
}

/// The client-secret holding secret referenced by the OIDC fixtures.
pub fn oidc_client_secret(namespace: &str) -> Secret {
    secret_with_data(namespace, "oidc-client-secret", &[("client-secret", "shhh")])
}

/// Policy identity used across the scenarios.
pub fn policy_ref(name: &str) -> PolicyRef {
    PolicyRef { name: name.to_string(), namespace: "default".to_string(), uid: "uid-1".to_string() }
}

/// OIDC configuration pointing at a mock server, pinning the token endpoint
/// so no discovery round trip is needed.
pub fn oidc_config_direct(server: &MockServer) -> OidcConfig {
    OidcConfig {
        issuer: server.uri(),
        token_endpoint: Some(format!("{}/token", server.uri())),
        client_id: "zenith-client".to_string(),
        client_secret_ref: SecretRef { name: "oidc-client-secret".to_string(), namespace: None },
        scopes: vec!["openid".to_string()],
    }
}

/// OIDC configuration that goes through discovery.
pub fn oidc_config_discovered(server: &MockServer) -> OidcConfig {
    OidcConfig { token_endpoint: None, ..oidc_config_direct(server) }
}

/// Mount a discovery document advertising `{uri}/token`.
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": server.uri(),
            "token_endpoint": format!("{}/token", server.uri()),
            "scopes_supported": ["openid", "offline_access"],
        })))
        .mount(server)
        .await;
}

/// Mount a client-credentials token response.
pub async fn mount_token_endpoint(server: &MockServer, access_token: &str, expires_in: i64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": expires_in,
        })))
        .mount(server)
        .await;
}
