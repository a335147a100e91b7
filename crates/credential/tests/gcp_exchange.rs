//! GCP STS token exchange and service-account impersonation against a mock
//! server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zenith_api::{
    GcpServiceAccountImpersonation, GcpWorkloadIdentityFederation, OidcConfig, SecretRef,
};
use zenith_credential::rotators::{
    GCP_ACCESS_TOKEN_KEY, GCP_PROJECT_NAME_KEY, GCP_REGION_KEY, GcpOidcTokenRotator,
    GcpTokenExchanger, Rotator,
};
use zenith_credential::store::{MemorySecretStore, SecretStore, data_value, expiration_time};
use zenith_credential::token::StaticTokenProvider;

use common::policy_ref;

fn wif(impersonation: Option<GcpServiceAccountImpersonation>) -> GcpWorkloadIdentityFederation {
    GcpWorkloadIdentityFederation {
        project_id: "1234567890".to_string(),
        workload_identity_pool_name: "zenith-pool".to_string(),
        workload_identity_provider_name: "zenith-provider".to_string(),
        oidc_exchange_token: OidcConfig {
            issuer: "https://token.example.com".to_string(),
            token_endpoint: None,
            client_id: "c".to_string(),
            client_secret_ref: SecretRef { name: "s".to_string(), namespace: None },
            scopes: vec![],
        },
        service_account_impersonation: impersonation,
    }
}

fn impersonation() -> GcpServiceAccountImpersonation {
    GcpServiceAccountImpersonation {
        service_account_name: "inference".to_string(),
        service_account_project_name: "zenith-prod".to_string(),
    }
}

fn exchanger(server: &MockServer) -> GcpTokenExchanger {
    GcpTokenExchanger::with_endpoints(reqwest::Client::new(), server.uri(), server.uri())
}

async fn mount_sts_exchange(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .and(body_partial_json(serde_json::json!({
            "grantType": "urn:ietf:params:oauth:grant-type:token-exchange",
            "audience": "//iam.googleapis.com/projects/1234567890/locations/global/workloadIdentityPools/zenith-pool/providers/zenith-provider",
            "subjectToken": "subject-jwt",
            "subjectTokenType": "urn:ietf:params:oauth:token-type:jwt",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": token,
            "issued_token_type": "urn:ietf:params:oauth:token-type:access_token",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn jwt_exchanges_for_a_federated_token() {
    let server = MockServer::start().await;
    mount_sts_exchange(&server, "federated-token").await;

    let before = Utc::now();
    let token = exchanger(&server)
        .exchange_jwt_for_sts_token("subject-jwt", &wif(None))
        .await
        .unwrap();

    assert_eq!(token.token, "federated-token");
    assert!(token.expires_at > before + chrono::Duration::seconds(3590));
}

#[tokio::test]
async fn sts_rejection_reports_project_and_pool() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = exchanger(&server)
        .exchange_jwt_for_sts_token("subject-jwt", &wif(None))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.starts_with(
        "failed to exchange JWT for STS token (project: 1234567890, pool: zenith-pool)"
    ));
    assert!(message.contains("HTTP 403"));
}

#[tokio::test]
async fn impersonation_uses_the_federated_token_as_bearer() {
    let server = MockServer::start().await;
    let expire_time = (Utc::now() + chrono::Duration::hours(1))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    Mock::given(method("POST"))
        .and(path("/v1/projects/-/serviceAccounts/inference@zenith-prod.iam.gserviceaccount.com:generateAccessToken"))
        .and(header("authorization", "Bearer federated-token"))
        .and(body_partial_json(serde_json::json!({
            "scope": ["https://www.googleapis.com/auth/cloud-platform"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "impersonated-token",
            "expireTime": expire_time,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = exchanger(&server)
        .impersonate_service_account("federated-token", &impersonation())
        .await
        .unwrap();

    assert_eq!(token.token, "impersonated-token");
    assert_eq!(token.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true), expire_time);
}

#[tokio::test]
async fn rotation_without_impersonation_stores_the_federated_token() {
    let server = MockServer::start().await;
    mount_sts_exchange(&server, "federated-token").await;

    let store = Arc::new(MemorySecretStore::new());
    let rotator = GcpOidcTokenRotator::new(
        store.clone(),
        Arc::new(StaticTokenProvider::new(
            "subject-jwt",
            Utc::now() + chrono::Duration::hours(1),
        )),
        exchanger(&server),
        policy_ref("vertex"),
        Duration::from_secs(300),
        3,
        "zenith-prod".to_string(),
        "us-central1".to_string(),
        wif(None),
    );

    let expires_at = rotator.rotate().await.unwrap();
    assert!(expires_at > Utc::now());

    let secret = store.get("default", "zenith-cred-vertex").await.unwrap().unwrap();
    assert_eq!(data_value(&secret, GCP_ACCESS_TOKEN_KEY).as_deref(), Some("federated-token"));
    assert_eq!(data_value(&secret, GCP_PROJECT_NAME_KEY).as_deref(), Some("zenith-prod"));
    assert_eq!(data_value(&secret, GCP_REGION_KEY).as_deref(), Some("us-central1"));
    assert_eq!(expiration_time(&secret).unwrap().timestamp(), expires_at.timestamp());
}

#[tokio::test]
async fn impersonation_failure_leaves_the_store_untouched() {
    let server = MockServer::start().await;
    mount_sts_exchange(&server, "federated-token").await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/-/serviceAccounts/inference@zenith-prod.iam.gserviceaccount.com:generateAccessToken"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySecretStore::new());
    let rotator = GcpOidcTokenRotator::new(
        store.clone(),
        Arc::new(StaticTokenProvider::new(
            "subject-jwt",
            Utc::now() + chrono::Duration::hours(1),
        )),
        exchanger(&server),
        policy_ref("vertex"),
        Duration::from_secs(300),
        3,
        "zenith-prod".to_string(),
        "us-central1".to_string(),
        wif(Some(impersonation())),
    );

    let err = rotator.rotate().await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with(
        "failed to impersonate service account inference@zenith-prod.iam.gserviceaccount.com"
    ));
    assert!(message.contains("HTTP 401"));
    assert!(store.is_empty());
}

#[tokio::test]
async fn impersonated_token_supersedes_the_federated_token() {
    let server = MockServer::start().await;
    mount_sts_exchange(&server, "federated-token").await;
    let expire_time = (Utc::now() + chrono::Duration::minutes(30))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    Mock::given(method("POST"))
        .and(path("/v1/projects/-/serviceAccounts/inference@zenith-prod.iam.gserviceaccount.com:generateAccessToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "impersonated-token",
            "expireTime": expire_time,
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySecretStore::new());
    let rotator = GcpOidcTokenRotator::new(
        store.clone(),
        Arc::new(StaticTokenProvider::new(
            "subject-jwt",
            Utc::now() + chrono::Duration::hours(1),
        )),
        exchanger(&server),
        policy_ref("vertex"),
        Duration::from_secs(300),
        3,
        "zenith-prod".to_string(),
        "us-central1".to_string(),
        wif(Some(impersonation())),
    );

    rotator.rotate().await.unwrap();

    let secret = store.get("default", "zenith-cred-vertex").await.unwrap().unwrap();
    assert_eq!(
        data_value(&secret, GCP_ACCESS_TOKEN_KEY).as_deref(),
        Some("impersonated-token")
    );
}
