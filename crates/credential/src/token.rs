//! Token value object and provider trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RotationError, RotationResult};

/// A token and its expiration time — the universal return shape of every
/// exchange call.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenExpiry {
    /// The raw token material.
    pub token: String,
    /// When the token stops being usable.
    pub expires_at: DateTime<Utc>,
}

impl TokenExpiry {
    /// New token with the given expiry.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { token: token.into(), expires_at }
    }
}

// Token material must not leak into logs.
impl std::fmt::Debug for TokenExpiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExpiry")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of freshly exchanged tokens.
///
/// Implementations re-resolve any referenced secrets on every call; nothing
/// is cached between invocations.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Retrieve a token and its expiration time.
    async fn fetch_token(&self) -> RotationResult<TokenExpiry>;
}

/// Provider returning a fixed token, or a fixed failure.
///
/// Used by tests in place of a live OIDC endpoint.
pub struct StaticTokenProvider {
    token: TokenExpiry,
    fail_with: Option<String>,
}

impl StaticTokenProvider {
    /// Provider that always yields `token` expiring at `expires_at`.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { token: TokenExpiry::new(token, expires_at), fail_with: None }
    }

    /// Provider that always fails with an exchange error.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            token: TokenExpiry::new(String::new(), DateTime::<Utc>::UNIX_EPOCH),
            fail_with: Some(reason.into()),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> RotationResult<TokenExpiry> {
        match &self.fail_with {
            Some(reason) => Err(RotationError::exchange(reason.clone())),
            None => Ok(self.token.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token_material() {
        let token = TokenExpiry::new("super-secret", Utc::now());
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn static_provider_round_trips() {
        let expires_at = Utc::now();
        let provider = StaticTokenProvider::new("t", expires_at);
        let token = provider.fetch_token().await.unwrap();
        assert_eq!(token.token, "t");
        assert_eq!(token.expires_at, expires_at);

        let failing = StaticTokenProvider::failing("issuer unreachable");
        let err = failing.fetch_token().await.unwrap_err();
        assert_eq!(err.to_string(), "issuer unreachable");
    }
}
