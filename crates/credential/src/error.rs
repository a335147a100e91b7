//! Error types for credential rotation.
//!
//! Three categories, matching how the orchestrator reacts to them:
//!
//! - [`RotationError::Configuration`] — invalid exchange parameters, missing
//!   referenced secrets or keys, malformed generated secrets. Fast-fail; the
//!   engine never retries these on its own.
//! - [`RotationError::Exchange`] — a token exchange round trip failed.
//!   Retried only through the orchestrator's fixed-interval requeue.
//! - [`RotationError::Persistence`] — the secret write failed. Carries a
//!   `conflict` flag so the upsert helper can distinguish optimistic-
//!   concurrency conflicts (retried a bounded number of times) from hard
//!   API failures.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type RotationResult<T> = Result<T, RotationError>;

/// Errors produced by the rotation engine.
///
/// Every message is built to be self-diagnosing: it names the operation and
/// the identifying context (policy, role ARN, provider, service account) so
/// it can be surfaced verbatim as a policy status condition.
#[derive(Debug, Error)]
pub enum RotationError {
    /// Invalid or incomplete configuration, including missing referenced
    /// secrets. Not retried by the engine.
    #[error("{reason}")]
    Configuration {
        /// Human-readable description of what is wrong.
        reason: String,
    },

    /// A token exchange failed (OIDC, STS, IAM Credentials).
    #[error("{reason}")]
    Exchange {
        /// Human-readable description including the failed endpoint or
        /// principal.
        reason: String,
    },

    /// Creating or updating the generated secret failed.
    #[error("failed to persist secret {namespace}/{name}: {reason}")]
    Persistence {
        /// Namespace of the secret being written.
        namespace: String,
        /// Name of the secret being written.
        name: String,
        /// Underlying failure.
        reason: String,
        /// Whether this was an optimistic-concurrency conflict.
        conflict: bool,
    },
}

impl RotationError {
    /// Configuration error with the given reason.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration { reason: reason.into() }
    }

    /// Exchange error with the given reason.
    pub fn exchange(reason: impl Into<String>) -> Self {
        Self::Exchange { reason: reason.into() }
    }

    /// Persistence error for the named secret.
    pub fn persistence(
        namespace: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Persistence {
            namespace: namespace.into(),
            name: name.into(),
            reason: reason.into(),
            conflict: false,
        }
    }

    /// Persistence error caused by a write conflict.
    pub fn conflict(
        namespace: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Persistence {
            namespace: namespace.into(),
            name: name.into(),
            reason: reason.into(),
            conflict: true,
        }
    }

    /// Whether this error is an optimistic-concurrency conflict that the
    /// caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Persistence { conflict: true, .. })
    }

    /// Whether this error is a configuration fast-fail.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
