//! Credential rotation engine for the Zenith gateway controller.
//!
//! Upstream LLM backends want short-lived cloud credentials: AWS temporary
//! security credentials, Azure OAuth bearer tokens, GCP federated or
//! impersonated access tokens. Operators only declare *how* to obtain them in
//! a [`zenith_api::CredentialPolicy`]; this crate continuously exchanges that
//! declaration for live credentials, persists them into a generated
//! Kubernetes secret, and tells the reconciler when to come back — early
//! enough that the data plane never observes an expired credential.
//!
//! The moving parts, leaves first:
//!
//! - [`oidc`] and the protocol clients inside [`rotators`] implement the
//!   three wire exchanges (OIDC client credentials, AWS STS web identity,
//!   GCP STS token exchange with optional service-account impersonation);
//! - [`rotators`] wraps each exchange behind the uniform [`rotators::Rotator`]
//!   contract and owns the secret encoding for its provider;
//! - [`store`] holds the secret naming/annotation helpers and the
//!   [`store::SecretStore`] trait with kube-backed and in-memory
//!   implementations;
//! - [`orchestrator`] decides per policy whether rotation is due, runs it,
//!   and translates the outcome into a requeue decision.
//!
//! The engine has no tasks of its own: it is driven synchronously by the
//! surrounding reconcile loop, once per policy per trigger.

/// Engine tuning knobs (pre-rotation window, retry interval).
pub mod config;
/// Error taxonomy shared by every engine operation.
pub mod error;
/// OIDC discovery and client-credentials token provider.
pub mod oidc;
/// Per-policy rotation decision logic.
pub mod orchestrator;
/// The `Rotator` contract and its AWS / Azure / GCP implementations.
pub mod rotators;
/// Generated-secret naming, annotations, and persistence.
pub mod store;
/// Token value object and provider trait.
pub mod token;

pub use crate::config::RotationConfig;
pub use crate::error::{RotationError, RotationResult};
pub use crate::orchestrator::{Disposition, RotationOrchestrator};
pub use crate::rotators::Rotator;
pub use crate::store::SecretStore;
pub use crate::token::{TokenExpiry, TokenProvider};
