//! Engine tuning knobs.

use std::time::Duration;

use crate::error::{RotationError, RotationResult};

/// Rotation engine configuration.
///
/// # Pre-rotation window
///
/// Rotation is triggered when the current time passes the stored expiration
/// minus this window, so consumers always hold a credential with at least
/// the window's worth of validity left.
#[derive(Clone, Debug)]
pub struct RotationConfig {
    /// Safety margin subtracted from a credential's expiration to decide
    /// when rotation is due.
    pub pre_rotation_window: Duration,

    /// Requeue interval after a failed rotation cycle. A single fixed
    /// interval rather than a backoff ladder: the previous credential stays
    /// valid until its own expiry, so there is no retry storm to dampen.
    pub retry_interval: Duration,

    /// How many times a conflicted secret write is re-attempted before the
    /// cycle fails.
    pub conflict_retries: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            pre_rotation_window: Duration::from_secs(5 * 60),
            retry_interval: Duration::from_secs(60),
            conflict_retries: 3,
        }
    }
}

impl RotationConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> RotationResult<()> {
        if self.pre_rotation_window.is_zero() {
            return Err(RotationError::configuration(
                "rotation config: preRotationWindow cannot be zero",
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(RotationError::configuration(
                "rotation config: retryInterval cannot be zero",
            ));
        }
        Ok(())
    }
}
