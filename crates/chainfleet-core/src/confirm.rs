//! Bounded retry around the confirmation await
//!
//! Every suspension on an external confirmation goes through
//! [`await_receipt`]. Transient collaborator errors and per-attempt
//! timeouts are retried with doubling backoff; reverts and dropped
//! submissions are returned immediately.

use crate::chain::Confirmer;
use crate::error::{ChainError, ConfirmError};
use crate::types::{PendingRef, Receipt, ReceiptStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for confirmation awaits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationPolicy {
    /// Attempts per await, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Upper bound for a single attempt
    pub attempt_timeout_ms: u64,
}

impl ConfirmationPolicy {
    /// Create default policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no backoff
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// With max attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// With backoff bounds
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = duration_ms(initial);
        self.max_backoff_ms = duration_ms(max);
        self
    }

    /// With per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = duration_ms(timeout);
        self
    }

    /// Per-attempt timeout
    #[inline]
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Backoff before attempt `attempt + 1` (1-based `attempt`)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            attempt_timeout_ms: 600_000,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Await a successful receipt for `pending` under `policy`
///
/// # Errors
/// - `ConfirmError::Reverted` if the receipt has reverted status
/// - `ConfirmError::Dropped` if the collaborator reports the submission gone
/// - `ConfirmError::TimedOut` / `Exhausted` once the retry budget is spent
/// - `ConfirmError::Chain` for other collaborator failures
pub async fn await_receipt(
    confirmer: &dyn Confirmer,
    pending: &PendingRef,
    policy: &ConfirmationPolicy,
) -> Result<Receipt, ConfirmError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(policy.attempt_timeout(), confirmer.receipt(pending)).await;

        let retry_reason = match outcome {
            Ok(Ok(receipt)) => {
                return match receipt.status {
                    ReceiptStatus::Success => Ok(receipt),
                    ReceiptStatus::Reverted => Err(ConfirmError::Reverted {
                        pending: pending.clone(),
                        block_number: receipt.block_number,
                    }),
                };
            }
            Ok(Err(ChainError::Dropped(dropped))) => return Err(ConfirmError::Dropped(dropped)),
            Ok(Err(err)) if err.is_transient() => {
                if attempt >= max_attempts {
                    return Err(ConfirmError::Exhausted {
                        pending: pending.clone(),
                        attempts: attempt,
                        last: err,
                    });
                }
                err.to_string()
            }
            Ok(Err(source)) => {
                return Err(ConfirmError::Chain {
                    pending: pending.clone(),
                    source,
                })
            }
            Err(_elapsed) => {
                if attempt >= max_attempts {
                    return Err(ConfirmError::TimedOut {
                        pending: pending.clone(),
                        attempts: attempt,
                    });
                }
                format!("no receipt within {:?}", policy.attempt_timeout())
            }
        };

        let delay = policy.backoff(attempt);
        tracing::warn!(
            pending = %pending,
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason = %retry_reason,
            "confirmation attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
