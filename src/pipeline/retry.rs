//! Retry policy and the per-call state machine.
//!
//! ```text
//! Idle ──▶ Sending ──▶ Success
//!             │
//!             ├─ transient, budget left ──▶ RetryWait ──▶ Sending
//!             ├─ transient, budget spent ──▶ Failed
//!             └─ fatal ───────────────────▶ Failed
//! ```
//!
//! Backoff is linear and capped: the n-th retry waits `min(n * unit, cap)`.
//! With the defaults (3 s unit, 10 s cap) the sequence is 3 s → 6 s → 9 s →
//! 10 s, never more than 10 s between attempts.

use crate::error::{FailureClass, InvocationError};
use std::time::Duration;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(retry)
            .min(self.backoff_cap)
    }
}

/// States of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Sending { attempt: u32 },
    RetryWait { attempt: u32, delay: Duration },
    Success { attempt: u32 },
    Failed { attempts: u32 },
}

impl CallState {
    /// Next state after the attempt in `Sending { attempt }` failed with `err`.
    ///
    /// Only meaningful from `Sending`; other states are returned unchanged.
    pub fn on_failure(self, err: &InvocationError, policy: &RetryPolicy) -> CallState {
        let CallState::Sending { attempt } = self else {
            return self;
        };
        match err.class() {
            FailureClass::Transient if attempt <= policy.max_retries => CallState::RetryWait {
                attempt,
                delay: policy.delay_for(attempt),
            },
            _ => CallState::Failed { attempts: attempt },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Success { .. } | CallState::Failed { .. })
    }
}
