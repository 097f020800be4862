use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::device::RetryPolicy;

/// Deployment-level engine policy. Persisted as a single JSON row so every
/// engine instance sharing the store sees the same policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// When true, plans are created in `pending_approval` and `apply_plan`
    /// demands a valid single-use token.
    pub require_approval: bool,
    /// Approval token time-to-live, in seconds.
    pub token_ttl_secs: i64,
    /// Blast-radius cap: maximum devices a single plan may target.
    pub max_devices_per_plan: usize,
    /// Seed value for plans that do not set their own halt policy.
    pub continue_on_failure: bool,
    /// Device call retry budget (transient failures only).
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Per-call deadline; exceeding it counts as a transient timeout.
    pub device_call_deadline_ms: u64,
    /// Simultaneous in-flight calls allowed per device; excess calls queue.
    pub per_device_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
            token_ttl_secs: 300,
            max_devices_per_plan: 50,
            continue_on_failure: false,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            device_call_deadline_ms: 10_000,
            per_device_concurrency: 2,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_millis(self.device_call_deadline_ms)
    }
}
