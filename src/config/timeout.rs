//! Timeout and cadence configuration.
//!
//! Payment timeouts and verification cadence are operational knobs, not
//! constants: every value here can be overridden from the environment and
//! nothing in the engine hard-codes a duration at a call site.

use std::env;
use std::time::Duration;

/// Timeouts and polling cadences for the background monitors.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Scheduler due-task poll interval.
    pub poll_interval_secs: u64,
    /// Payment reconciliation sweep interval.
    pub payment_sweep_interval_secs: u64,
    /// How long an unfunded deal waits in `pending_payment` before it is
    /// auto-cancelled.
    pub payment_timeout_secs: u64,
    /// Cadence of post-survival checks inside the posted window.
    pub verify_interval_secs: u64,
    /// Maximum attempts for a drain blocked by chain unavailability.
    pub drain_max_attempts: u32,
    /// Base delay for the drain exponential backoff.
    pub drain_backoff_base_ms: u64,
    /// Bounded timeout applied to every chain RPC and gateway call.
    pub rpc_timeout_secs: u64,
    /// Consecutive reconciliation failures for one deal before alerting.
    pub failure_alert_threshold: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            payment_sweep_interval_secs: 60,
            payment_timeout_secs: 24 * 3600,
            verify_interval_secs: 3600,
            drain_max_attempts: 5,
            drain_backoff_base_ms: 500,
            rpc_timeout_secs: 15,
            failure_alert_threshold: 5,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl TimeoutConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval_secs: env_u64("SCHEDULER_POLL_INTERVAL_SECS", d.poll_interval_secs),
            payment_sweep_interval_secs: env_u64(
                "PAYMENT_SWEEP_INTERVAL_SECS",
                d.payment_sweep_interval_secs,
            ),
            payment_timeout_secs: env_u64("PAYMENT_TIMEOUT_SECS", d.payment_timeout_secs),
            verify_interval_secs: env_u64("VERIFY_INTERVAL_SECS", d.verify_interval_secs),
            drain_max_attempts: env_u64("DRAIN_MAX_ATTEMPTS", d.drain_max_attempts as u64) as u32,
            drain_backoff_base_ms: env_u64("DRAIN_BACKOFF_BASE_MS", d.drain_backoff_base_ms),
            rpc_timeout_secs: env_u64("RPC_TIMEOUT_SECS", d.rpc_timeout_secs),
            failure_alert_threshold: env_u64(
                "FAILURE_ALERT_THRESHOLD",
                d.failure_alert_threshold as u64,
            ) as u32,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn payment_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.payment_sweep_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Backoff delay for the given zero-based attempt number.
    pub fn drain_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.drain_backoff_base_ms.saturating_mul(1 << attempt.min(10)))
    }
}
