//! Bounded readiness polling.
//!
//! The calling thread sleeps between probes; there is no background task.
//! A probe error ends the wait immediately, a negative probe counts as one
//! attempt.

use std::thread;
use std::time::Duration;

use mgradm_core::config::WaitConfig;
use mgradm_core::Component;
use tracing::{debug, warn};

use crate::adapter::{AdapterError, AdapterResult};

/// Attempt ceiling and fixed interval for a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    /// 60 attempts, one second apart.
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(1),
        }
    }
}

impl From<&WaitConfig> for WaitPolicy {
    fn from(config: &WaitConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            interval: config.interval(),
        }
    }
}

impl WaitPolicy {
    /// No sleeping between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            interval: Duration::ZERO,
        }
    }
}

/// Call `probe` until it reports ready, at most `policy.attempts` times.
pub fn poll_until<F>(component: Component, policy: &WaitPolicy, mut probe: F) -> AdapterResult<()>
where
    F: FnMut() -> AdapterResult<bool>,
{
    for attempt in 1..=policy.attempts {
        if probe()? {
            debug!(%component, attempt, "workload ready");
            return Ok(());
        }
        debug!(
            %component,
            attempt,
            max = policy.attempts,
            "workload not ready yet"
        );
        if attempt < policy.attempts && !policy.interval.is_zero() {
            thread::sleep(policy.interval);
        }
    }

    warn!(%component, attempts = policy.attempts, "gave up waiting for workload");
    Err(AdapterError::Timeout {
        component,
        attempts: policy.attempts,
    })
}
