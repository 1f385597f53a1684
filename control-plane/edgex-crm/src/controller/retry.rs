//! Conflict retry for read-modify-write cycles against the store.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::store::StoreResult;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or runs out of attempts. Each attempt is expected to re-read the object.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_conflict() && attempt < config.max_attempts => {
                // 0.5x to 1.5x of the current delay
                let jitter = rand::rng().random_range(0.5..1.5);
                let wait =
                    Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                debug!(
                    op = %op_name,
                    attempt,
                    error = %e,
                    delay_ms = wait.as_millis() as u64,
                    "conflict; retrying with a fresh read"
                );
                tokio::time::sleep(wait).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(op = %op_name, attempt, error = %e, "conflict retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
