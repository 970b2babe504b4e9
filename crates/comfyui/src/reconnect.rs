//! Exponential-backoff connection attempts for ComfyUI WebSockets.
//!
//! Opening the per-job WebSocket goes through [`connect_with_retry`],
//! which retries a bounded number of times with increasing delays and
//! gives up early if the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIConnection, EngineClient};
use crate::engine::EngineError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Total connection attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Open a WebSocket for `client`, retrying with exponential backoff.
///
/// Returns the last connection error once `max_attempts` is exhausted, or
/// [`EngineError::Cancelled`] if `cancel` fires first.
pub async fn connect_with_retry(
    client: &EngineClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Result<ComfyUIConnection, EngineError> {
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(client_id = client.client_id(), "Connect cancelled");
                return Err(EngineError::Cancelled { prompt_id: None });
            }
            result = client.connect() => match result {
                Ok(conn) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Connected to ComfyUI after retry");
                    }
                    return Ok(conn);
                }
                Err(e) => e,
            }
        };

        if attempt >= max_attempts {
            tracing::error!(attempt, error = %error, "Giving up connecting to ComfyUI");
            return Err(EngineError::Connection(error.to_string()));
        }

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Connect attempt {attempt} failed, retrying",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled { prompt_id: None }),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
