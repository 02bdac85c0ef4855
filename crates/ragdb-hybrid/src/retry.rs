use std::future::Future;
use std::time::Duration;

use ragdb_core::config::IngestSettings;
use ragdb_core::error::{Error, Result};
use tracing::warn;

/// Bounded retry with exponential backoff.
///
/// The delay before attempt `n` (n >= 2) is `min(base * 2^(n-2), max)`.
/// Errors that are not [`Error::is_transient`] end the loop at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

/// The last error once a [`RetryPolicy`] gave up.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: Error,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self { attempts: attempts.max(1), base_backoff, max_backoff }
    }

    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self::new(settings.retry_attempts, settings.retry_backoff(), settings.max_backoff())
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        self.base_backoff.saturating_mul(1 << exp).min(self.max_backoff)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.attempts && error.is_transient() => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(what, attempt, ?delay, %error, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(Exhausted { attempts: attempt, error }),
            }
        }
    }
}
