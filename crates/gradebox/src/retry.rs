//! Bounded retry of transient grading failures.

use std::future::Future;
use std::time::Duration;

#[cfg(test)]
use std::sync::Arc;

use tracing::warn;

use crate::config::GradingConfig;
use crate::error::GradingError;

/// Called before every attempt with the operation label and the 1-based
/// attempt number; a returned error replaces the attempt.
#[cfg(test)]
pub(crate) type RetryFaultHook = Arc<dyn Fn(&str, u32) -> Option<GradingError> + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    #[cfg(test)]
    fault_hook: Option<RetryFaultHook>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            #[cfg(test)]
            fault_hook: None,
        }
    }

    pub fn from_config(config: &GradingConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    #[cfg(test)]
    pub(crate) fn with_fault_hook(mut self, hook: RetryFaultHook) -> Self {
        self.fault_hook = Some(hook);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// has failed transiently `max_retries + 1` times. The last case
    /// becomes [`GradingError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GradingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GradingError>>,
    {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 1;
        loop {
            #[cfg(test)]
            let injected = self.fault_hook.as_ref().and_then(|hook| hook(label, attempt));
            #[cfg(not(test))]
            let injected: Option<GradingError> = None;

            let result = match injected {
                Some(err) => Err(err),
                None => op().await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(GradingError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
