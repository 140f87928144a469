//! Deadline guard for provider calls.
//!
//! Every provider call runs under the smaller of the per-call timeout and the
//! request deadline. Transient failures are retried with a fixed backoff as
//! long as the request deadline leaves room for another attempt. A call that
//! runs out of time is dropped, which cancels the underlying request.

use crate::config::{RetryConfig, TimeoutConfig};
use crate::error::ErrorKind;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

/// Timeout and retry policy applied to each provider call.
#[derive(Debug, Clone, Copy)]
pub struct CallGuard {
    client_timeout: Duration,
    attempts: usize,
    backoff: Duration,
}

impl CallGuard {
    pub fn new(client_timeout: Duration, attempts: usize, backoff: Duration) -> Self {
        Self {
            client_timeout,
            attempts,
            backoff,
        }
    }

    pub fn from_config(timeouts: &TimeoutConfig, retry: &RetryConfig) -> Self {
        Self::new(
            timeouts.client_timeout(),
            retry.attempts,
            Duration::from_millis(retry.backoff_ms),
        )
    }

    /// Run `op` under this guard, never past `deadline`.
    pub async fn run<T, F, Fut>(&self, deadline: Instant, mut op: F) -> Result<T, ErrorKind>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ErrorKind>>,
    {
        let client_timeout = self.client_timeout;
        let backoff = self.backoff;

        let attempt = move || {
            let call = op();
            async move {
                let limit = (Instant::now() + client_timeout).min(deadline);
                match timeout_at(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ErrorKind::Timeout),
                }
            }
        };

        // Only retry when another attempt could start before the deadline.
        let retryable =
            move |e: &ErrorKind| e.is_transient() && Instant::now() + backoff < deadline;

        RetryIf::start(
            FixedInterval::new(backoff).take(self.attempts),
            attempt,
            retryable,
        )
        .await
    }
}
