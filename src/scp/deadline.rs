//! Deadline and cancellation bounds for one transfer

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::ScpError;
use super::types::TransferOptions;

/// The time budget and cancellation token governing a transfer call
#[derive(Debug, Clone)]
pub struct TransferBounds {
    deadline: Instant,
    budget: Duration,
    cancel: CancellationToken,
}

impl TransferBounds {
    /// Use the call's deadline if it has one, otherwise `now + default_timeout`.
    pub fn new(options: &TransferOptions, default_timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = options.deadline.unwrap_or(now + default_timeout);
        Self {
            deadline,
            budget: deadline.saturating_duration_since(now),
            cancel: options.cancel.clone().unwrap_or_default(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast when the call is already cancelled or out of time.
    pub fn check(&self) -> Result<(), ScpError> {
        if self.cancel.is_cancelled() {
            return Err(ScpError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(ScpError::DeadlineExceeded(self.budget));
        }
        Ok(())
    }

    /// Drive `fut` until it finishes, the deadline passes or the token fires.
    ///
    /// On expiry `fut` is dropped, which stops any I/O it was awaiting.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ScpError>
    where
        F: Future<Output = Result<T, ScpError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScpError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(ScpError::DeadlineExceeded(self.budget)),
            res = fut => res,
        }
    }
}
