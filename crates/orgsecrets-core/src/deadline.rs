//! Caller-supplied deadlines for store calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SecretError;

/// A point in time by which an operation must finish.
///
/// Every store call the coordinator makes runs under the request's deadline;
/// once it passes, the call is abandoned with
/// [`SecretError::DeadlineExceeded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, zero once elapsed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut`, abandoning it if the deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::DeadlineExceeded`] naming `operation`.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T, SecretError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| SecretError::DeadlineExceeded { operation })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_budget() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert_eq!(deadline.run("noop", async { 7 }).await.unwrap(), 7);
        assert!(!deadline.is_elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_future_is_abandoned() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result = deadline
            .run("sleep", tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(
            result,
            Err(SecretError::DeadlineExceeded { operation: "sleep" })
        ));
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
