//! Cancellation scope
//!
//! Combines an external cancellation token with a deadline. Checked at step
//! boundaries; sub-operations are raced against it.

use gdpi_core::CancelReason;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Cooperative cancellation scope for one transaction
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Instant,
}

impl CancelScope {
    /// Scope that fires on `token` or after `timeout`, whichever comes first
    pub fn new(token: CancellationToken, timeout: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now() + timeout,
        }
    }

    /// Scope with only a deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }

    /// Step-boundary check
    pub fn check(&self) -> Result<(), CancelReason> {
        if self.token.is_cancelled() {
            Err(CancelReason::User)
        } else if Instant::now() >= self.deadline {
            Err(CancelReason::Timeout)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the scope fires first
    ///
    /// A fired scope drops `fut` at its current await point.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        self.check()?;
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(CancelReason::User),
            () = sleep_until(self.deadline) => Err(CancelReason::Timeout),
            output = fut => Ok(output),
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// The external token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let scope = CancelScope::with_timeout(Duration::from_secs(1));
        assert!(scope.check().is_ok());

        let result = scope.run(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(CancelReason::Timeout));
        assert_eq!(scope.check(), Err(CancelReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_fires() {
        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone(), Duration::from_secs(60));

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let result = scope.run(tokio::time::sleep(Duration::from_secs(5))).await;
        trigger.await.unwrap();

        assert_eq!(result, Err(CancelReason::User));
    }

    #[tokio::test]
    async fn test_completes_inside_scope() {
        let scope = CancelScope::with_timeout(Duration::from_secs(5));
        assert_eq!(scope.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_before_run() {
        let token = CancellationToken::new();
        token.cancel();
        let scope = CancelScope::new(token, Duration::from_secs(5));

        let mut polled = false;
        let result = scope
            .run(async {
                polled = true;
            })
            .await;
        assert_eq!(result, Err(CancelReason::User));
        assert!(!polled);
    }
}
