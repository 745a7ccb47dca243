//! Cancellation and deadline handling for one reconciliation attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Phase, Result};

/// Carries the cancellation signal and deadline of a single attempt into
/// every outbound call.
#[derive(Clone, Debug)]
pub struct AttemptContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl AttemptContext {
    /// An attempt that only ends when `token` is cancelled.
    pub fn new(token: CancellationToken) -> Self {
        AttemptContext {
            token,
            deadline: None,
        }
    }

    /// An attempt that is also abandoned once `timeout` has elapsed.
    pub fn with_timeout(token: CancellationToken, timeout: Duration) -> Self {
        AttemptContext {
            token,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Whether the attempt has been cancelled or ran out of time.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Runs `fut`, returning [`Error::Cancelled`] for `phase` as soon as the
    /// attempt is cancelled or its deadline passes.
    pub async fn run<T, F>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled { phase }),
            _ = deadline => Err(Error::Cancelled { phase }),
            result = fut => result,
        }
    }
}
