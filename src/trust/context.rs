//! Cancellation and deadline scope for outbound trust calls

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::trust::error::{TrustError, TrustResult};

/// Carries the caller's cancellation signal and an optional deadline.
///
/// Cloning shares the same token; `with_timeout` derives a child scope that is
/// cancelled whenever the parent is.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A scope with no deadline that is never cancelled by a parent
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child scope that expires after `timeout` (or earlier if the parent does)
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bound `timeout` by the time left before the deadline
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }

    /// Run an outbound call, aborting it on cancellation or deadline expiry
    pub async fn run<T, F>(&self, call: F) -> TrustResult<T>
    where
        F: Future<Output = TrustResult<T>>,
    {
        if self.is_cancelled() {
            return Err(TrustError::unknown("call cancelled before start"));
        }

        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = call => result,
            _ = self.cancel.cancelled() => Err(TrustError::unknown("call cancelled")),
            _ = expiry => Err(TrustError::unknown("deadline exceeded")),
        }
    }
}
