//! Cooperative cancellation
//!
//! A `CancelToken` is threaded through every suspension point of an
//! execution: agent invocations, backoff sleeps and the drive loop itself.

use std::sync::Arc;

use tokio::sync::watch;

use concord_types::{ConcordError, Result};

/// Cloneable cancellation token
#[derive(Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self { sender: Arc::new(sender), receiver }
    }

    /// Signal cancellation to every clone of this token
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is signalled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender gone without a signal; park forever
                std::future::pending::<()>().await;
            }
        }
    }

    /// `Cancelled` when the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ConcordError::Cancelled);
        }
        Ok(())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep that aborts with `Cancelled` when the token fires first
pub async fn sleep_cancellable(duration: std::time::Duration, token: &CancelToken) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(ConcordError::Cancelled),
    }
}
