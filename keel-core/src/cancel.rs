use crate::{Cancelled, Result, error::raise};
use std::{future::Future, sync::Arc};
use tokio::sync::watch;

/// Cooperative cancellation signal, cloned into every command that should observe it.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, the channel cannot close while waiting.
        let _ = receiver.wait_for(|v| *v).await;
    }
}

/// Run `future` unless `token` fires first, in which case [`Cancelled`] is returned.
pub async fn with_cancel<T>(
    token: Option<&CancellationToken>,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    let Some(token) = token else {
        return future.await;
    };
    if token.is_cancelled() {
        return Err(raise(Cancelled));
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(raise(Cancelled)),
        result = future => result,
    }
}
