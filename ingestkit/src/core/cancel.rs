use crate::{err, error::IngestError};
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation signal shared between a caller and the
/// operations it started.
///
/// Clones observe the same signal. Operations check it at well defined
/// points, i.e. before every leaf read or emitted token, and unwind with
/// [Cancelled][crate::error::IngestErr::Cancelled] once it fires.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A token that is already cancelled.
    pub fn cancelled_token() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a cancellation error if the signal fired.
    pub fn check(&self) -> Result<(), IngestError> {
        if self.is_cancelled() {
            return err!(Cancelled);
        }
        Ok(())
    }

    /// Resolves once the signal fires. Meant for `tokio::select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, the wait cannot fail
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
