//! Cooperative cancellation for build attempts.
//!
//! One [`CancelHandle`] exists per attempt; any number of [`CancelToken`]
//! clones observe it. Cancellation is checked at every suspension point
//! (network reads, pacing sleeps), never preemptive. Dropping the handle
//! without cancelling leaves the tokens permanently uncancelled, so a select
//! arm on [`CancelToken::cancelled`] simply never fires.

use tokio::sync::watch;

/// Triggering side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a fresh handle and its first token.
    #[must_use]
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        // send only fails when every token is gone, which makes the
        // cancellation moot anyway.
        let _ = self.tx.send(true);
    }

    /// A new token observing this handle.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// True once `cancel` was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observing side of a cancellation pair.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Synchronous check, for loop headers between suspension points.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this pends forever;
    /// combine it with other branches in `select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_resolves_waiters() {
        let (handle, token) = CancelHandle::new();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (handle, token) = CancelHandle::new();
        drop(handle);
        assert!(!token.is_cancelled());
        let raced = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(raced.is_err(), "cancelled() must pend forever");
    }

    #[tokio::test]
    async fn tokens_created_after_cancel_observe_it() {
        let (handle, _first) = CancelHandle::new();
        handle.cancel();
        assert!(handle.token().is_cancelled());
    }
}
