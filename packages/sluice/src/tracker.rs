//! Count of outstanding work.

use crate::channel::polling::{self, Timeout};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::watch,
    time::error::Elapsed,
};


/// Tracks how many units of work are outstanding, so a controller can wait for all of them
///
/// Each unit of work holds a [`CompletionGuard`] obtained from [`enter`](Self::enter). Dropping the
/// guard is what marks the unit as finished, so the count is decremented exactly once on every
/// exit path, including panics and aborts.
#[derive(Debug, Clone)]
pub struct CompletionTracker(Arc<watch::Sender<usize>>);

/// Keeps one unit of work outstanding in a [`CompletionTracker`] until dropped
#[derive(Debug)]
#[must_use = "the unit of work is marked finished as soon as the guard is dropped"]
pub struct CompletionGuard(CompletionTracker);

impl CompletionTracker {
    /// Construct with no outstanding work
    pub fn new() -> Self {
        CompletionTracker(Arc::new(watch::Sender::new(0)))
    }

    /// Mark one more unit of work as outstanding
    pub fn enter(&self) -> CompletionGuard {
        self.0.send_modify(|n| *n += 1);
        CompletionGuard(self.clone())
    }

    /// Number of currently outstanding units of work
    pub fn outstanding(&self) -> usize {
        *self.0.borrow()
    }

    fn wait_idle(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut recv = self.0.subscribe();
        async move {
            // guards hold tracker handles, so an error means nothing is outstanding anymore
            let _ = recv.wait_for(|&n| n == 0).await;
        }
    }

    /// Wait until no work is outstanding
    ///
    /// Returns immediately if nothing is outstanding. Work may be entered again afterwards.
    pub async fn wait(&self) {
        self.wait_idle().await
    }

    /// Wait until no work is outstanding, or the timeout elapses
    pub async fn wait_within(&self, timeout: Duration) -> Result<(), Elapsed> {
        let outcome = tokio::time::timeout(timeout, self.wait_idle()).await;
        if outcome.is_err() {
            debug!(outstanding = self.outstanding(), "timed out waiting for outstanding work");
        }
        outcome
    }

    /// Block the current thread until no work is outstanding
    pub fn wait_blocking(&self) {
        polling::block_on(self.wait_idle())
    }

    /// Block the current thread until no work is outstanding, or the timeout elapses
    ///
    /// Returns whether the outstanding count reached zero.
    pub fn wait_blocking_timeout(&self, timeout: Duration) -> bool {
        let mut fut = Box::pin(self.wait_idle());
        polling::poll(&mut fut, Timeout::At(Instant::now() + timeout)).is_some()
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        CompletionTracker::new()
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        (self.0).0.send_modify(|n| *n -= 1);
    }
}
