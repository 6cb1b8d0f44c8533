//! Cancellation coordination
//!
//! Composes multiple cancellation sources into one effective token and
//! derives deadline tokens from timers. Every watcher or timer task spawned
//! here is owned by a [`LinkGuard`]; dropping the guard aborts the task, so
//! no subscription outlives the operation it guards.
//!
//! Cancellation is monotonic: once a composite fires it stays fired, even if
//! its guard is dropped afterwards.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the background tasks wired between tokens.
///
/// Must be kept alive for as long as the derived token should track its
/// sources. Dropping it tears the wiring down.
#[derive(Debug, Default)]
pub struct LinkGuard {
    handles: Vec<JoinHandle<()>>,
}

impl LinkGuard {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Merge another guard's tasks into this one.
    pub fn merge(&mut self, other: LinkGuard) {
        let mut other = other;
        self.handles.append(&mut other.handles);
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Combine several cancellation sources into one composite token.
///
/// The composite fires the instant any source fires, including sources that
/// are already cancelled at combine time.
pub fn combine(sources: &[CancellationToken]) -> (CancellationToken, LinkGuard) {
    let composite = CancellationToken::new();
    let mut guard = LinkGuard::default();

    for source in sources {
        if source.is_cancelled() {
            composite.cancel();
            continue;
        }
        let source = source.clone();
        let target = composite.clone();
        guard.push(tokio::spawn(async move {
            source.cancelled().await;
            target.cancel();
        }));
    }

    (composite, guard)
}

/// Derive a child token that also cancels after `timeout` elapses.
///
/// The parent is never cancelled by the timer; dropping the guard clears the
/// timer.
pub fn attach_timeout(
    parent: &CancellationToken,
    timeout: Duration,
) -> (CancellationToken, LinkGuard) {
    let child = parent.child_token();
    let mut guard = LinkGuard::default();

    let target = child.clone();
    guard.push(tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        target.cancel();
    }));

    (child, guard)
}

/// A standalone token that fires after `timeout` elapses.
pub fn deadline(timeout: Duration) -> (CancellationToken, LinkGuard) {
    attach_timeout(&CancellationToken::new(), timeout)
}
