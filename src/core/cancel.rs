//! # Tri-level cancellation scope.
//!
//! Every workflow observes three signals:
//!
//! ```text
//! shared   (Supervisor-owned, one per process; any workflow may set it on fatal error)
//!   └─► local    (one per workflow start; set by stop())
//!         └─► per-call (one per bounded execution; set when the executor abandons work)
//! ```
//!
//! The tokens are derived with [`CancellationToken::child_token`], so
//! cancellation flows downward only: setting a per-call token never stops the
//! workflow, setting a local token never stops the other workflows.
//!
//! ## Rules
//! - A workflow is stopping iff the shared **or** local **or** specific signal is set.
//! - Signals are never cleared; `start()` after `stop()` derives a fresh local token.
//! - Every suspension point of a loop goes through [`CancelScope::sleep`], which
//!   re-checks the scope every [`SLEEP_TICK`].

use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Granularity of every cancellable sleep.
pub const SLEEP_TICK: Duration = Duration::from_millis(500);

/// How a cancellable sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The full duration elapsed.
    Elapsed,
    /// The scope was cancelled before the duration elapsed.
    Stopped,
}

/// Cancellation context handed to a workflow loop.
#[derive(Clone, Debug)]
pub struct CancelScope {
    shared: CancellationToken,
    local: CancellationToken,
}

impl CancelScope {
    /// Derives a fresh local signal under `shared`.
    pub fn new(shared: &CancellationToken) -> Self {
        Self {
            shared: shared.clone(),
            local: shared.child_token(),
        }
    }

    /// Builds a scope from two independent tokens.
    ///
    /// [`should_stop`](Self::should_stop) still observes both; prefer [`CancelScope::new`].
    pub fn from_parts(shared: CancellationToken, local: CancellationToken) -> Self {
        Self { shared, local }
    }

    /// Single cancellation predicate consulted at every suspension point.
    ///
    /// True iff the shared signal, the local signal, or `specific` (when given) is set.
    pub fn should_stop(&self, specific: Option<&CancellationToken>) -> bool {
        self.shared.is_cancelled()
            || self.local.is_cancelled()
            || specific.is_some_and(CancellationToken::is_cancelled)
    }

    /// Shorthand for `should_stop(None)`.
    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.should_stop(None)
    }

    /// Whether the process-wide signal has been set.
    #[inline]
    pub fn is_halted(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Derives a per-call token for one bounded execution.
    pub fn per_call(&self) -> CancellationToken {
        self.local.child_token()
    }

    /// Sets the local signal (workflow stop).
    pub fn request_stop(&self) {
        self.local.cancel();
    }

    /// Sets the shared signal: every workflow sharing it stops at its next check.
    pub fn escalate(&self) {
        self.shared.cancel();
    }

    /// Completes once the shared or local signal is set.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.shared.cancelled() => {}
            _ = self.local.cancelled() => {}
        }
    }

    /// Sleeps for `total` in [`SLEEP_TICK`] chunks, re-checking the scope
    /// between chunks. A stop request is honored within one tick.
    pub async fn sleep(&self, total: Duration) -> Wake {
        let deadline = Instant::now() + total;
        loop {
            if self.is_stopping() {
                return Wake::Stopped;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wake::Elapsed;
            }
            time::sleep((deadline - now).min(SLEEP_TICK)).await;
        }
    }
}
