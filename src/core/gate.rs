//! # Per-workflow exclusive gate.
//!
//! One non-reentrant, non-blocking mutex per workflow. A busy gate is a
//! terminal skip: the work is dropped without running, nothing is queued and
//! nothing is retried.
//!
//! ```text
//! try_run(work)
//!   ├─ try_lock() fails ──► warn + GateBusy ──► Gated::Skipped   (work never polled)
//!   └─ try_lock() ok ─────► work.await ──► guard dropped ──► Gated::Ran(outcome)
//! ```
//!
//! The guard is released on every path out of `try_run`, including a panic
//! or the caller dropping the future mid-flight.
//!
//! ## Rules
//! - At most one gated unit per workflow is mid-flight at a time.
//! - Gates are never shared between workflows.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::runner::TaskOutcome;
use crate::events::{Bus, Event, EventKind};

/// Result of a gated invocation.
#[derive(Debug, Clone)]
pub enum Gated {
    /// The gate was free; the work ran to the given outcome.
    Ran(TaskOutcome),
    /// The gate was busy; the work did not run.
    Skipped,
}

impl Gated {
    /// True only when the work ran and completed.
    pub fn succeeded(&self) -> bool {
        matches!(self, Gated::Ran(out) if out.succeeded())
    }

    /// The outcome, if the work ran.
    pub fn outcome(&self) -> Option<&TaskOutcome> {
        match self {
            Gated::Ran(out) => Some(out),
            Gated::Skipped => None,
        }
    }
}

/// Non-blocking mutual exclusion for one workflow.
///
/// Cloning yields another handle to the **same** gate.
#[derive(Clone, Debug)]
pub struct ExclusiveGate {
    workflow: Arc<str>,
    lock: Arc<Mutex<()>>,
    bus: Bus,
}

impl ExclusiveGate {
    /// Creates a gate for `workflow`.
    pub fn new(workflow: impl Into<Arc<str>>, bus: Bus) -> Self {
        Self {
            workflow: workflow.into(),
            lock: Arc::new(Mutex::new(())),
            bus,
        }
    }

    /// Whether a gated unit currently holds the gate.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Runs `work` if the gate is free; skips it otherwise.
    ///
    /// `task` only labels the skip warning.
    pub async fn try_run<F>(&self, task: &str, work: F) -> Gated
    where
        F: Future<Output = TaskOutcome>,
    {
        let Ok(_guard) = self.lock.try_lock() else {
            warn!(workflow = %self.workflow, task, "another task of this workflow is running; skipped");
            self.bus.publish(
                Event::new(EventKind::GateBusy)
                    .with_workflow(Arc::clone(&self.workflow))
                    .with_task(task),
            );
            return Gated::Skipped;
        };

        debug!(workflow = %self.workflow, task, "gate acquired");
        let out = work.await;
        debug!(workflow = %self.workflow, task, reason = out.reason.as_label(), "gate released");
        Gated::Ran(out)
    }
}
