//! # Bounded execution of one unit of work.
//!
//! [`execute`] launches a [`Task`] on its own tokio task and waits for the first of:
//!
//! ```text
//!   worker finished ──► Completed / Failed / Fatal / Cancelled (by the work itself)
//!   scope cancelled ──► Cancelled  (worker abandoned)
//!   deadline passed ──► TimedOut   (worker abandoned)
//!   launch failed ────► StartFailure (no runtime, or `Task::spawn` panicked)
//! ```
//!
//! ## Rules
//! - The worker is **abandoned, not terminated**: its `JoinHandle` is dropped
//!   (detached) and its per-call token is cancelled. Work that never checks the
//!   token keeps running until it returns on its own; its result is discarded.
//! - Completion wins ties: a worker that finished by the time cancellation or
//!   the deadline is observed is reported as finished.
//! - A panic inside the work is treated as "never reports completion": the
//!   executor keeps waiting until the deadline or cancellation.
//! - A panic while *building* the future (inside [`Task::spawn`]) is a
//!   launch failure: it stays with this call and never reaches the loop.
//! - `timeout = None` waits for completion or cancellation only.
//! - Publishes `TaskStarting` and exactly one terminal event per call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    core::cancel::CancelScope,
    error::{TaskError, panic_message},
    events::{Bus, Event, EventKind},
    tasks::Task,
};

/// Why a bounded execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReason {
    /// The work returned `Ok(())` before cancellation and timeout.
    Completed,
    /// The deadline passed first (or the work itself reported a timeout).
    TimedOut,
    /// Cancellation was observed first (or the work returned `Canceled`).
    Cancelled,
    /// The work could not be launched.
    StartFailure,
    /// The work returned a contained error (`Fail`, `Conflict`).
    Failed,
    /// The work returned [`TaskError::Fatal`]; the caller must escalate.
    Fatal,
}

impl OutcomeReason {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OutcomeReason::Completed => "completed",
            OutcomeReason::TimedOut => "timed_out",
            OutcomeReason::Cancelled => "cancelled",
            OutcomeReason::StartFailure => "start_failure",
            OutcomeReason::Failed => "failed",
            OutcomeReason::Fatal => "fatal",
        }
    }
}

/// Result of one [`execute`] call. Never persisted.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Name of the executed task.
    pub task: Arc<str>,
    /// Why the execution ended.
    pub reason: OutcomeReason,
    /// Error text for `Failed`, `Fatal` and `StartFailure`.
    pub error: Option<Arc<str>>,
    /// Time from launch to the terminal decision.
    pub elapsed: Duration,
}

impl TaskOutcome {
    /// True only for [`OutcomeReason::Completed`].
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.reason == OutcomeReason::Completed
    }

    /// True for [`OutcomeReason::Fatal`].
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.reason == OutcomeReason::Fatal
    }

    /// Converts a non-successful outcome into the error a loop propagates.
    pub fn into_error(self) -> TaskError {
        let message = || {
            self.error
                .as_deref()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {}", self.task, self.reason.as_label()))
        };
        match self.reason {
            OutcomeReason::Fatal => TaskError::Fatal { error: message() },
            OutcomeReason::Cancelled => TaskError::Canceled,
            OutcomeReason::TimedOut => TaskError::Timeout {
                timeout: self.elapsed,
            },
            _ => TaskError::Fail { error: message() },
        }
    }
}

/// Runs `task` under `timeout` and the cancellation `scope`.
///
/// `workflow` only labels logs and events.
pub async fn execute<T: Task + ?Sized>(
    task: &T,
    workflow: &str,
    timeout: Option<Duration>,
    scope: &CancelScope,
    bus: &Bus,
) -> TaskOutcome {
    let started = Instant::now();
    let name: Arc<str> = Arc::from(task.name());
    let outcome = |reason: OutcomeReason, error: Option<String>| TaskOutcome {
        task: Arc::clone(&name),
        reason,
        error: error.map(Arc::from),
        elapsed: started.elapsed(),
    };

    debug!(workflow, task = %name, ?timeout, "launching task");
    bus.publish(
        Event::new(EventKind::TaskStarting)
            .with_workflow(workflow)
            .with_task(Arc::clone(&name)),
    );

    let runtime = match Handle::try_current() {
        Ok(h) => h,
        Err(e) => {
            error!(workflow, task = %name, error = %e, "task could not be launched");
            publish(bus, EventKind::TaskStartFailed, workflow, &name, |ev| {
                ev.with_reason(e.to_string())
            });
            return outcome(OutcomeReason::StartFailure, Some(e.to_string()));
        }
    };

    let call = scope.per_call();
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| task.spawn(call.clone()))) {
        Ok(fut) => fut,
        Err(payload) => {
            let msg = format!("task panicked while launching: {}", panic_message(payload.as_ref()));
            error!(workflow, task = %name, error = %msg, "task could not be launched");
            publish(bus, EventKind::TaskStartFailed, workflow, &name, |ev| ev.with_reason(msg.as_str()));
            return outcome(OutcomeReason::StartFailure, Some(msg));
        }
    };
    let mut worker = runtime.spawn(fut);
    let mut worker_gone = false;

    let expired = async {
        match timeout.filter(|d| !d.is_zero()) {
            Some(d) => time::sleep_until(started + d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);

    loop {
        tokio::select! {
            biased;

            joined = &mut worker, if !worker_gone => {
                let res = match joined {
                    Ok(res) => res,
                    Err(join_err) => {
                        warn!(workflow, task = %name, error = %join_err, "task panicked; waiting for deadline or cancellation");
                        worker_gone = true;
                        continue;
                    }
                };
                return finished(res, workflow, &name, bus, outcome);
            }
            _ = scope.cancelled() => {
                call.cancel();
                info!(workflow, task = %name, "stop requested; abandoning task");
                publish(bus, EventKind::TaskCancelled, workflow, &name, |ev| ev.with_elapsed(started.elapsed()));
                return outcome(OutcomeReason::Cancelled, None);
            }
            _ = &mut expired => {
                call.cancel();
                let limit = timeout.unwrap_or_default();
                warn!(workflow, task = %name, ?limit, "task exceeded its timeout; abandoning it");
                publish(bus, EventKind::TimeoutHit, workflow, &name, |ev| ev.with_timeout(limit));
                return outcome(OutcomeReason::TimedOut, None);
            }
        }
    }
}

fn finished<F>(
    res: Result<(), TaskError>,
    workflow: &str,
    name: &Arc<str>,
    bus: &Bus,
    outcome: F,
) -> TaskOutcome
where
    F: Fn(OutcomeReason, Option<String>) -> TaskOutcome,
{
    match res {
        Ok(()) => {
            let out = outcome(OutcomeReason::Completed, None);
            info!(workflow, task = %name, elapsed = ?out.elapsed, "task completed");
            publish(bus, EventKind::TaskCompleted, workflow, name, |ev| {
                ev.with_elapsed(out.elapsed)
            });
            out
        }
        Err(TaskError::Canceled) => {
            info!(workflow, task = %name, "task exited on cancellation");
            publish(bus, EventKind::TaskCancelled, workflow, name, |ev| ev);
            outcome(OutcomeReason::Cancelled, None)
        }
        Err(TaskError::Timeout { timeout }) => {
            warn!(workflow, task = %name, ?timeout, "task reported its own timeout");
            publish(bus, EventKind::TimeoutHit, workflow, name, |ev| {
                ev.with_timeout(timeout)
            });
            outcome(OutcomeReason::TimedOut, None)
        }
        Err(e) if e.is_fatal() => {
            error!(workflow, task = %name, error = %e, "task reported a fatal error");
            publish(bus, EventKind::TaskFailed, workflow, name, |ev| {
                ev.with_reason(e.to_string())
            });
            outcome(OutcomeReason::Fatal, Some(e.to_string()))
        }
        Err(e) => {
            warn!(workflow, task = %name, error = %e, label = e.as_label(), "task failed");
            publish(bus, EventKind::TaskFailed, workflow, name, |ev| {
                ev.with_reason(e.to_string())
            });
            outcome(OutcomeReason::Failed, Some(e.to_string()))
        }
    }
}

fn publish(
    bus: &Bus,
    kind: EventKind,
    workflow: &str,
    task: &Arc<str>,
    decorate: impl FnOnce(Event) -> Event,
) {
    bus.publish(decorate(
        Event::new(kind)
            .with_workflow(workflow)
            .with_task(Arc::clone(task)),
    ));
}
