//! # Runtime events emitted by the supervisor, workflows and the executor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Workflow lifecycle**: start/stop requests, join timeouts, loop exit, fatal escalation
//! - **Task execution**: one bounded execution of a unit of work and its outcome
//! - **Scheduling**: pipeline cycles and daily batches
//! - **Runtime**: shutdown and subscriber health
//!
//! The [`Event`] struct carries optional metadata such as the workflow and task
//! names, a reason, and durations.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use linevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TimeoutHit)
//!     .with_workflow("lines")
//!     .with_task("painting_line")
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::TimeoutHit);
//! assert_eq!(ev.task.as_deref(), Some("painting_line"));
//! assert_eq!(ev.timeout_ms, Some(5_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing (`task` = subscriber name).
    SubscriberPanicked,
    /// Subscriber dropped an event (`task` = subscriber name, `reason` = "full"/"closed").
    SubscriberOverflow,

    // === Runtime events ===
    /// Process shutdown requested (OS signal or fatal escalation observed).
    ShutdownRequested,

    // === Workflow lifecycle ===
    /// `start()` spawned a new loop.
    WorkflowStarted,
    /// `stop()` set the local signal.
    WorkflowStopRequested,
    /// `stop()` finished; the workflow reports not running.
    WorkflowStopped,
    /// `stop()` gave up waiting for the loop (`timeout_ms` = join grace).
    JoinTimeout,
    /// The loop task returned (`reason` = exit reason label).
    LoopExited,
    /// A workflow set the shared signal (`reason` = error message).
    FatalEscalation,

    // === Task execution ===
    /// A unit of work is being launched.
    TaskStarting,
    /// Work finished before cancellation and timeout (`elapsed_ms`).
    TaskCompleted,
    /// Work returned a contained error (`reason`).
    TaskFailed,
    /// Work exceeded its timeout and was abandoned (`timeout_ms`).
    TimeoutHit,
    /// Cancellation was observed before the work finished; the work was abandoned.
    TaskCancelled,
    /// The work could not be launched.
    TaskStartFailed,
    /// The exclusive gate was busy; the work was skipped.
    GateBusy,

    // === Scheduling ===
    /// A pipeline or poll cycle began.
    CycleStarted,
    /// A cycle ran every step (`elapsed_ms`).
    CycleCompleted,
    /// A cycle stopped before its last step (`task` = step that ended it).
    CycleAborted,
    /// A conditional step did not run because its probes reported no rows.
    StepSkipped,
    /// The daily batch started its stages.
    BatchStarted,
    /// The daily batch ran its last stage.
    BatchCompleted,
    /// The daily batch found today's markers and did nothing.
    BatchAlreadyRun,
    /// The next wake-up was computed (`delay_ms`).
    WakeScheduled,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Workflow id, if applicable.
    pub workflow: Option<Arc<str>>,
    /// Task (or subscriber) name, if applicable.
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: Option<u32>,
    /// Delay before the next wake-up in milliseconds.
    pub delay_ms: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            workflow: None,
            task: None,
            reason: None,
            timeout_ms: None,
            elapsed_ms: None,
            delay_ms: None,
        }
    }

    /// Attaches a workflow id.
    #[inline]
    pub fn with_workflow(mut self, workflow: impl Into<Arc<str>>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an elapsed duration (stored as milliseconds).
    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a wake-up delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::CycleStarted);
        let b = Event::new(EventKind::CycleCompleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let ev = Event::new(EventKind::TimeoutHit).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
