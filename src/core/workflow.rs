//! # Workflow lifecycle: start / stop / status around one background loop.
//!
//! A [`Workflow`] is created once per process and lives for the process
//! lifetime. Its loop task is created and destroyed across start/stop cycles.
//!
//! ```text
//!            start()                    stop()
//!   Idle ─────────────► Running ─────────────► Stopping ──► Idle
//!     ▲                    │   (local signal set,    (join ≤ join_grace,
//!     │                    │    bounded join)         then forced)
//!     └────────────────────┘
//!        loop exits on its own (stop observed, fatal escalation)
//! ```
//!
//! ## Rules
//! - Exactly one live loop per workflow; `start()` while running is a no-op.
//! - `running` is set only by `start()`, cleared by `stop()` and by the loop's
//!   own exit. A loop only clears it while it is still the current generation.
//! - `stop()` always ends in the stopped state, even when the join times out.
//!   A loop that outlives the join exits at its next cooperative check.
//! - `status()` reads atomics only and never waits.
//! - An error returned by the schedule, or a panic in it, sets the **shared**
//!   signal: every workflow stops at its next check.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    core::{
        cancel::{CancelScope, Wake},
        config::WorkflowConfig,
        gate::{ExclusiveGate, Gated},
        runner,
    },
    error::{TaskError, panic_message},
    events::{Bus, Event, EventKind},
    schedules::{DEFAULT_RUN_AFTER_HOUR, Schedule},
    tasks::Task,
};

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// No loop owned.
    Idle,
    /// A loop was started and not yet stopped.
    Running,
    /// `stop()` is waiting for the loop.
    Stopping,
}

/// Reply of [`Workflow::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartReply {
    /// What `start()` did.
    pub status: StartStatus,
    /// Always `true`: after `start()` the workflow is running.
    pub running: bool,
}

/// What [`Workflow::start`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartStatus {
    /// A new loop was spawned.
    #[serde(rename = "started")]
    Started,
    /// A loop was already running; nothing changed.
    #[serde(rename = "already running")]
    AlreadyRunning,
}

/// Reply of [`Workflow::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReply {
    /// Always `"stopped"`.
    pub status: &'static str,
    /// Always `false`.
    pub running: bool,
    /// Whether the loop confirmed its exit within the join grace.
    #[serde(skip)]
    pub joined: bool,
}

/// Snapshot returned by [`Workflow::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStatus {
    /// Human-readable name.
    pub name: String,
    /// Last recorded belief about the loop.
    pub running: bool,
    /// Lifecycle phase label.
    pub state: WorkflowPhase,
    /// Schedule variant label.
    pub schedule: &'static str,
    /// Static schedule configuration.
    pub config: WorkflowConfig,
}

/// How a loop task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop (local or shared) was observed.
    Stopped,
    /// The schedule returned an error; the shared signal was set.
    Fatal,
    /// The schedule panicked; the shared signal was set.
    Panicked,
}

impl LoopExit {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LoopExit::Stopped => "stopped",
            LoopExit::Fatal => "fatal",
            LoopExit::Panicked => "panicked",
        }
    }
}

/// Everything a schedule needs while its loop runs.
///
/// Handed to [`Schedule`] variants by reference; cheap to clone.
#[derive(Clone, Debug)]
pub struct LoopContext {
    /// Workflow id (labels logs and events).
    pub workflow: Arc<str>,
    /// Static configuration.
    pub config: WorkflowConfig,
    /// Cancellation scope of this loop generation.
    pub scope: CancelScope,
    /// The workflow's private gate.
    pub gate: ExclusiveGate,
    /// Runtime event bus.
    pub bus: Bus,
}

impl LoopContext {
    /// Runs `task` through the gate and the bounded executor with the
    /// configured timeout.
    pub async fn run_gated<T: Task + ?Sized>(&self, task: &T) -> Gated {
        let work = runner::execute(
            task,
            &self.workflow,
            self.config.timeout(),
            &self.scope,
            &self.bus,
        );
        self.gate.try_run(task.name(), work).await
    }

    /// Runs `task` inline on the loop task with its own per-call token.
    ///
    /// No timeout applies; the task must honor its token.
    pub async fn run_inline<T: Task + ?Sized>(&self, task: &T) -> Result<(), TaskError> {
        debug!(workflow = %self.workflow, task = task.name(), "running inline");
        task.spawn(self.scope.per_call()).await
    }

    /// See [`CancelScope::should_stop`].
    #[inline]
    pub fn should_stop(&self, specific: Option<&CancellationToken>) -> bool {
        self.scope.should_stop(specific)
    }

    /// See [`CancelScope::sleep`].
    #[inline]
    pub async fn sleep(&self, d: Duration) -> Wake {
        self.scope.sleep(d).await
    }

    /// Publishes an event labelled with this workflow.
    pub fn publish(&self, ev: Event) {
        self.bus.publish(ev.with_workflow(Arc::clone(&self.workflow)));
    }
}

struct LoopSlot {
    scope: CancelScope,
    handle: JoinHandle<LoopExit>,
}

/// One supervised, independently start/stoppable workflow.
pub struct Workflow {
    id: Arc<str>,
    name: String,
    config: WorkflowConfig,
    schedule: Arc<Schedule>,
    shared: CancellationToken,
    gate: ExclusiveGate,
    bus: Bus,
    join_grace: Duration,

    /// Generation of the live loop; `0` = not running.
    running: Arc<AtomicU64>,
    generations: AtomicU64,
    stopping: AtomicBool,
    slot: Mutex<Option<LoopSlot>>,
}

impl Workflow {
    /// Creates an idle workflow observing `shared`.
    ///
    /// A daily batch without `run_after_hour` gets
    /// [`DEFAULT_RUN_AFTER_HOUR`] written into its config, so `status()`
    /// reports the hour in force.
    pub fn new(
        id: impl Into<Arc<str>>,
        name: impl Into<String>,
        mut config: WorkflowConfig,
        schedule: Schedule,
        shared: CancellationToken,
        bus: Bus,
        join_grace: Duration,
    ) -> Self {
        let id = id.into();
        if matches!(schedule, Schedule::DailyBatch(_)) && config.run_after_hour.is_none() {
            info!(workflow = %id, hour = DEFAULT_RUN_AFTER_HOUR, "no run hour configured; using the default");
            config.run_after_hour = Some(DEFAULT_RUN_AFTER_HOUR);
        }
        Self {
            gate: ExclusiveGate::new(Arc::clone(&id), bus.clone()),
            id,
            name: name.into(),
            config,
            schedule: Arc::new(schedule),
            shared,
            bus,
            join_grace,
            running: Arc::new(AtomicU64::new(0)),
            generations: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            slot: Mutex::new(None),
        }
    }

    /// Workflow id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Static configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Last recorded belief about the loop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) != 0
    }

    /// Spawns the loop unless one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) -> StartReply {
        let mut slot = self.slot.lock().await;
        if self.is_running() {
            warn!(workflow = %self.id, "already running");
            return StartReply {
                status: StartStatus::AlreadyRunning,
                running: true,
            };
        }
        if self.shared.is_cancelled() {
            warn!(workflow = %self.id, "shared stop signal is set; the loop will exit at its first check");
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let scope = CancelScope::new(&self.shared);
        let ctx = LoopContext {
            workflow: Arc::clone(&self.id),
            config: self.config.clone(),
            scope: scope.clone(),
            gate: self.gate.clone(),
            bus: self.bus.clone(),
        };

        self.running.store(generation, Ordering::SeqCst);
        let handle = tokio::spawn(drive(
            Arc::clone(&self.schedule),
            ctx,
            Arc::clone(&self.running),
            generation,
        ));
        *slot = Some(LoopSlot { scope, handle });

        info!(workflow = %self.id, generation, schedule = self.schedule.kind(), "workflow started");
        self.bus.publish(
            Event::new(EventKind::WorkflowStarted).with_workflow(Arc::clone(&self.id)),
        );
        StartReply {
            status: StartStatus::Started,
            running: true,
        }
    }

    /// Sets the local signal, waits up to the join grace for the loop, and
    /// forces the stopped state either way.
    pub async fn stop(&self) -> StopReply {
        let mut slot = self.slot.lock().await;
        self.stopping.store(true, Ordering::SeqCst);
        info!(workflow = %self.id, "stop requested");
        self.bus.publish(
            Event::new(EventKind::WorkflowStopRequested).with_workflow(Arc::clone(&self.id)),
        );

        let joined = match slot.take() {
            Some(LoopSlot { scope, handle }) => {
                scope.request_stop();
                self.join(handle).await
            }
            None => true,
        };

        self.running.store(0, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
        info!(workflow = %self.id, joined, "workflow stopped");
        self.bus.publish(
            Event::new(EventKind::WorkflowStopped).with_workflow(Arc::clone(&self.id)),
        );
        StopReply {
            status: "stopped",
            running: false,
            joined,
        }
    }

    async fn join(&self, mut handle: JoinHandle<LoopExit>) -> bool {
        match time::timeout(self.join_grace, &mut handle).await {
            Ok(Ok(exit)) => {
                debug!(workflow = %self.id, exit = exit.as_label(), "loop joined");
                true
            }
            Ok(Err(join_err)) => {
                warn!(workflow = %self.id, error = %join_err, "loop task ended abnormally");
                true
            }
            Err(_elapsed) => {
                warn!(
                    workflow = %self.id,
                    grace = ?self.join_grace,
                    "loop did not exit within the join grace; it will stop at its next check"
                );
                self.bus.publish(
                    Event::new(EventKind::JoinTimeout)
                        .with_workflow(Arc::clone(&self.id))
                        .with_timeout(self.join_grace),
                );
                false
            }
        }
    }

    /// Snapshot from in-memory state; never waits.
    pub fn status(&self) -> WorkflowStatus {
        let running = self.is_running();
        let state = if self.stopping.load(Ordering::SeqCst) {
            WorkflowPhase::Stopping
        } else if running {
            WorkflowPhase::Running
        } else {
            WorkflowPhase::Idle
        };
        WorkflowStatus {
            name: self.name.clone(),
            running,
            state,
            schedule: self.schedule.kind(),
            config: self.config.clone(),
        }
    }
}

/// Body of the loop task: runs the schedule, escalates uncontained failures,
/// and performs the terminal cleanup.
async fn drive(
    schedule: Arc<Schedule>,
    ctx: LoopContext,
    running: Arc<AtomicU64>,
    generation: u64,
) -> LoopExit {
    info!(workflow = %ctx.workflow, schedule = schedule.kind(), "loop started");
    let exit = match guarded(schedule.run(&ctx)).await {
        Ok(Ok(())) => LoopExit::Stopped,
        Ok(Err(e)) => {
            escalate(&ctx, &e.to_string());
            LoopExit::Fatal
        }
        Err(panic_info) => {
            escalate(&ctx, &format!("loop panicked: {panic_info}"));
            LoopExit::Panicked
        }
    };

    let _ = running.compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    ctx.publish(Event::new(EventKind::LoopExited).with_reason(exit.as_label()));
    info!(workflow = %ctx.workflow, exit = exit.as_label(), "loop exited");
    exit
}

async fn guarded<F, T>(fut: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    std::panic::AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}

fn escalate(ctx: &LoopContext, reason: &str) {
    error!(
        workflow = %ctx.workflow,
        reason,
        "irrecoverable error; halting every workflow"
    );
    ctx.scope.escalate();
    ctx.publish(Event::new(EventKind::FatalEscalation).with_reason(reason));
}
