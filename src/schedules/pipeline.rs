//! # Continuous-interval pipeline.
//!
//! ```text
//! loop while !should_stop:
//!   cycle start ──► step 1 ──► step 2 ──► ... ──► step N ──► CycleCompleted
//!                     │ gate + executor, in order
//!                     ├─ not Completed (incl. Skipped) ──► CycleAborted (rest dropped)
//!                     ├─ conditional, probe reports 0 ──► StepSkipped (next step runs)
//!                     └─ Fatal ──► Err (shared signal set by the lifecycle shell)
//!   sleep max(0, interval - elapsed) in chunks
//! ```
//!
//! A failed cycle is never retried within itself; the next cycle starts on
//! schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    core::{cancel::Wake, gate::Gated, workflow::LoopContext},
    data::DataLayer,
    error::TaskError,
    events::{Event, EventKind},
    tasks::TaskRef,
};

/// Sleep that keeps cycles `interval` apart; never negative.
///
/// ```
/// use std::time::Duration;
/// use linevisor::schedules::next_sleep;
///
/// let s = |n| Duration::from_secs(n);
/// assert_eq!(next_sleep(s(10), s(3)), s(7));
/// assert_eq!(next_sleep(s(10), s(15)), Duration::ZERO);
/// ```
pub fn next_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// One named step of a [`Pipeline`].
pub struct Step {
    task: TaskRef,
    probes: Vec<String>,
}

impl Step {
    /// Unconditional step.
    pub fn new(task: TaskRef) -> Self {
        Self {
            task,
            probes: Vec::new(),
        }
    }

    /// Runs the step only while every dataset in `datasets` holds rows.
    pub fn when_rows<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probes.extend(datasets.into_iter().map(Into::into));
        self
    }

    /// Task name.
    pub fn name(&self) -> &str {
        self.task.name()
    }
}

/// Ordered steps, one cycle per `poll_interval`.
pub struct Pipeline {
    steps: Vec<Step>,
    data: Arc<dyn DataLayer>,
}

enum CycleEnd {
    Completed,
    Aborted,
}

impl Pipeline {
    /// Empty pipeline; conditional steps probe `data`.
    pub fn new(data: Arc<dyn DataLayer>) -> Self {
        Self {
            steps: Vec::new(),
            data,
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub(crate) async fn run(&self, ctx: &LoopContext) -> Result<(), TaskError> {
        let interval = ctx.config.poll_interval;
        while !ctx.should_stop(None) {
            let started = Instant::now();
            ctx.publish(Event::new(EventKind::CycleStarted));

            match self.cycle(ctx).await? {
                CycleEnd::Completed => {
                    info!(workflow = %ctx.workflow, elapsed = ?started.elapsed(), "cycle completed");
                    ctx.publish(Event::new(EventKind::CycleCompleted).with_elapsed(started.elapsed()));
                }
                CycleEnd::Aborted => {}
            }

            let pause = next_sleep(interval, started.elapsed());
            debug!(workflow = %ctx.workflow, ?pause, "next cycle scheduled");
            if ctx.sleep(pause).await == Wake::Stopped {
                break;
            }
        }
        Ok(())
    }

    async fn cycle(&self, ctx: &LoopContext) -> Result<CycleEnd, TaskError> {
        for step in &self.steps {
            if ctx.should_stop(None) {
                info!(workflow = %ctx.workflow, task = step.name(), "stop requested; remaining steps dropped");
                ctx.publish(Event::new(EventKind::CycleAborted).with_task(step.name()).with_reason("stopping"));
                return Ok(CycleEnd::Aborted);
            }
            if !self.prerequisites_met(step, ctx).await {
                ctx.publish(Event::new(EventKind::StepSkipped).with_task(step.name()));
                continue;
            }

            match ctx.run_gated(step.task.as_ref()).await {
                Gated::Ran(out) if out.succeeded() => {}
                Gated::Ran(out) if out.is_fatal() => return Err(out.into_error()),
                Gated::Ran(out) => {
                    warn!(workflow = %ctx.workflow, task = %out.task, reason = out.reason.as_label(), "step did not complete; cycle aborted");
                    ctx.publish(
                        Event::new(EventKind::CycleAborted)
                            .with_task(Arc::clone(&out.task))
                            .with_reason(out.reason.as_label()),
                    );
                    return Ok(CycleEnd::Aborted);
                }
                Gated::Skipped => {
                    ctx.publish(Event::new(EventKind::CycleAborted).with_task(step.name()).with_reason("gate_busy"));
                    return Ok(CycleEnd::Aborted);
                }
            }
        }
        Ok(CycleEnd::Completed)
    }

    /// A probe error counts as an empty dataset.
    async fn prerequisites_met(&self, step: &Step, ctx: &LoopContext) -> bool {
        for dataset in &step.probes {
            match self.data.row_count(dataset).await {
                Ok(0) => {
                    warn!(workflow = %ctx.workflow, task = step.name(), dataset, "prerequisite dataset is empty; step skipped");
                    return false;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(workflow = %ctx.workflow, task = step.name(), dataset, error = %e, "prerequisite probe failed; step skipped");
                    return false;
                }
            }
        }
        true
    }
}
