//! # Calendar-day batch.
//!
//! ```text
//! loop while !should_stop:
//!   read markers (error ⇒ absent)
//!   hour < run_after_hour ──► sleep until today HH:00 ──► continue
//!   both markers == today ──► BatchAlreadyRun
//!   otherwise ────────────► stages in order (stop checked before each)
//!   sleep max(5s, tomorrow HH:00 - now)
//! ```
//!
//! Both sleeps are chunked like every other loop sleep, so a stop is honored
//! within one tick even while waiting for the next day.
//!
//! Stage kinds:
//! - [`Stage::inline`] runs on the loop itself; any error but `Canceled` escapes.
//! - [`Stage::retried`] retries soft failures with a fixed, cancellable delay;
//!   exhausting the attempts escapes.
//! - [`Stage::gated`] goes through gate and executor; failures are logged and
//!   the batch continues, `Fatal` escapes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    core::{cancel::Wake, gate::Gated, workflow::LoopContext},
    data::{DataLayer, ScheduleMarker},
    error::TaskError,
    events::{Event, EventKind},
    tasks::TaskRef,
};

/// Run hour of a daily batch whose config does not name one.
pub const DEFAULT_RUN_AFTER_HOUR: u32 = 0;

/// Floor of the sleep between two daily runs.
pub const MIN_DAILY_SLEEP: Duration = Duration::from_secs(5);

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// [`Clock`] backed by the system's local time zone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Whether today's batch still has to run.
///
/// Only a marker whose **both** dates equal `today` suppresses the run.
pub fn should_run(marker: Option<&ScheduleMarker>, today: NaiveDate) -> bool {
    !marker.is_some_and(|m| m.completed_on(today))
}

/// `day` at `hour:00:00`. Hours past 23 clamp to 23.
pub fn run_at(day: NaiveDate, hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    day.and_time(time)
}

/// Delay from `now` to tomorrow's run hour, never below [`MIN_DAILY_SLEEP`].
pub fn until_next_run(now: NaiveDateTime, hour: u32) -> Duration {
    let tomorrow = now.date().checked_add_days(Days::new(1)).unwrap_or(now.date());
    (run_at(tomorrow, hour) - now)
        .to_std()
        .unwrap_or_default()
        .max(MIN_DAILY_SLEEP)
}

#[derive(Debug, Clone, Copy)]
enum StageKind {
    Inline,
    Retried { retries: u32, delay: Duration },
    Gated,
}

/// One stage of a [`DailyBatch`].
pub struct Stage {
    task: TaskRef,
    kind: StageKind,
}

impl Stage {
    /// Runs on the loop task; errors other than `Canceled` escape the batch.
    pub fn inline(task: TaskRef) -> Self {
        Self {
            task,
            kind: StageKind::Inline,
        }
    }

    /// Like [`Stage::inline`], retrying soft failures `retries` more times
    /// with `delay` between attempts.
    pub fn retried(task: TaskRef, retries: u32, delay: Duration) -> Self {
        Self {
            task,
            kind: StageKind::Retried { retries, delay },
        }
    }

    /// Runs through the workflow's gate and the bounded executor.
    pub fn gated(task: TaskRef) -> Self {
        Self {
            task,
            kind: StageKind::Gated,
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    async fn run(&self, ctx: &LoopContext) -> Result<(), TaskError> {
        match self.kind {
            StageKind::Inline => contain_cancel(ctx, self.name(), ctx.run_inline(self.task.as_ref()).await),
            StageKind::Retried { retries, delay } => self.run_retried(ctx, retries, delay).await,
            StageKind::Gated => match ctx.run_gated(self.task.as_ref()).await {
                Gated::Ran(out) if out.is_fatal() => Err(out.into_error()),
                Gated::Ran(out) if !out.succeeded() => {
                    warn!(workflow = %ctx.workflow, task = %out.task, reason = out.reason.as_label(), "stage did not complete; batch continues");
                    Ok(())
                }
                _ => Ok(()),
            },
        }
    }

    async fn run_retried(&self, ctx: &LoopContext, retries: u32, delay: Duration) -> Result<(), TaskError> {
        let mut attempt = 0;
        loop {
            let err = match ctx.run_inline(self.task.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(e @ (TaskError::Canceled | TaskError::Fatal { .. })) => {
                    return contain_cancel(ctx, self.name(), Err(e));
                }
                Err(e) => e,
            };
            if attempt >= retries {
                warn!(workflow = %ctx.workflow, task = self.name(), attempts = attempt + 1, "stage exhausted its retries");
                return Err(err);
            }
            attempt += 1;
            warn!(workflow = %ctx.workflow, task = self.name(), attempt, error = %err, ?delay, "stage failed; retrying");
            if ctx.sleep(delay).await == Wake::Stopped {
                return Ok(());
            }
        }
    }
}

fn contain_cancel(ctx: &LoopContext, task: &str, res: Result<(), TaskError>) -> Result<(), TaskError> {
    match res {
        Err(TaskError::Canceled) => {
            info!(workflow = %ctx.workflow, task, "stage exited on cancellation");
            Ok(())
        }
        other => other,
    }
}

/// Ordered stages, at most once per calendar day.
pub struct DailyBatch {
    stages: Vec<Stage>,
    data: Arc<dyn DataLayer>,
    markers: [String; 2],
    clock: Arc<dyn Clock>,
}

impl DailyBatch {
    /// Batch guarded by the completion markers of the two `markers` datasets.
    pub fn new(data: Arc<dyn DataLayer>, markers: [&str; 2]) -> Self {
        Self {
            stages: Vec::new(),
            data,
            markers: markers.map(str::to_string),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Appends a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub(crate) async fn run(&self, ctx: &LoopContext) -> Result<(), TaskError> {
        let hour = ctx.config.run_after_hour.unwrap_or(DEFAULT_RUN_AFTER_HOUR);
        while !ctx.should_stop(None) {
            let now = self.clock.now();
            let today = now.date();
            let marker = match ScheduleMarker::read(self.data.as_ref(), &self.markers).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(workflow = %ctx.workflow, error = %e, "could not read completion markers; assuming absent");
                    None
                }
            };

            if now.hour() < hour {
                let wake = run_at(today, hour);
                let pause = (wake - now).to_std().unwrap_or_default();
                info!(workflow = %ctx.workflow, at = %wake.format("%H:%M"), "waiting for the daily run hour");
                ctx.publish(Event::new(EventKind::WakeScheduled).with_delay(pause));
                if ctx.sleep(pause).await == Wake::Stopped {
                    break;
                }
                continue;
            }

            if should_run(marker.as_ref(), today) {
                self.process(ctx).await?;
            } else {
                info!(workflow = %ctx.workflow, %today, "daily batch already ran today; skipping");
                ctx.publish(Event::new(EventKind::BatchAlreadyRun));
            }

            let now = self.clock.now();
            let pause = until_next_run(now, hour);
            info!(workflow = %ctx.workflow, next = %(now + pause_as_chrono(pause)).format("%Y-%m-%d %H:%M"), "next daily run scheduled");
            ctx.publish(Event::new(EventKind::WakeScheduled).with_delay(pause));
            if ctx.sleep(pause).await == Wake::Stopped {
                break;
            }
        }
        Ok(())
    }

    async fn process(&self, ctx: &LoopContext) -> Result<(), TaskError> {
        let started = Instant::now();
        info!(workflow = %ctx.workflow, stages = self.stages.len(), "daily batch started");
        ctx.publish(Event::new(EventKind::BatchStarted));

        for stage in &self.stages {
            if ctx.should_stop(None) {
                info!(workflow = %ctx.workflow, task = stage.name(), "stop requested; remaining stages dropped");
                return Ok(());
            }
            info!(workflow = %ctx.workflow, task = stage.name(), "running stage");
            stage.run(ctx).await?;
        }

        info!(workflow = %ctx.workflow, elapsed = ?started.elapsed(), "daily batch finished");
        ctx.publish(Event::new(EventKind::BatchCompleted).with_elapsed(started.elapsed()));
        Ok(())
    }
}

fn pause_as_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}
