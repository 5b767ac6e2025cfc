//! # Scheduling policies.
//!
//! The closed set of loop bodies a [`Workflow`](crate::Workflow) can drive:
//!
//! - [`Pipeline`] - ordered steps every `poll_interval`, aborting a cycle on the
//!   first step that does not complete.
//! - [`DailyBatch`] - ordered stages once per calendar day after a configured hour,
//!   guarded by idempotency markers.
//! - [`IntegrationPoll`] - independent steps every `poll_interval`; failures stay
//!   with the step.
//!
//! Every variant runs until the [`LoopContext`] reports a stop, and returns
//! `Err` only for failures that must halt every workflow.

mod daily;
mod pipeline;
mod poll;

pub use daily::{
    Clock, DEFAULT_RUN_AFTER_HOUR, DailyBatch, MIN_DAILY_SLEEP, Stage, SystemClock, run_at, should_run, until_next_run,
};
pub use pipeline::{Pipeline, Step, next_sleep};
pub use poll::IntegrationPoll;

use crate::{core::workflow::LoopContext, error::TaskError};

/// Loop body of one workflow.
pub enum Schedule {
    /// Continuous-interval pipeline.
    Pipeline(Pipeline),
    /// Calendar-day batch.
    DailyBatch(DailyBatch),
    /// Integration polling loop.
    IntegrationPoll(IntegrationPoll),
}

impl Schedule {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Pipeline(_) => "pipeline",
            Schedule::DailyBatch(_) => "daily_batch",
            Schedule::IntegrationPoll(_) => "integration_poll",
        }
    }

    /// Runs the loop until a stop is observed.
    ///
    /// An `Err` is an uncontained failure; the caller escalates it.
    pub async fn run(&self, ctx: &LoopContext) -> Result<(), TaskError> {
        match self {
            Schedule::Pipeline(p) => p.run(ctx).await,
            Schedule::DailyBatch(d) => d.run(ctx).await,
            Schedule::IntegrationPoll(p) => p.run(ctx).await,
        }
    }
}

impl From<Pipeline> for Schedule {
    fn from(p: Pipeline) -> Self {
        Schedule::Pipeline(p)
    }
}

impl From<DailyBatch> for Schedule {
    fn from(d: DailyBatch) -> Self {
        Schedule::DailyBatch(d)
    }
}

impl From<IntegrationPoll> for Schedule {
    fn from(p: IntegrationPoll) -> Self {
        Schedule::IntegrationPoll(p)
    }
}
