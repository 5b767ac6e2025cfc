//! # Integration polling loop.
//!
//! Runs each configured step through gate and executor, then sleeps the full
//! `poll_interval`. Unlike the [`Pipeline`](super::Pipeline) a failed step
//! does not abort the round: steps are independent calls into the same
//! external system. With no steps the loop idles until stopped.

use tracing::{debug, warn};

use crate::{
    core::{cancel::Wake, gate::Gated, workflow::LoopContext},
    error::TaskError,
    events::{Event, EventKind},
    tasks::TaskRef,
};

/// Independent steps polled every `poll_interval`.
pub struct IntegrationPoll {
    steps: Vec<TaskRef>,
}

impl IntegrationPoll {
    /// Poll loop over `steps`, run in order each round.
    pub fn new(steps: Vec<TaskRef>) -> Self {
        Self { steps }
    }

    pub(crate) async fn run(&self, ctx: &LoopContext) -> Result<(), TaskError> {
        let interval = ctx.config.poll_interval;
        if self.steps.is_empty() {
            debug!(workflow = %ctx.workflow, "no integration steps configured; idling");
        }

        while !ctx.should_stop(None) {
            if !self.steps.is_empty() {
                ctx.publish(Event::new(EventKind::CycleStarted));
            }
            for task in &self.steps {
                if ctx.should_stop(None) {
                    break;
                }
                match ctx.run_gated(task.as_ref()).await {
                    Gated::Ran(out) if out.is_fatal() => return Err(out.into_error()),
                    Gated::Ran(out) if !out.succeeded() => {
                        warn!(workflow = %ctx.workflow, task = %out.task, reason = out.reason.as_label(), "integration step did not complete");
                    }
                    _ => {}
                }
            }
            if ctx.sleep(interval).await == Wake::Stopped {
                break;
            }
        }
        Ok(())
    }
}
