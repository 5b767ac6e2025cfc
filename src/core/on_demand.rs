//! # On-demand pipelines: one-shot runs of a registered task.
//!
//! An on-demand pipeline has no loop. Each request runs its task once through
//! the pipeline's own gate and the bounded executor, either waiting for the
//! outcome or on a background task.
//!
//! ```text
//! Supervisor::run_pipeline(id)          ──► gate.try_run(execute(task)) ──► Gated
//! Supervisor::run_pipeline_detached(id) ──► tokio::spawn(same)          ──► JoinHandle<Gated>
//! ```
//!
//! ## Rules
//! - A request while a run of the same pipeline is in flight is skipped.
//! - Runs stop when the supervisor shuts down or a workflow escalates.
//! - A fatal outcome is handed back to the requester; it does not halt the
//!   workflows.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    core::{cancel::CancelScope, gate::{ExclusiveGate, Gated}, runner},
    events::Bus,
    tasks::TaskRef,
};

/// A registered task that runs only when requested.
pub struct OnDemandPipeline {
    id: Arc<str>,
    task: TaskRef,
    gate: ExclusiveGate,
    bus: Bus,
    timeout: Duration,
}

impl OnDemandPipeline {
    /// Pipeline `id` running `task` under `timeout` (`0s` = none).
    pub fn new(id: impl Into<Arc<str>>, task: TaskRef, bus: Bus, timeout: Duration) -> Self {
        let id = id.into();
        Self {
            gate: ExclusiveGate::new(Arc::clone(&id), bus.clone()),
            id,
            task,
            bus,
            timeout,
        }
    }

    /// Pipeline id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the task once under a fresh scope derived from `stop`.
    pub async fn run(&self, stop: &CancellationToken) -> Gated {
        let scope = CancelScope::new(stop);
        info!(pipeline = %self.id, task = self.task.name(), "on-demand run requested");
        let work = runner::execute(self.task.as_ref(), &self.id, Some(self.timeout), &scope, &self.bus);
        self.gate.try_run(self.task.name(), work).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::OutcomeReason;
    use crate::error::TaskError;
    use crate::tasks::TaskFn;
    use tokio::time;

    fn extraction(d: Duration) -> TaskRef {
        TaskFn::arc("pkmc_extract", move |_ctx: CancellationToken| async move {
            time::sleep(d).await;
            Ok::<(), TaskError>(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_is_skipped_while_running() {
        let pkmc = Arc::new(OnDemandPipeline::new(
            "pkmc",
            extraction(Duration::from_secs(5)),
            Bus::new(16),
            Duration::from_secs(30),
        ));
        let stop = CancellationToken::new();

        let first = {
            let pkmc = Arc::clone(&pkmc);
            let stop = stop.clone();
            tokio::spawn(async move { pkmc.run(&stop).await })
        };
        time::sleep(Duration::from_secs(1)).await;

        assert!(matches!(pkmc.run(&stop).await, Gated::Skipped));
        assert!(first.await.unwrap().succeeded());
        assert!(pkmc.run(&stop).await.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_run() {
        let pk05 = OnDemandPipeline::new("pk05", extraction(Duration::from_secs(60)), Bus::new(16), Duration::ZERO);
        let stop = CancellationToken::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let out = pk05.run(&stop).await;
        assert_eq!(out.outcome().map(|o| o.reason), Some(OutcomeReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies() {
        let pkmc = OnDemandPipeline::new("pkmc", extraction(Duration::from_secs(60)), Bus::new(16), Duration::from_secs(3));
        let out = pkmc.run(&CancellationToken::new()).await;
        let out = out.outcome().cloned().unwrap();
        assert_eq!(out.reason, OutcomeReason::TimedOut);
        assert_eq!(out.elapsed, Duration::from_secs(3));
    }
}
