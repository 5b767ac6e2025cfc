//! # Supervisor: owns the shared stop signal and forwards start/stop/status.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`], the single
//! shared cancellation signal, and every [`Workflow`]. It adds no concurrency
//! control of its own: each verb is forwarded to the workflow it names.
//!
//! ## High-level architecture
//! ```text
//! SupervisorBuilder::build()
//!   ├─► Bus + SubscriberSet
//!   ├─► shared = CancellationToken::new()
//!   ├─► Workflow::new(id, ..., shared.clone())      (one per registered workflow)
//!   └─► listener: Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!
//! start(id) / stop(id) ─► workflows[id].start() / .stop()
//! status()             ─► { id: workflows[id].status() } + timestamp
//! run_pipeline(id)     ─► pipelines[id].run()  (one-shot, gated, timeboxed)
//!
//! Shutdown path (run_until_shutdown):
//!   OS signal ─┐
//!              ├─► publish(ShutdownRequested) ─► cancel on-demand runs ─► stop_all()
//!   halted  ───┘   (some workflow escalated a fatal error)
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use linevisor::{IntegrationPoll, SupervisorBuilder, SupervisorConfig, TaskError, TaskFn, TaskRef, WorkflowConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let request: TaskRef = TaskFn::arc("sap_request", |_ctx: CancellationToken| async move {
//!         Ok::<(), TaskError>(())
//!     });
//!
//!     let sup = SupervisorBuilder::new(SupervisorConfig::default())
//!         .workflow(
//!             "sap",
//!             "SAP integration",
//!             WorkflowConfig::interval(Duration::from_secs(60), Duration::from_secs(30)),
//!             IntegrationPoll::new(vec![request]),
//!         )
//!         .build()?;
//!
//!     assert_eq!(sup.start("sap").await?.running, true);
//!     assert_eq!(sup.stop("sap").await?.running, false);
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    core::{
        config::SupervisorConfig,
        gate::Gated,
        on_demand::OnDemandPipeline,
        shutdown,
        workflow::{StartReply, StopReply, Workflow, WorkflowStatus},
    },
    error::SupervisorError,
    events::{Bus, Event, EventKind},
    subscribers::SubscriberSet,
};

/// Aggregate snapshot returned by [`Supervisor::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    /// Per-workflow status, keyed by id.
    pub workflows: BTreeMap<String, WorkflowStatus>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Local>,
}

/// Why [`Supervisor::run_until_shutdown`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The process received a termination signal.
    Signal,
    /// A workflow escalated a fatal error.
    Halted,
}

impl ShutdownCause {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownCause::Signal => "signal",
            ShutdownCause::Halted => "halted",
        }
    }
}

/// Forwarding facade over every workflow of the process.
pub struct Supervisor {
    /// Global runtime configuration.
    pub cfg: SupervisorConfig,
    /// Event bus shared with every workflow.
    pub bus: Bus,
    subs: Arc<SubscriberSet>,
    shared: CancellationToken,
    workflows: BTreeMap<String, Arc<Workflow>>,
    pipelines: BTreeMap<String, Arc<OnDemandPipeline>>,
    /// Child of `shared`; also cancelled on shutdown.
    on_demand: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        shared: CancellationToken,
        workflows: BTreeMap<String, Arc<Workflow>>,
        pipelines: BTreeMap<String, Arc<OnDemandPipeline>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            subs,
            on_demand: shared.child_token(),
            shared,
            workflows,
            pipelines,
        }
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn get(&self, id: &str) -> Result<&Arc<Workflow>, SupervisorError> {
        self.workflows
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownWorkflow { id: id.to_string() })
    }

    fn pipeline(&self, id: &str) -> Result<&Arc<OnDemandPipeline>, SupervisorError> {
        self.pipelines
            .get(id)
            .ok_or_else(|| SupervisorError::UnknownPipeline { id: id.to_string() })
    }

    /// Registered on-demand pipeline ids, in order.
    pub fn pipeline_ids(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    /// Runs on-demand pipeline `id` once and waits for its outcome.
    ///
    /// Returns [`Gated::Skipped`] when a run of the same pipeline is in flight.
    pub async fn run_pipeline(&self, id: &str) -> Result<Gated, SupervisorError> {
        Ok(self.pipeline(id)?.run(&self.on_demand).await)
    }

    /// Runs on-demand pipeline `id` once on a background task.
    ///
    /// The handle may be dropped; the run continues detached.
    pub fn run_pipeline_detached(&self, id: &str) -> Result<JoinHandle<Gated>, SupervisorError> {
        let pipeline = Arc::clone(self.pipeline(id)?);
        let stop = self.on_demand.clone();
        Ok(tokio::spawn(async move { pipeline.run(&stop).await }))
    }

    /// Registered workflow ids, in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }

    /// Starts workflow `id`; a no-op if it is already running.
    pub async fn start(&self, id: &str) -> Result<StartReply, SupervisorError> {
        Ok(self.get(id)?.start().await)
    }

    /// Stops workflow `id`; always ends with the workflow reported stopped.
    pub async fn stop(&self, id: &str) -> Result<StopReply, SupervisorError> {
        Ok(self.get(id)?.stop().await)
    }

    /// Stops every workflow concurrently.
    pub async fn stop_all(&self) -> BTreeMap<String, StopReply> {
        let stops = self
            .workflows
            .iter()
            .map(|(id, wf)| async move { (id.clone(), wf.stop().await) });
        join_all(stops).await.into_iter().collect()
    }

    /// Snapshot of every workflow; never waits on a loop.
    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            workflows: self
                .workflows
                .iter()
                .map(|(id, wf)| (id.clone(), wf.status()))
                .collect(),
            timestamp: Local::now(),
        }
    }

    /// Whether a workflow escalated a fatal error.
    pub fn is_halted(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Waits for a termination signal or a fatal escalation, then stops every
    /// workflow.
    pub async fn run_until_shutdown(&self) -> ShutdownCause {
        let cause = tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => match res {
                Ok(()) => ShutdownCause::Signal,
                Err(e) => {
                    warn!(error = %e, "could not install signal handlers; waiting for a halt only");
                    self.shared.cancelled().await;
                    ShutdownCause::Halted
                }
            },
            _ = self.shared.cancelled() => ShutdownCause::Halted,
        };

        info!(cause = cause.as_label(), "shutdown requested; stopping every workflow");
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(cause.as_label()));
        self.on_demand.cancel();
        self.stop_all().await;
        cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::SupervisorBuilder;
    use crate::core::config::WorkflowConfig;
    use crate::error::TaskError;
    use crate::schedules::IntegrationPoll;
    use crate::subscribers::Subscribe;
    use crate::tasks::{TaskFn, TaskRef};
    use crate::testing::{counting_task, init_tracing};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time;

    fn cfg() -> WorkflowConfig {
        WorkflowConfig::interval(Duration::from_secs(10), Duration::from_secs(2))
    }

    fn fatal_task() -> TaskRef {
        TaskFn::arc("knr_verify", |_ctx: CancellationToken| async move {
            Err::<(), TaskError>(TaskError::fatal("fx4pd and vivos disagree"))
        })
    }

    fn two_workflows() -> Arc<Supervisor> {
        init_tracing();
        let (lines, _) = counting_task("painting_line");
        let (sap, _) = counting_task("sap_request");
        SupervisorBuilder::new(SupervisorConfig::default())
            .workflow("lines", "Line feed", cfg(), IntegrationPoll::new(vec![lines]))
            .workflow("sap", "SAP integration", cfg(), IntegrationPoll::new(vec![sap]))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_is_an_error() {
        let sup = two_workflows();
        assert_eq!(
            sup.start("pkmc").await.err(),
            Some(SupervisorError::UnknownWorkflow { id: "pkmc".into() })
        );
        assert!(sup.stop("pkmc").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_serialize_for_http() {
        let sup = two_workflows();
        let started = serde_json::to_value(sup.start("lines").await.unwrap()).unwrap();
        assert_eq!(started, serde_json::json!({"status": "started", "running": true}));

        let again = serde_json::to_value(sup.start("lines").await.unwrap()).unwrap();
        assert_eq!(again, serde_json::json!({"status": "already running", "running": true}));

        let stopped = serde_json::to_value(sup.stop("lines").await.unwrap()).unwrap();
        assert_eq!(stopped, serde_json::json!({"status": "stopped", "running": false}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_merges_state_and_config() {
        let sup = two_workflows();
        sup.start("sap").await.unwrap();

        let status = serde_json::to_value(sup.status()).unwrap();
        let sap = &status["workflows"]["sap"];
        assert_eq!(sap["name"], "SAP integration");
        assert_eq!(sap["running"], true);
        assert_eq!(sap["state"], "running");
        assert_eq!(sap["config"]["poll_interval_secs"], 10);
        assert_eq!(sap["config"]["task_timeout_secs"], 2);
        assert_eq!(status["workflows"]["lines"]["running"], false);
        assert!(status["timestamp"].is_string());

        sup.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_are_rejected() {
        let res = SupervisorBuilder::new(SupervisorConfig::default())
            .workflow("sap", "a", cfg(), IntegrationPoll::new(Vec::new()))
            .workflow("sap", "b", cfg(), IntegrationPoll::new(Vec::new()))
            .build();
        assert_eq!(
            res.err(),
            Some(SupervisorError::DuplicateWorkflow { id: "sap".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_escalation_halts_everything() {
        init_tracing();
        let (lines, _) = counting_task("painting_line");
        let sup = SupervisorBuilder::new(SupervisorConfig::default())
            .workflow("lines", "Line feed", cfg(), IntegrationPoll::new(vec![lines]))
            .workflow("knr", "KNR", cfg(), IntegrationPoll::new(vec![fatal_task()]))
            .build()
            .unwrap();

        sup.start("lines").await.unwrap();
        sup.start("knr").await.unwrap();

        let cause = time::timeout(Duration::from_secs(5), sup.run_until_shutdown())
            .await
            .expect("halt observed");
        assert_eq!(cause, ShutdownCause::Halted);
        assert!(sup.is_halted());
        assert!(sup.status().workflows.values().all(|w| !w.running));
    }

    fn extraction(name: &'static str, d: Duration) -> TaskRef {
        TaskFn::arc(name, move |_ctx: CancellationToken| async move {
            time::sleep(d).await;
            Ok::<(), TaskError>(())
        })
    }

    fn with_pipelines() -> Arc<Supervisor> {
        init_tracing();
        let (lines, _) = counting_task("painting_line");
        SupervisorBuilder::new(SupervisorConfig::default())
            .workflow("lines", "Line feed", cfg(), IntegrationPoll::new(vec![lines]))
            .pipeline("pkmc", extraction("pkmc_extract", Duration::from_secs(5)))
            .pipeline("pk05", fatal_task())
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_pipeline_runs_once() {
        let sup = with_pipelines();
        assert_eq!(sup.pipeline_ids().collect::<Vec<_>>(), vec!["pk05", "pkmc"]);

        let out = sup.run_pipeline("pkmc").await.unwrap();
        assert!(out.succeeded());
        assert_eq!(out.outcome().map(|o| o.elapsed), Some(Duration::from_secs(5)));
        assert_eq!(
            sup.run_pipeline("pk99").await.err(),
            Some(SupervisorError::UnknownPipeline { id: "pk99".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_run_blocks_overlapping_request() {
        let sup = with_pipelines();
        let detached = sup.run_pipeline_detached("pkmc").unwrap();
        time::sleep(Duration::from_secs(1)).await;

        assert!(matches!(sup.run_pipeline("pkmc").await.unwrap(), Gated::Skipped));
        assert!(detached.await.unwrap().succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_pipeline_outcome_does_not_halt_workflows() {
        let sup = with_pipelines();
        sup.start("lines").await.unwrap();

        let out = sup.run_pipeline("pk05").await.unwrap();
        assert!(out.outcome().is_some_and(|o| o.is_fatal()));
        assert!(!sup.is_halted());
        assert!(sup.status().workflows["lines"].running);
        sup.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_pipeline_ids_are_rejected() {
        let res = SupervisorBuilder::new(SupervisorConfig::default())
            .pipeline("pkmc", fatal_task())
            .pipeline("pkmc", fatal_task())
            .build();
        assert_eq!(
            res.err(),
            Some(SupervisorError::DuplicatePipeline { id: "pkmc".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_abandons_detached_run() {
        init_tracing();
        let sup = SupervisorBuilder::new(SupervisorConfig::default())
            .workflow("knr", "KNR", cfg(), IntegrationPoll::new(vec![fatal_task()]))
            .pipeline("pkmc", extraction("pkmc_extract", Duration::from_secs(120)))
            .build()
            .unwrap();

        let detached = sup.run_pipeline_detached("pkmc").unwrap();
        time::sleep(Duration::from_secs(1)).await;
        sup.start("knr").await.unwrap();

        let out = time::timeout(Duration::from_secs(5), detached)
            .await
            .expect("run abandoned on halt")
            .unwrap();
        assert_eq!(out.outcome().map(|o| o.reason), Some(crate::core::runner::OutcomeReason::Cancelled));
    }

    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.seen.lock().await.push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_receive_workflow_events() {
        let rec = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let sup = SupervisorBuilder::new(SupervisorConfig::default())
            .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
            .workflow("sap", "SAP integration", cfg(), IntegrationPoll::new(Vec::new()))
            .build()
            .unwrap();

        sup.start("sap").await.unwrap();
        sup.stop("sap").await.unwrap();
        time::sleep(Duration::from_millis(100)).await;

        let seen = rec.seen.lock().await;
        assert!(seen.contains(&EventKind::WorkflowStarted));
        assert!(seen.contains(&EventKind::WorkflowStopped));
    }
}
