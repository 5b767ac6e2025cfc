//! # linevisor
//!
//! **Linevisor** supervises a small, fixed set of long-running data workflows
//! inside one process: continuous line-feed ingestion, a once-a-day batch
//! reconciliation and an ERP integration loop.
//!
//! Each workflow can be started and stopped on its own, never overlaps its own
//! work, and the whole group halts as soon as one of them reports an
//! inconsistency it cannot contain.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (forwarding facade)                                   │
//! │  - shared CancellationToken (fatal escalation, one per process)   │
//! │  - Bus (broadcast events) ─► SubscriberSet (per-sub queues)       │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │  Workflow  │     │  Workflow  │     │  Workflow  │   start / stop / status
//!  │  Pipeline  │     │ DailyBatch │     │    Poll    │   local token per start
//!  └─────┬──────┘     └─────┬──────┘     └─────┬──────┘
//!        ▼                  ▼                  ▼
//!   ExclusiveGate ──► runner::execute ──► Task::spawn(per-call token)
//!   (skip if busy)    (timeout, cancel,    (detached worker)
//!                      abandon)
//! ```
//!
//! ### Failure containment
//! ```text
//! step/stage outcome
//!   ├─ Completed ─────────────────────► continue
//!   ├─ TimedOut / Cancelled / Failed ─► cycle aborted (pipeline), logged (batch, poll)
//!   ├─ Skipped (gate busy) ───────────► cycle aborted / step dropped
//!   └─ Fatal / loop panic ────────────► shared token cancelled ─► every workflow stops
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------------|
//! | **Supervision**   | Wire workflows to one shared stop signal; start/stop/status. | [`Supervisor`], [`SupervisorBuilder`]             |
//! | **Lifecycle**     | One background loop per workflow, bounded stop.              | [`Workflow`], [`StartReply`], [`StopReply`]       |
//! | **Scheduling**    | Interval pipeline, daily batch, integration poll.            | [`Schedule`], [`Pipeline`], [`DailyBatch`]        |
//! | **On demand**     | One-shot gated runs of registered pipelines.                 | [`OnDemandPipeline`], [`Supervisor::run_pipeline`] |
//! | **Execution**     | Timeboxed, cancellable, skip-if-busy units of work.          | [`execute`], [`ExclusiveGate`], [`CancelScope`]   |
//! | **Tasks**         | Units of work as trait objects or closures.                  | [`Task`], [`TaskFn`], [`TaskRef`]                 |
//! | **Data layer**    | Row counts and completion markers, read-only.                | [`DataLayer`], [`ScheduleMarker`]                 |
//! | **Subscriber API**| Observe runtime events.                                      | [`Subscribe`], [`Event`]                          |
//! | **Errors**        | Typed errors with stable labels.                             | [`TaskError`], [`SupervisorError`]                |
//! | **Configuration** | Defaults, `.env` and environment variables.                  | [`SupervisorConfig`], [`WorkflowConfig`]          |
//!
//! Logging goes through `tracing`; the crate never installs a subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use chrono::NaiveDate;
//! use tokio_util::sync::CancellationToken;
//! use linevisor::{
//!     DailyBatch, DataError, DataLayer, Pipeline, Stage, Step, SupervisorBuilder,
//!     SupervisorConfig, TaskError, TaskFn, TaskRef, WorkflowConfig,
//! };
//!
//! struct Warehouse;
//!
//! #[async_trait]
//! impl DataLayer for Warehouse {
//!     async fn row_count(&self, _dataset: &str) -> Result<u64, DataError> {
//!         Ok(42)
//!     }
//!     async fn last_completed(&self, _dataset: &str) -> Result<Option<NaiveDate>, DataError> {
//!         Ok(None)
//!     }
//! }
//!
//! fn noop(name: &'static str) -> TaskRef {
//!     TaskFn::arc(name, |_ctx: CancellationToken| async move { Ok::<(), TaskError>(()) })
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data: Arc<dyn DataLayer> = Arc::new(Warehouse);
//!
//!     let lines = Pipeline::new(Arc::clone(&data))
//!         .step(Step::new(noop("assembly_line")))
//!         .step(Step::new(noop("lb_balance")).when_rows(["common_vehicles", "assembly_line"]));
//!     let knr = DailyBatch::new(data, ["knrs_vivos", "knrs_fx4pd"])
//!         .stage(Stage::inline(noop("knr_email")))
//!         .stage(Stage::gated(noop("knr_verify")));
//!
//!     let sup = SupervisorBuilder::new(SupervisorConfig::default())
//!         .workflow("lines", "Line feed", WorkflowConfig::interval(Duration::from_secs(60), Duration::from_secs(30)), lines)
//!         .workflow("knr", "KNR batch", WorkflowConfig::daily(6, Duration::from_secs(600)), knr)
//!         .build()?;
//!
//!     sup.start("lines").await?;
//!     sup.start("knr").await?;
//!     assert!(sup.status().workflows["lines"].running);
//!
//!     sup.stop_all().await;
//!     Ok(())
//! }
//! ```

mod core;
mod data;
mod error;
mod events;
pub mod schedules;
mod subscribers;
mod tasks;

#[cfg(test)]
mod testing;

// ---- Public re-exports ----

pub use core::cancel::{CancelScope, SLEEP_TICK, Wake};
pub use core::config::{SupervisorConfig, WorkflowConfig};
pub use core::gate::{ExclusiveGate, Gated};
pub use core::on_demand::OnDemandPipeline;
pub use core::runner::{OutcomeReason, TaskOutcome, execute};
pub use core::workflow::{
    LoopContext, LoopExit, StartReply, StartStatus, StopReply, Workflow, WorkflowPhase, WorkflowStatus,
};
pub use core::{ShutdownCause, Supervisor, SupervisorBuilder, SupervisorStatus};
pub use data::{DataError, DataLayer, ScheduleMarker};
pub use error::{ConfigError, SupervisorError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use schedules::{Clock, DailyBatch, IntegrationPoll, Pipeline, Schedule, Stage, Step, SystemClock};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{BoxTaskFuture, Task, TaskFn, TaskRef};
