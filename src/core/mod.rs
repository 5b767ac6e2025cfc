//! Runtime core: cancellation, bounded execution, exclusion and lifecycle.
//!
//! - [`cancel`]: tri-level cancellation scope and the chunked sleep;
//! - [`runner`]: runs one unit of work under a timeout and the scope;
//! - [`gate`]: per-workflow skip-if-busy exclusion;
//! - [`workflow`]: start/stop/status around one background loop;
//! - [`on_demand`]: one-shot runs of registered pipelines;
//! - [`supervisor`] and [`builder`]: wiring and the forwarding facade;
//! - [`config`]: supervisor and workflow configuration;
//! - `shutdown`: OS signal handling.

pub mod builder;
pub mod cancel;
pub mod config;
pub mod gate;
pub mod on_demand;
pub mod runner;
mod shutdown;
pub mod supervisor;
pub mod workflow;

pub use builder::SupervisorBuilder;
pub use supervisor::{ShutdownCause, Supervisor, SupervisorStatus};
