//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Workflow` (lifecycle), the schedules (cycles/batches),
//!   `runner::execute` and `ExclusiveGate` (task execution), `Supervisor`
//!   (shutdown), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Supervisor`'s listener, which fans out to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
