//! # Unit of work consumed by the workflows.
//!
//! Every external collaborator call (line extraction, mailbox download, ERP
//! request, reconciliation) reaches the core as a [`Task`]. The core never
//! inspects what a task does; it only sees `Ok(())` or a [`TaskError`].
//!
//! A task receives a [`CancellationToken`] that is cancelled when the bounded
//! executor abandons it (timeout or stop request). Long external calls should
//! check it at their own safe points; the executor cannot kill them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future returned by [`Task::spawn`].
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a task object.
pub type TaskRef = Arc<dyn Task>;

/// # Asynchronous, cancelable unit of work.
///
/// `spawn` creates a fresh, owned future per invocation; the executor moves it
/// onto a separate tokio task, so it must not borrow from `self`.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use linevisor::{BoxTaskFuture, Task, TaskError};
///
/// struct Painting;
///
/// impl Task for Painting {
///     fn name(&self) -> &str { "painting_line" }
///
///     fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture {
///         Box::pin(async move {
///             if ctx.is_cancelled() {
///                 return Err(TaskError::Canceled);
///             }
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name.
    fn name(&self) -> &str;

    /// Creates the future for one invocation.
    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture;
}
