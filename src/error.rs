//! Error types used by the linevisor runtime, its workflows and their tasks.
//!
//! - [`TaskError`] - errors raised by individual units of work.
//! - [`SupervisorError`] - errors raised by the supervisor facade.
//! - [`ConfigError`] - errors raised while reading configuration.
//!
//! All types provide `as_label` for logs/metrics, in the same snake_case style.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by task execution.
///
/// A task that returns [`TaskError::Fatal`] reports an inconsistency that the
/// workflow cannot contain: the owning workflow escalates it to the shared
/// cancellation signal and every workflow stops. All other variants are
/// contained to the current cycle (or batch day).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task execution exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error; escalates to every workflow.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Task execution failed; the current cycle is abandoned.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The data layer rejected a write because of a concurrent writer.
    #[error("write conflict on {dataset}")]
    Conflict {
        /// Dataset whose write conflicted.
        dataset: String,
    },

    /// Task observed cancellation and exited early.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        TaskError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use linevisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Conflict { .. } => "task_conflict",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Whether this error must halt every workflow sharing the signal.
    ///
    /// ```
    /// use linevisor::TaskError;
    ///
    /// assert!(TaskError::fatal("ledger mismatch").is_fatal());
    /// assert!(!TaskError::Conflict { dataset: "lines".into() }.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Fatal { .. })
    }
}

/// # Errors produced by the supervisor facade.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SupervisorError {
    /// No workflow is registered under the given id.
    #[error("unknown workflow: {id}")]
    UnknownWorkflow {
        /// The id that was requested.
        id: String,
    },

    /// Two workflows were registered under the same id.
    #[error("workflow already registered: {id}")]
    DuplicateWorkflow {
        /// The conflicting id.
        id: String,
    },

    /// No on-demand pipeline is registered under the given id.
    #[error("unknown pipeline: {id}")]
    UnknownPipeline {
        /// The id that was requested.
        id: String,
    },

    /// Two on-demand pipelines were registered under the same id.
    #[error("pipeline already registered: {id}")]
    DuplicatePipeline {
        /// The conflicting id.
        id: String,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::UnknownWorkflow { .. } => "supervisor_unknown_workflow",
            SupervisorError::DuplicateWorkflow { .. } => "supervisor_duplicate_workflow",
            SupervisorError::UnknownPipeline { .. } => "supervisor_unknown_pipeline",
            SupervisorError::DuplicatePipeline { .. } => "supervisor_duplicate_pipeline",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is present but cannot be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Raw value as read.
        value: String,
    },

    /// The daily run hour is outside `0..=23`.
    #[error("run-after hour {hour} out of range 0..=23 ({key})")]
    HourOutOfRange {
        /// Variable name.
        key: String,
        /// Parsed hour.
        hour: u32,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::HourOutOfRange { .. } => "config_hour_out_of_range",
        }
    }
}

/// Extracts the message of a caught panic payload.
pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
