//! Test doubles shared by the in-module tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{cancel::CancelScope, config::WorkflowConfig, gate::ExclusiveGate, workflow::LoopContext},
    data::{DataError, DataLayer},
    error::TaskError,
    events::{Bus, Event, EventKind},
    schedules::Clock,
    tasks::{TaskFn, TaskRef},
};

/// Installs a fmt subscriber writing through the test harness; idempotent.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Default)]
struct Tables {
    counts: HashMap<String, u64>,
    completed: HashMap<String, NaiveDate>,
    broken: HashSet<String>,
}

/// In-memory [`DataLayer`].
#[derive(Default)]
pub(crate) struct MemoryData {
    tables: Mutex<Tables>,
}

impl MemoryData {
    pub(crate) fn set_count(&self, dataset: &str, rows: u64) {
        self.with(|t| {
            t.counts.insert(dataset.to_string(), rows);
        });
    }

    pub(crate) fn set_completed(&self, dataset: &str, day: NaiveDate) {
        self.with(|t| {
            t.completed.insert(dataset.to_string(), day);
        });
    }

    /// Every query on `dataset` fails from now on.
    pub(crate) fn fail_queries(&self, dataset: &str) {
        self.with(|t| {
            t.broken.insert(dataset.to_string());
        });
    }

    fn with<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut guard = self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn check(t: &Tables, dataset: &str) -> Result<(), DataError> {
        if t.broken.contains(dataset) {
            return Err(DataError::Query {
                dataset: dataset.to_string(),
                error: "connection reset".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataLayer for MemoryData {
    async fn row_count(&self, dataset: &str) -> Result<u64, DataError> {
        self.with(|t| {
            Self::check(t, dataset)?;
            Ok(t.counts.get(dataset).copied().unwrap_or(0))
        })
    }

    async fn last_completed(&self, dataset: &str) -> Result<Option<NaiveDate>, DataError> {
        self.with(|t| {
            Self::check(t, dataset)?;
            Ok(t.completed.get(dataset).copied())
        })
    }
}

/// [`Clock`] that advances with tokio's (pausable) clock.
pub(crate) struct PausedClock {
    base: NaiveDateTime,
    origin: Instant,
}

impl PausedClock {
    pub(crate) fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base,
            origin: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or(chrono::Duration::zero());
        self.base + elapsed
    }
}

/// Task that succeeds immediately and counts its runs.
pub(crate) fn counting_task(name: &'static str) -> (TaskRef, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let task: TaskRef = TaskFn::arc(name, move |_ctx: CancellationToken| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), TaskError>(())
        }
    });
    (task, runs)
}

/// Loop context with a fresh shared signal and a roomy bus.
pub(crate) fn loop_context(workflow: &str, config: WorkflowConfig) -> LoopContext {
    init_tracing();
    let workflow: Arc<str> = Arc::from(workflow);
    let bus = Bus::new(1024);
    LoopContext {
        gate: ExclusiveGate::new(Arc::clone(&workflow), bus.clone()),
        scope: CancelScope::new(&CancellationToken::new()),
        workflow,
        config,
        bus,
    }
}

/// Kinds of every event already queued on `rx`.
pub(crate) fn drain_kinds(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    kinds
}
