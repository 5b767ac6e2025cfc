use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    config::{SupervisorConfig, WorkflowConfig},
    on_demand::OnDemandPipeline,
    supervisor::Supervisor,
    workflow::Workflow,
};
use crate::{
    error::SupervisorError,
    events::Bus,
    schedules::Schedule,
    subscribers::{Subscribe, SubscriberSet},
    tasks::TaskRef,
};

struct Registration {
    id: String,
    name: String,
    config: WorkflowConfig,
    schedule: Schedule,
}

/// Builder wiring every workflow to one shared cancellation signal.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    workflows: Vec<Registration>,
    pipelines: Vec<(String, TaskRef)>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            workflows: Vec::new(),
            pipelines: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (workflow lifecycle, task outcomes,
    /// cycles, escalation) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Registers a workflow under `id`.
    pub fn workflow(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        config: WorkflowConfig,
        schedule: impl Into<Schedule>,
    ) -> Self {
        self.workflows.push(Registration {
            id: id.into(),
            name: name.into(),
            config,
            schedule: schedule.into(),
        });
        self
    }

    /// Registers an on-demand pipeline under `id`.
    ///
    /// It never runs on its own; see [`Supervisor::run_pipeline`].
    pub fn pipeline(mut self, id: impl Into<String>, task: TaskRef) -> Self {
        self.pipelines.push((id.into(), task));
        self
    }

    /// Builds the Supervisor; every workflow starts idle.
    ///
    /// Must be called from within a tokio runtime (subscriber workers are spawned here).
    pub fn build(self) -> Result<Arc<Supervisor>, SupervisorError> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let shared = CancellationToken::new();

        let mut workflows = BTreeMap::new();
        for reg in self.workflows {
            if workflows.contains_key(&reg.id) {
                return Err(SupervisorError::DuplicateWorkflow { id: reg.id });
            }
            let wf = Workflow::new(
                reg.id.as_str(),
                reg.name,
                reg.config,
                reg.schedule,
                shared.clone(),
                bus.clone(),
                self.cfg.join_grace,
            );
            workflows.insert(reg.id, Arc::new(wf));
        }

        let mut pipelines = BTreeMap::new();
        for (id, task) in self.pipelines {
            if pipelines.contains_key(&id) {
                return Err(SupervisorError::DuplicatePipeline { id });
            }
            let p = OnDemandPipeline::new(id.as_str(), task, bus.clone(), self.cfg.task_timeout);
            pipelines.insert(id, Arc::new(p));
        }

        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        info!(
            workflows = workflows.len(),
            pipelines = pipelines.len(),
            subscribers = subs.len(),
            "supervisor built"
        );

        let sup = Arc::new(Supervisor::new_internal(self.cfg, bus, subs, shared, workflows, pipelines));
        sup.subscriber_listener();
        Ok(sup)
    }
}
