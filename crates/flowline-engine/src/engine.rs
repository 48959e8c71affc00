//! The workflow engine facade
//!
//! Wires the trigger matcher, the run scheduler, and the store into one
//! entry point. Callers hand it stimuli (events, ticks, manual
//! invocations, webhooks) and definition-management calls; everything
//! else happens behind it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::collaborators::Collaborators;
use crate::error::EngineError;
use crate::persistence::WorkflowStore;
use crate::scheduler::{RunScheduler, SchedulerConfig};
use crate::trigger::{EventStimulus, TriggerMatcher, WebhookStimulus};
use flowline_core::{
    validate_steps, Workflow, WorkflowRun, WorkflowStep, WorkflowTemplate,
};

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Run scheduler settings
    pub scheduler: SchedulerConfig,

    /// How often the background ticker offers the current time to
    /// schedule triggers; occurrences are minute-deduplicated, so any
    /// sub-minute interval is safe
    pub schedule_tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            schedule_tick_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_schedule_tick_interval(mut self, interval: Duration) -> Self {
        self.schedule_tick_interval = interval;
        self
    }
}

/// The workflow automation engine
pub struct WorkflowEngine<S> {
    store: Arc<S>,
    matcher: TriggerMatcher<S>,
    scheduler: Arc<RunScheduler<S>>,
    config: EngineConfig,
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    /// Create an engine with every built-in action wired to collaborators
    pub fn new(store: Arc<S>, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self::with_registry(
            store,
            Arc::new(ActionRegistry::with_builtins(collaborators)),
            config,
        )
    }

    /// Create an engine with a custom action registry
    pub fn with_registry(
        store: Arc<S>,
        registry: Arc<ActionRegistry>,
        config: EngineConfig,
    ) -> Self {
        let matcher = TriggerMatcher::new(Arc::clone(&store));
        let scheduler = Arc::new(RunScheduler::new(
            Arc::clone(&store),
            registry,
            config.scheduler.clone(),
        ));
        Self {
            store,
            matcher,
            scheduler,
            config,
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The run scheduler, for direct run control (cancel, resume polling)
    pub fn scheduler(&self) -> &Arc<RunScheduler<S>> {
        &self.scheduler
    }

    // =========================================================================
    // Definition management
    // =========================================================================

    /// Validate and persist a workflow with its steps
    #[instrument(skip(self, workflow, steps), fields(workflow_id = %workflow.id))]
    pub async fn create_workflow(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> Result<(), EngineError> {
        validate_steps(steps)?;
        self.store.create_workflow(workflow, steps).await?;
        info!(workflow = %workflow.name, "workflow created");
        Ok(())
    }

    /// Activate or deactivate a workflow
    ///
    /// Deactivation only stops new runs; in-flight runs complete on their
    /// step snapshot.
    pub async fn set_workflow_active(
        &self,
        workflow_id: Uuid,
        active: bool,
    ) -> Result<(), EngineError> {
        self.store
            .set_workflow_active(workflow_id, active)
            .await
            .map_err(Into::into)
    }

    /// Persist a template
    pub async fn create_template(&self, template: &WorkflowTemplate) -> Result<(), EngineError> {
        self.store.create_template(template).await.map_err(Into::into)
    }

    /// Instantiate a template as a new workflow for an organization
    #[instrument(skip(self))]
    pub async fn instantiate_template(
        &self,
        template_id: Uuid,
        organization_id: Uuid,
        created_by: Option<Uuid>,
    ) -> Result<Workflow, EngineError> {
        let template = self.store.get_template(template_id).await?;
        let (workflow, steps) = template.instantiate(organization_id, created_by);
        self.create_workflow(&workflow, &steps).await?;
        Ok(workflow)
    }

    // =========================================================================
    // Stimulus dispatch
    // =========================================================================

    /// Offer a domain event to event triggers; returns the runs started
    ///
    /// Each matching workflow runs independently: one workflow's invalid
    /// definition or failed run never blocks the others.
    #[instrument(skip(self, stimulus))]
    pub async fn dispatch_event(
        &self,
        stimulus: &EventStimulus,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        let matches = self.matcher.match_event(stimulus).await?;
        self.start_matches(matches).await
    }

    /// Offer a wall-clock tick to schedule triggers; returns the runs started
    #[instrument(skip(self))]
    pub async fn dispatch_schedule_tick(
        &self,
        tick: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        let matches = self.matcher.match_schedule(tick).await?;
        self.start_matches(matches).await
    }

    /// Start one workflow by explicit invocation
    #[instrument(skip(self, payload))]
    pub async fn dispatch_manual(
        &self,
        workflow_id: Uuid,
        payload: serde_json::Value,
        user_id: Option<Uuid>,
    ) -> Result<WorkflowRun, EngineError> {
        let matched = self.matcher.match_manual(workflow_id, payload, user_id).await?;
        self.scheduler
            .start_run(&matched.workflow, matched.context)
            .await
    }

    /// Offer an inbound webhook delivery; `None` means it was quietly
    /// rejected (bad signature, disallowed IP, inactive workflow)
    #[instrument(skip(self, stimulus), fields(workflow_id = %stimulus.workflow_id))]
    pub async fn dispatch_webhook(
        &self,
        stimulus: &WebhookStimulus,
    ) -> Result<Option<WorkflowRun>, EngineError> {
        let Some(matched) = self.matcher.match_webhook(stimulus).await? else {
            return Ok(None);
        };
        let run = self
            .scheduler
            .start_run(&matched.workflow, matched.context)
            .await?;
        Ok(Some(run))
    }

    async fn start_matches(
        &self,
        matches: Vec<crate::trigger::TriggerMatch>,
    ) -> Result<Vec<WorkflowRun>, EngineError> {
        let mut runs = Vec::with_capacity(matches.len());
        for matched in matches {
            match self
                .scheduler
                .start_run(&matched.workflow, matched.context)
                .await
            {
                Ok(run) => runs.push(run),
                Err(e) => {
                    warn!(workflow_id = %matched.workflow.id, error = %e, "failed to start matched run");
                }
            }
        }
        Ok(runs)
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Spawn the delay-resumption poller and the schedule ticker
    ///
    /// Both stop when `true` is sent on the shutdown channel.
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let resumption = self.scheduler.spawn_poller(shutdown_rx.clone());

        let engine = Arc::clone(self);
        let mut shutdown_rx = shutdown_rx;
        let ticker = tokio::spawn(async move {
            info!(interval = ?engine.config.schedule_tick_interval, "schedule ticker started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(engine.config.schedule_tick_interval) => {
                        if let Err(e) = engine.dispatch_schedule_tick(Utc::now()).await {
                            error!(error = %e, "schedule tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("schedule ticker shutting down");
                            return;
                        }
                    }
                }
            }
        });

        vec![resumption, ticker]
    }
}
