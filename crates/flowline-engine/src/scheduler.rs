//! Run scheduling: starting, cancelling, and resuming runs
//!
//! The scheduler owns the run lifecycle around the interpreter: it
//! validates definitions before a run starts, creates the run record,
//! drives interpretation, and wakes paused runs whose delay has elapsed.
//! Resumption is poll-based; any number of pollers may run concurrently
//! because the store hands each due wake-up to exactly one claimer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::error::EngineError;
use crate::interpreter::StepInterpreter;
use crate::persistence::WorkflowStore;
use flowline_core::{
    validate_steps, RunContext, RunStatus, ScheduledStepStatus, Workflow, WorkflowRun,
};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// How often the resumption poller checks for due wake-ups
    pub poll_interval: Duration,

    /// Maximum wake-ups claimed per poll
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resumption poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the claim batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Starts, cancels, and resumes workflow runs
pub struct RunScheduler<S> {
    store: Arc<S>,
    interpreter: StepInterpreter<S>,
    config: SchedulerConfig,
}

impl<S: WorkflowStore> RunScheduler<S> {
    pub fn new(store: Arc<S>, registry: Arc<ActionRegistry>, config: SchedulerConfig) -> Self {
        let interpreter = StepInterpreter::new(Arc::clone(&store), registry);
        Self {
            store,
            interpreter,
            config,
        }
    }

    /// Start a run of `workflow` with the given initial context and drive
    /// it until it completes, fails, or pauses
    ///
    /// Refuses inactive workflows and invalid step lists before any state
    /// is written.
    #[instrument(skip(self, workflow, context), fields(workflow_id = %workflow.id))]
    pub async fn start_run(
        &self,
        workflow: &Workflow,
        context: RunContext,
    ) -> Result<WorkflowRun, EngineError> {
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow.id));
        }

        let steps = self.store.list_steps(workflow.id).await?;
        validate_steps(&steps)?;

        let run = WorkflowRun::start(workflow, steps, context);
        let run_id = run.id;
        self.store.create_run(&run).await?;
        info!(%run_id, workflow = %workflow.name, "run started");

        self.interpreter.run_to_completion(run_id).await
    }

    /// Cancel a run
    ///
    /// Idempotent: cancelling a terminal run changes nothing and succeeds.
    /// Pending wake-ups of the run are cancelled so it never resumes.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        let run = self.store.get_run(run_id).await?;
        if run.status.is_terminal() {
            debug!(status = %run.status, "cancel of terminal run is a no-op");
            return Ok(run);
        }

        self.store
            .update_run_status(run_id, RunStatus::Cancelled, None)
            .await?;
        self.store.cancel_scheduled_steps_for_run(run_id).await?;
        info!("run cancelled");

        self.store.get_run(run_id).await.map_err(Into::into)
    }

    /// Claim due wake-ups and resume their runs; returns how many resumed
    ///
    /// A claimed wake-up whose run is no longer paused (cancelled in the
    /// meantime, or already resumed elsewhere) is flipped to `cancelled`
    /// rather than executed.
    #[instrument(skip(self))]
    pub async fn resume_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let claimed = self
            .store
            .claim_due_scheduled_steps(now, self.config.batch_size)
            .await?;

        let mut resumed = 0;
        for scheduled in claimed {
            let run = self.store.get_run(scheduled.run_id).await?;
            if run.status != RunStatus::Paused {
                warn!(
                    run_id = %scheduled.run_id,
                    status = %run.status,
                    "claimed wake-up for non-paused run, dropping"
                );
                self.store
                    .set_scheduled_step_status(scheduled.id, ScheduledStepStatus::Cancelled)
                    .await?;
                continue;
            }

            self.store
                .update_run_progress(scheduled.run_id, scheduled.resume_step, &scheduled.context)
                .await?;
            self.store
                .update_run_status(scheduled.run_id, RunStatus::Running, None)
                .await?;
            info!(run_id = %scheduled.run_id, resume_step = scheduled.resume_step, "resuming run");

            self.interpreter.run_to_completion(scheduled.run_id).await?;
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Spawn the background resumption poller
    ///
    /// Polls at the configured interval until `true` is sent on the
    /// shutdown channel. Poll errors are logged, never fatal.
    pub fn spawn_poller(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval = ?scheduler.config.poll_interval, "resumption poller started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(scheduler.config.poll_interval) => {
                        match scheduler.resume_due(Utc::now()).await {
                            Ok(0) => {}
                            Ok(resumed) => debug!(resumed, "resumed paused runs"),
                            Err(e) => error!(error = %e, "resumption poll failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("resumption poller shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionError, ActionExecutor};
    use crate::persistence::InMemoryWorkflowStore;
    use async_trait::async_trait;
    use flowline_core::{
        ActionConfig, DelayStepConfig, DelayUnit, StepKind, TriggerConfig, TriggerInfo,
        TriggerType, WorkflowStep,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    struct RecordingActivity {
        log: Mutex<Vec<String>>,
    }

    impl RecordingActivity {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
            })
        }

        fn messages(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingActivity {
        fn action_type(&self) -> &'static str {
            "create_activity"
        }

        async fn execute(
            &self,
            config: &ActionConfig,
            _ctx: &RunContext,
        ) -> Result<Value, ActionError> {
            let ActionConfig::CreateActivity { message, .. } = config else {
                return Err(ActionError::non_retryable("wrong variant"));
            };
            self.log.lock().push(message.clone());
            Ok(json!({"recorded": message}))
        }
    }

    fn activity_step(workflow_id: Uuid, order: i32, message: &str) -> WorkflowStep {
        WorkflowStep::new(
            workflow_id,
            order,
            StepKind::Action(ActionConfig::CreateActivity {
                message: message.to_string(),
                entity_id: None,
            }),
        )
    }

    fn delay_step(workflow_id: Uuid, order: i32, seconds: i64) -> WorkflowStep {
        WorkflowStep::new(
            workflow_id,
            order,
            StepKind::Delay(DelayStepConfig {
                delay_value: seconds,
                delay_type: DelayUnit::Seconds,
            }),
        )
    }

    fn ctx(org: Uuid) -> RunContext {
        RunContext::new(TriggerInfo::new(TriggerType::Manual), org)
    }

    async fn setup(
        steps: Vec<WorkflowStep>,
        workflow: &Workflow,
        executor: Arc<RecordingActivity>,
    ) -> (Arc<InMemoryWorkflowStore>, RunScheduler<InMemoryWorkflowStore>) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        store.create_workflow(workflow, &steps).await.unwrap();

        let mut registry = ActionRegistry::new();
        registry.register(executor);
        let scheduler = RunScheduler::new(
            Arc::clone(&store),
            Arc::new(registry),
            SchedulerConfig::default(),
        );
        (store, scheduler)
    }

    #[tokio::test]
    async fn test_start_run_refuses_inactive() {
        let mut workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        workflow.is_active = false;
        let steps = vec![activity_step(workflow.id, 1, "x")];
        let (_, scheduler) = setup(steps, &workflow, RecordingActivity::new()).await;

        let err = scheduler
            .start_run(&workflow, ctx(workflow.organization_id))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowInactive(_)));
    }

    #[tokio::test]
    async fn test_start_run_rejects_invalid_steps() {
        let workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        // Orders 1 and 3: not dense
        let steps = vec![
            activity_step(workflow.id, 1, "a"),
            activity_step(workflow.id, 3, "b"),
        ];
        let (_, scheduler) = setup(steps, &workflow, RecordingActivity::new()).await;

        let err = scheduler
            .start_run(&workflow, ctx(workflow.organization_id))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidWorkflow(_)));
    }

    #[tokio::test]
    async fn test_delay_roundtrip_pause_then_resume() {
        let workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        let steps = vec![
            activity_step(workflow.id, 1, "before"),
            delay_step(workflow.id, 2, 60),
            activity_step(workflow.id, 3, "after"),
        ];
        let executor = RecordingActivity::new();
        let (store, scheduler) = setup(steps, &workflow, executor.clone()).await;

        let run = scheduler
            .start_run(&workflow, ctx(workflow.organization_id))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert_eq!(executor.messages(), vec!["before"]);

        // Nothing due yet
        assert_eq!(scheduler.resume_due(Utc::now()).await.unwrap(), 0);

        // Jump past the delay
        let later = Utc::now() + chrono::Duration::minutes(2);
        assert_eq!(scheduler.resume_due(later).await.unwrap(), 1);

        let run = store.get_run(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(executor.messages(), vec!["before", "after"]);

        // Claim is at-most-once; a second poll finds nothing
        assert_eq!(scheduler.resume_due(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        let steps = vec![activity_step(workflow.id, 1, "only")];
        let (_, scheduler) = setup(steps, &workflow, RecordingActivity::new()).await;

        let run = scheduler
            .start_run(&workflow, ctx(workflow.organization_id))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        // Cancelling a completed run is a no-op, not an error
        let cancelled = scheduler.cancel_run(run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Completed);

        let again = scheduler.cancel_run(run.id).await.unwrap();
        assert_eq!(again.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_paused_run_drops_wakeup() {
        let workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        let steps = vec![
            delay_step(workflow.id, 1, 60),
            activity_step(workflow.id, 2, "never"),
        ];
        let executor = RecordingActivity::new();
        let (store, scheduler) = setup(steps, &workflow, executor.clone()).await;

        let run = scheduler
            .start_run(&workflow, ctx(workflow.organization_id))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert_eq!(store.pending_scheduled_count(), 1);

        let cancelled = scheduler.cancel_run(run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert_eq!(store.pending_scheduled_count(), 0);

        // The elapsed delay never resumes the cancelled run
        let later = Utc::now() + chrono::Duration::minutes(2);
        assert_eq!(scheduler.resume_due(later).await.unwrap(), 0);
        assert!(executor.messages().is_empty());
    }

    #[tokio::test]
    async fn test_poller_resumes_and_shuts_down() {
        let workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        let steps = vec![
            delay_step(workflow.id, 1, 0),
            activity_step(workflow.id, 2, "resumed"),
        ];
        let executor = RecordingActivity::new();
        let store = Arc::new(InMemoryWorkflowStore::new());
        store.create_workflow(&workflow, &steps).await.unwrap();

        let mut registry = ActionRegistry::new();
        registry.register(executor.clone());
        let scheduler = Arc::new(RunScheduler::new(
            Arc::clone(&store),
            Arc::new(registry),
            SchedulerConfig::default().with_poll_interval(Duration::from_millis(20)),
        ));

        let run = scheduler
            .start_run(&workflow, ctx(workflow.organization_id))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Paused);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = scheduler.spawn_poller(shutdown_rx);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let run = store.get_run(run.id).await.unwrap();
                if run.status == RunStatus::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(executor.messages(), vec!["resumed"]);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
