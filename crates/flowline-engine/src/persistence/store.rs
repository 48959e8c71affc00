//! WorkflowStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use flowline_core::{
    RunContext, RunStatus, RunStepStatus, ScheduledStep, ScheduledStepStatus, TriggerType,
    Workflow, WorkflowRun, WorkflowRunStep, WorkflowStep, WorkflowTemplate,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Template not found
    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),

    /// Concurrent update conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persistence contract for workflow definitions, runs, the audit trail,
/// and scheduled resumptions
///
/// Implementations must be thread-safe. The only operation requiring a
/// claim discipline across concurrent workers is
/// [`claim_due_scheduled_steps`](WorkflowStore::claim_due_scheduled_steps),
/// which must hand each due wake-up to at most one caller.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Workflow Definitions
    // =========================================================================

    /// Persist a workflow and its ordered step list
    async fn create_workflow(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError>;

    /// Fetch one workflow
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError>;

    /// Active workflows of one trigger type across all organizations
    /// (schedule ticks are not organization-scoped)
    async fn list_active_workflows(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Active workflows of one trigger type within an organization
    async fn list_active_workflows_for_org(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Activate or deactivate a workflow; deactivation stops new runs only
    async fn set_workflow_active(&self, workflow_id: Uuid, active: bool)
        -> Result<(), StoreError>;

    /// The workflow's step list in `step_order`
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, StoreError>;

    // =========================================================================
    // Templates
    // =========================================================================

    /// Persist a template
    async fn create_template(&self, template: &WorkflowTemplate) -> Result<(), StoreError>;

    /// Fetch one template
    async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate, StoreError>;

    /// Global templates plus the organization's own
    async fn list_templates(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<WorkflowTemplate>, StoreError>;

    // =========================================================================
    // Runs
    // =========================================================================

    /// Persist a new run
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Fetch one run
    async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError>;

    /// Runs of one workflow, newest first
    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<WorkflowRun>, StoreError>;

    /// Advance a run's cursor and context snapshot
    async fn update_run_progress(
        &self,
        run_id: Uuid,
        current_step: i32,
        context: &RunContext,
    ) -> Result<(), StoreError>;

    /// Transition a run's status; terminal statuses set `completed_at`
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    // =========================================================================
    // Run Step Audit Trail
    // =========================================================================

    /// Append a `running` audit record for a step entering execution
    async fn append_run_step(&self, run_step: &WorkflowRunStep) -> Result<(), StoreError>;

    /// Finalize an audit record; it is never mutated afterwards
    async fn finish_run_step(
        &self,
        run_step_id: Uuid,
        status: RunStepStatus,
        output: Option<serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// The audit trail of one run in execution order
    async fn list_run_steps(&self, run_id: Uuid) -> Result<Vec<WorkflowRunStep>, StoreError>;

    // =========================================================================
    // Scheduled Resumptions
    // =========================================================================

    /// Persist a pending wake-up record
    async fn create_scheduled_step(&self, scheduled: &ScheduledStep) -> Result<(), StoreError>;

    /// Claim pending wake-ups due at `now`, marking them `executed`
    ///
    /// At-most-once: a claimed record is never returned to another caller.
    async fn claim_due_scheduled_steps(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledStep>, StoreError>;

    /// Overwrite a scheduled step's status (used to flip a claimed wake-up
    /// to `cancelled` when its run turned out non-resumable)
    async fn set_scheduled_step_status(
        &self,
        scheduled_id: Uuid,
        status: ScheduledStepStatus,
    ) -> Result<(), StoreError>;

    /// Cancel all pending wake-ups for a run
    async fn cancel_scheduled_steps_for_run(&self, run_id: Uuid) -> Result<(), StoreError>;
}
