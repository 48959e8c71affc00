//! In-memory implementation of WorkflowStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{StoreError, WorkflowStore};
use flowline_core::{
    RunContext, RunStatus, RunStepStatus, ScheduledStep, ScheduledStepStatus, TriggerType,
    Workflow, WorkflowRun, WorkflowRunStep, WorkflowStep, WorkflowTemplate,
};

/// In-memory implementation of [`WorkflowStore`]
///
/// Primarily for tests; provides the same semantics as the PostgreSQL
/// implementation, including at-most-once claiming of due wake-ups.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    steps: RwLock<HashMap<Uuid, Vec<WorkflowStep>>>,
    templates: RwLock<HashMap<Uuid, WorkflowTemplate>>,
    runs: RwLock<HashMap<Uuid, WorkflowRun>>,
    run_steps: RwLock<Vec<WorkflowRunStep>>,
    scheduled: RwLock<HashMap<Uuid, ScheduledStep>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored workflows
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Number of pending scheduled steps
    pub fn pending_scheduled_count(&self) -> usize {
        self.scheduled
            .read()
            .values()
            .filter(|s| s.status == ScheduledStepStatus::Pending)
            .count()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.steps.write().clear();
        self.templates.write().clear();
        self.runs.write().clear();
        self.run_steps.write().clear();
        self.scheduled.write().clear();
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError> {
        self.workflows.write().insert(workflow.id, workflow.clone());
        let mut sorted = steps.to_vec();
        sorted.sort_by_key(|s| s.step_order);
        self.steps.write().insert(workflow.id, sorted);
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn list_active_workflows(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .values()
            .filter(|w| w.is_active && w.trigger.trigger_type() == trigger_type)
            .cloned()
            .collect())
    }

    async fn list_active_workflows_for_org(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .workflows
            .read()
            .values()
            .filter(|w| {
                w.is_active
                    && w.organization_id == organization_id
                    && w.trigger.trigger_type() == trigger_type
            })
            .cloned()
            .collect())
    }

    async fn set_workflow_active(
        &self,
        workflow_id: Uuid,
        active: bool,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        workflow.is_active = active;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, StoreError> {
        self.steps
            .read()
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn create_template(&self, template: &WorkflowTemplate) -> Result<(), StoreError> {
        self.templates.write().insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate, StoreError> {
        self.templates
            .read()
            .get(&template_id)
            .cloned()
            .ok_or(StoreError::TemplateNotFound(template_id))
    }

    async fn list_templates(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<WorkflowTemplate>, StoreError> {
        Ok(self
            .templates
            .read()
            .values()
            .filter(|t| t.organization_id.is_none() || t.organization_id == Some(organization_id))
            .cloned()
            .collect())
    }

    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        self.runs.write().insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError> {
        self.runs
            .read()
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .values()
            .filter(|r| r.workflow_id == Some(workflow_id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn update_run_progress(
        &self,
        run_id: Uuid,
        current_step: i32,
        context: &RunContext,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.current_step = current_step;
        run.context = context.clone();
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        run.status = status;
        run.error_message = error_message.map(str::to_string);
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_run_step(&self, run_step: &WorkflowRunStep) -> Result<(), StoreError> {
        self.run_steps.write().push(run_step.clone());
        Ok(())
    }

    async fn finish_run_step(
        &self,
        run_step_id: Uuid,
        status: RunStepStatus,
        output: Option<serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut run_steps = self.run_steps.write();
        let run_step = run_steps
            .iter_mut()
            .find(|rs| rs.id == run_step_id)
            .ok_or_else(|| StoreError::Conflict(format!("run step {run_step_id} not found")))?;
        if run_step.completed_at.is_some() {
            return Err(StoreError::Conflict(format!(
                "run step {run_step_id} already finalized"
            )));
        }
        run_step.status = status;
        run_step.output = output;
        run_step.error_message = error_message.map(str::to_string);
        run_step.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_run_steps(&self, run_id: Uuid) -> Result<Vec<WorkflowRunStep>, StoreError> {
        Ok(self
            .run_steps
            .read()
            .iter()
            .filter(|rs| rs.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn create_scheduled_step(&self, scheduled: &ScheduledStep) -> Result<(), StoreError> {
        self.scheduled.write().insert(scheduled.id, scheduled.clone());
        Ok(())
    }

    async fn claim_due_scheduled_steps(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledStep>, StoreError> {
        let mut scheduled = self.scheduled.write();
        let mut due: Vec<&mut ScheduledStep> = scheduled
            .values_mut()
            .filter(|s| s.status == ScheduledStepStatus::Pending && s.execute_at <= now)
            .collect();
        due.sort_by_key(|s| s.execute_at);

        let mut claimed = Vec::new();
        for entry in due.into_iter().take(limit) {
            entry.status = ScheduledStepStatus::Executed;
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn set_scheduled_step_status(
        &self,
        scheduled_id: Uuid,
        status: ScheduledStepStatus,
    ) -> Result<(), StoreError> {
        let mut scheduled = self.scheduled.write();
        let entry = scheduled
            .get_mut(&scheduled_id)
            .ok_or_else(|| StoreError::Conflict(format!("scheduled step {scheduled_id} not found")))?;
        entry.status = status;
        Ok(())
    }

    async fn cancel_scheduled_steps_for_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut scheduled = self.scheduled.write();
        for entry in scheduled.values_mut() {
            if entry.run_id == run_id && entry.status == ScheduledStepStatus::Pending {
                entry.status = ScheduledStepStatus::Cancelled;
            }
        }
        Ok(())
    }
}
