//! PostgreSQL implementation of WorkflowStore
//!
//! Structured columns for the fields queries filter on, JSONB for the
//! rest (trigger config, step kinds, contexts, payloads). Due wake-ups
//! are claimed with SKIP LOCKED so concurrent pollers never double-fire
//! a resumption.
//!
//! Expected tables:
//! - `flowline_workflows` (id, organization_id, name, description,
//!   is_active, trigger_type, trigger, created_by, created_at, updated_at)
//! - `flowline_workflow_steps` (id, workflow_id, step_order, kind, created_at)
//! - `flowline_templates` (id, organization_id, name, description,
//!   trigger, steps, created_at)
//! - `flowline_runs` (id, workflow_id, workflow_name, organization_id,
//!   trigger_type, trigger_payload, status, current_step, steps, context,
//!   error_message, started_at, completed_at)
//! - `flowline_run_steps` (id, run_id, step_id, step_order, step_type,
//!   action_type, status, input, output, error_message, started_at,
//!   completed_at)
//! - `flowline_scheduled_steps` (id, run_id, resume_step, execute_at,
//!   context, status, created_at)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{StoreError, WorkflowStore};
use flowline_core::{
    RunContext, RunStatus, RunStepStatus, ScheduledStep, ScheduledStepStatus, StepKind,
    TriggerConfig, TriggerType, Workflow, WorkflowRun, WorkflowRunStep, WorkflowStep,
    WorkflowTemplate,
};

/// PostgreSQL implementation of [`WorkflowStore`]
///
/// Uses a connection pool; safe to clone and share across pollers.
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Parse an enum stored as its snake_case text column
fn from_text<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|_| StoreError::Database(format!("unrecognized status value '{text}'")))
}

fn workflow_from_row(row: &sqlx::postgres::PgRow) -> Result<Workflow, StoreError> {
    let trigger: TriggerConfig = from_json(row.get("trigger"))?;
    Ok(Workflow {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        description: row.get("description"),
        is_active: row.get("is_active"),
        trigger,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn step_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowStep, StoreError> {
    let kind: StepKind = from_json(row.get("kind"))?;
    Ok(WorkflowStep {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        step_order: row.get("step_order"),
        kind,
        created_at: row.get("created_at"),
    })
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowRun, StoreError> {
    let trigger_type: String = row.get("trigger_type");
    let status: String = row.get("status");
    Ok(WorkflowRun {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        workflow_name: row.get("workflow_name"),
        organization_id: row.get("organization_id"),
        trigger_type: from_text(&trigger_type)?,
        trigger_payload: row.get("trigger_payload"),
        status: from_text(&status)?,
        current_step: row.get("current_step"),
        steps: from_json(row.get("steps"))?,
        context: from_json(row.get("context"))?,
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn run_step_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowRunStep, StoreError> {
    let status: String = row.get("status");
    Ok(WorkflowRunStep {
        id: row.get("id"),
        run_id: row.get("run_id"),
        step_id: row.get("step_id"),
        step_order: row.get("step_order"),
        step_type: row.get("step_type"),
        action_type: row.get("action_type"),
        status: from_text(&status)?,
        input: row.get("input"),
        output: row.get("output"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn scheduled_from_row(row: &sqlx::postgres::PgRow) -> Result<ScheduledStep, StoreError> {
    let status: String = row.get("status");
    Ok(ScheduledStep {
        id: row.get("id"),
        run_id: row.get("run_id"),
        resume_step: row.get("resume_step"),
        execute_at: row.get("execute_at"),
        context: from_json(row.get("context"))?,
        status: from_text(&status)?,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, workflow, steps), fields(workflow_id = %workflow.id))]
    async fn create_workflow(
        &self,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError> {
        let trigger_json = to_json(&workflow.trigger)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO flowline_workflows
                (id, organization_id, name, description, is_active,
                 trigger_type, trigger, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.organization_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.is_active)
        .bind(workflow.trigger.trigger_type().to_string())
        .bind(&trigger_json)
        .bind(workflow.created_by)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert workflow: {}", e);
            StoreError::Database(e.to_string())
        })?;

        for step in steps {
            let kind_json = to_json(&step.kind)?;
            sqlx::query(
                r#"
                INSERT INTO flowline_workflow_steps
                    (id, workflow_id, step_order, kind, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(step.id)
            .bind(step.workflow_id)
            .bind(step.step_order)
            .bind(&kind_json)
            .bind(step.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(workflow_id = %workflow.id, steps = steps.len(), "created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, description, is_active,
                   trigger, created_by, created_at, updated_at
            FROM flowline_workflows
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        workflow_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_active_workflows(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, name, description, is_active,
                   trigger, created_by, created_at, updated_at
            FROM flowline_workflows
            WHERE is_active AND trigger_type = $1
            "#,
        )
        .bind(trigger_type.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_active_workflows_for_org(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, name, description, is_active,
                   trigger, created_by, created_at, updated_at
            FROM flowline_workflows
            WHERE is_active AND organization_id = $1 AND trigger_type = $2
            "#,
        )
        .bind(organization_id)
        .bind(trigger_type.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn set_workflow_active(
        &self,
        workflow_id: Uuid,
        active: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_workflows
            SET is_active = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }

        debug!(%workflow_id, active, "set workflow active flag");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>, StoreError> {
        // Distinguish "no steps" from "no such workflow"
        let _ = self.get_workflow(workflow_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, step_order, kind, created_at
            FROM flowline_workflow_steps
            WHERE workflow_id = $1
            ORDER BY step_order
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(step_from_row).collect()
    }

    #[instrument(skip(self, template), fields(template_id = %template.id))]
    async fn create_template(&self, template: &WorkflowTemplate) -> Result<(), StoreError> {
        let trigger_json = to_json(&template.trigger)?;
        let steps_json = to_json(&template.steps)?;

        sqlx::query(
            r#"
            INSERT INTO flowline_templates
                (id, organization_id, name, description, trigger, steps, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(template.id)
        .bind(template.organization_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&trigger_json)
        .bind(&steps_json)
        .bind(template.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, description, trigger, steps, created_at
            FROM flowline_templates
            WHERE id = $1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::TemplateNotFound(template_id))?;

        Ok(WorkflowTemplate {
            id: row.get("id"),
            organization_id: row.get("organization_id"),
            name: row.get("name"),
            description: row.get("description"),
            trigger: from_json(row.get("trigger"))?,
            steps: from_json(row.get("steps"))?,
            created_at: row.get("created_at"),
        })
    }

    #[instrument(skip(self))]
    async fn list_templates(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, name, description, trigger, steps, created_at
            FROM flowline_templates
            WHERE organization_id IS NULL OR organization_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(WorkflowTemplate {
                    id: row.get("id"),
                    organization_id: row.get("organization_id"),
                    name: row.get("name"),
                    description: row.get("description"),
                    trigger: from_json(row.get("trigger"))?,
                    steps: from_json(row.get("steps"))?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let steps_json = to_json(&run.steps)?;
        let context_json = to_json(&run.context)?;

        sqlx::query(
            r#"
            INSERT INTO flowline_runs
                (id, workflow_id, workflow_name, organization_id, trigger_type,
                 trigger_payload, status, current_step, steps, context,
                 error_message, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(run.id)
        .bind(run.workflow_id)
        .bind(&run.workflow_name)
        .bind(run.organization_id)
        .bind(run.trigger_type.to_string())
        .bind(&run.trigger_payload)
        .bind(run.status.to_string())
        .bind(run.current_step)
        .bind(&steps_json)
        .bind(&context_json)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert run: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(run_id = %run.id, workflow = %run.workflow_name, "created run");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, workflow_name, organization_id, trigger_type,
                   trigger_payload, status, current_step, steps, context,
                   error_message, started_at, completed_at
            FROM flowline_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::RunNotFound(run_id))?;

        run_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_runs(&self, workflow_id: Uuid) -> Result<Vec<WorkflowRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, workflow_name, organization_id, trigger_type,
                   trigger_payload, status, current_step, steps, context,
                   error_message, started_at, completed_at
            FROM flowline_runs
            WHERE workflow_id = $1
            ORDER BY started_at DESC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(run_from_row).collect()
    }

    #[instrument(skip(self, context))]
    async fn update_run_progress(
        &self,
        run_id: Uuid,
        current_step: i32,
        context: &RunContext,
    ) -> Result<(), StoreError> {
        let context_json = to_json(context)?;

        let result = sqlx::query(
            r#"
            UPDATE flowline_runs
            SET current_step = $2, context = $3
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(current_step)
        .bind(&context_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let completed_at: Option<DateTime<Utc>> =
            status.is_terminal().then(Utc::now);

        let result = sqlx::query(
            r#"
            UPDATE flowline_runs
            SET status = $2,
                error_message = $3,
                completed_at = COALESCE($4, completed_at)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.to_string())
        .bind(error_message)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update run status: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }

        debug!(%run_id, %status, "updated run status");
        Ok(())
    }

    #[instrument(skip(self, run_step), fields(run_id = %run_step.run_id))]
    async fn append_run_step(&self, run_step: &WorkflowRunStep) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO flowline_run_steps
                (id, run_id, step_id, step_order, step_type, action_type,
                 status, input, output, error_message, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run_step.id)
        .bind(run_step.run_id)
        .bind(run_step.step_id)
        .bind(run_step.step_order)
        .bind(&run_step.step_type)
        .bind(&run_step.action_type)
        .bind(run_step.status.to_string())
        .bind(&run_step.input)
        .bind(&run_step.output)
        .bind(&run_step.error_message)
        .bind(run_step.started_at)
        .bind(run_step.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, output))]
    async fn finish_run_step(
        &self,
        run_step_id: Uuid,
        status: RunStepStatus,
        output: Option<serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        // Finalize only once; completed records stay immutable
        let result = sqlx::query(
            r#"
            UPDATE flowline_run_steps
            SET status = $2, output = $3, error_message = $4, completed_at = NOW()
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(run_step_id)
        .bind(status.to_string())
        .bind(&output)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "run step {run_step_id} missing or already finalized"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_run_steps(&self, run_id: Uuid) -> Result<Vec<WorkflowRunStep>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, step_id, step_order, step_type, action_type,
                   status, input, output, error_message, started_at, completed_at
            FROM flowline_run_steps
            WHERE run_id = $1
            ORDER BY started_at, id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(run_step_from_row).collect()
    }

    #[instrument(skip(self, scheduled), fields(run_id = %scheduled.run_id))]
    async fn create_scheduled_step(&self, scheduled: &ScheduledStep) -> Result<(), StoreError> {
        let context_json = to_json(&scheduled.context)?;

        sqlx::query(
            r#"
            INSERT INTO flowline_scheduled_steps
                (id, run_id, resume_step, execute_at, context, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(scheduled.id)
        .bind(scheduled.run_id)
        .bind(scheduled.resume_step)
        .bind(scheduled.execute_at)
        .bind(&context_json)
        .bind(scheduled.status.to_string())
        .bind(scheduled.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(run_id = %scheduled.run_id, execute_at = %scheduled.execute_at, "scheduled wake-up");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_due_scheduled_steps(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledStep>, StoreError> {
        // SKIP LOCKED keeps concurrent pollers from claiming the same row
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT id
                FROM flowline_scheduled_steps
                WHERE status = 'pending' AND execute_at <= $1
                ORDER BY execute_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE flowline_scheduled_steps s
            SET status = 'executed'
            FROM due d
            WHERE s.id = d.id
            RETURNING s.id, s.run_id, s.resume_step, s.execute_at,
                      s.context, s.status, s.created_at
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim scheduled steps: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let claimed: Result<Vec<ScheduledStep>, StoreError> =
            rows.iter().map(scheduled_from_row).collect();
        let claimed = claimed?;

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due scheduled steps");
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn set_scheduled_step_status(
        &self,
        scheduled_id: Uuid,
        status: ScheduledStepStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_scheduled_steps
            SET status = $2
            WHERE id = $1
            "#,
        )
        .bind(scheduled_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "scheduled step {scheduled_id} not found"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_scheduled_steps_for_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE flowline_scheduled_steps
            SET status = 'cancelled'
            WHERE run_id = $1 AND status = 'pending'
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}
