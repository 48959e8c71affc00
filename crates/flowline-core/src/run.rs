//! Run records: execution instances, their audit trail, and scheduled
//! resumptions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RunContext;
use crate::step::WorkflowStep;
use crate::workflow::{TriggerType, Workflow};

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Suspended on a delay step, awaiting a scheduled resumption
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One execution instance of a workflow
///
/// Carries a snapshot of the step list taken at start: definition edits
/// never alter an in-flight run, and run history survives workflow deletion
/// (`workflow_id` goes `None`, `workflow_name` stays for audit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    /// `None` once the parent workflow has been deleted
    pub workflow_id: Option<Uuid>,
    /// Denormalized for audit after workflow deletion
    pub workflow_name: String,
    pub organization_id: Uuid,
    pub trigger_type: TriggerType,
    pub trigger_payload: serde_json::Value,
    pub status: RunStatus,
    /// The step order about to execute or awaiting resumption
    pub current_step: i32,
    /// Step list snapshot taken at start
    pub steps: Vec<WorkflowStep>,
    pub context: RunContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Create a running run for the given workflow with a step snapshot
    pub fn start(workflow: &Workflow, steps: Vec<WorkflowStep>, context: RunContext) -> Self {
        let first_step = steps.iter().map(|s| s.step_order).min().unwrap_or(1);
        Self {
            id: Uuid::now_v7(),
            workflow_id: Some(workflow.id),
            workflow_name: workflow.name.clone(),
            organization_id: workflow.organization_id,
            trigger_type: workflow.trigger.trigger_type(),
            trigger_payload: context.trigger.payload.clone(),
            status: RunStatus::Running,
            current_step: first_step,
            steps,
            context,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Status of one step execution within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for RunStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Audit record of one step's execution within a run
///
/// Append-only; never mutated after `completed_at` is set. Exists for
/// observability, not for resumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    pub step_order: i32,
    pub step_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    pub status: RunStepStatus,
    /// Context snapshot at step entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Executor output, condition result, or pause marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRunStep {
    /// Create a `running` audit record for a step about to execute
    pub fn begin(run_id: Uuid, step: &WorkflowStep, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            step_id: Some(step.id),
            step_order: step.step_order,
            step_type: step.kind.step_type().to_string(),
            action_type: step.kind.action_type().map(str::to_string),
            status: RunStepStatus::Running,
            input: Some(input),
            output: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Status of a scheduled resumption record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledStepStatus {
    Pending,
    Executed,
    Cancelled,
}

impl std::fmt::Display for ScheduledStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executed => write!(f, "executed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Durable "wake me at time T" record created when a run hits a delay step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledStep {
    pub id: Uuid,
    pub run_id: Uuid,
    /// The step order to resume at
    pub resume_step: i32,
    pub execute_at: DateTime<Utc>,
    /// Context to restore on resumption
    pub context: RunContext,
    pub status: ScheduledStepStatus,
    pub created_at: DateTime<Utc>,
}

impl ScheduledStep {
    /// Create a pending wake-up record
    pub fn new(run_id: Uuid, resume_step: i32, execute_at: DateTime<Utc>, context: RunContext) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            resume_step,
            execute_at,
            context,
            status: ScheduledStepStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerInfo;
    use crate::step::{ActionConfig, StepKind};
    use crate::workflow::TriggerConfig;

    fn workflow() -> Workflow {
        Workflow::new(Uuid::now_v7(), "test", TriggerConfig::manual())
    }

    #[test]
    fn test_run_start_snapshot() {
        let wf = workflow();
        let steps = vec![WorkflowStep::new(
            wf.id,
            1,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "hello".to_string(),
                entity_id: None,
            }),
        )];
        let ctx = RunContext::new(TriggerInfo::new(TriggerType::Manual), wf.organization_id);
        let run = WorkflowRun::start(&wf, steps.clone(), ctx);

        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.current_step, 1);
        assert_eq!(run.workflow_id, Some(wf.id));
        assert_eq!(run.workflow_name, "test");
        assert_eq!(run.steps, steps);
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn test_run_step_begin_captures_tags() {
        let wf = workflow();
        let step = WorkflowStep::new(
            wf.id,
            2,
            StepKind::Action(ActionConfig::SendEmail {
                to: "a@b.c".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
            }),
        );
        let rs = WorkflowRunStep::begin(Uuid::now_v7(), &step, serde_json::json!({}));

        assert_eq!(rs.step_order, 2);
        assert_eq!(rs.step_type, "action");
        assert_eq!(rs.action_type.as_deref(), Some("send_email"));
        assert_eq!(rs.status, RunStepStatus::Running);
        assert!(rs.completed_at.is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::Paused.to_string(), "paused");
        assert_eq!(RunStepStatus::Success.to_string(), "success");
        assert_eq!(ScheduledStepStatus::Executed.to_string(), "executed");
    }
}
