//! Workflow steps and their tagged configuration
//!
//! Step configuration is a proper sum type: `StepKind` is keyed by
//! `step_type` and the action payload by `action_type`, so the interpreter's
//! dispatch is exhaustively checked by the compiler. An action step carries
//! an action config and nothing else does, which makes the
//! "`action_type` is set iff `step_type = action`" invariant structural.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::condition::ConditionOperator;

/// Cap applied to loop steps that do not configure `max_iterations`
pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 1000;

/// Units for delay steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// Configuration of a condition step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionStepConfig {
    /// Dot-path into the run context
    pub field: String,

    /// Comparison operator
    pub operator: ConditionOperator,

    /// Right-hand value, unused by `is_empty`/`is_not_empty`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,

    /// Step order to jump to when the condition is false; absence falls
    /// through to the next sequential step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub else_goto_step: Option<i32>,
}

/// Configuration of a delay step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayStepConfig {
    pub delay_value: i64,
    pub delay_type: DelayUnit,
}

impl DelayStepConfig {
    /// The wall-clock duration this delay pauses the run for
    pub fn duration(&self) -> chrono::Duration {
        match self.delay_type {
            DelayUnit::Seconds => chrono::Duration::seconds(self.delay_value),
            DelayUnit::Minutes => chrono::Duration::minutes(self.delay_value),
            DelayUnit::Hours => chrono::Duration::hours(self.delay_value),
            DelayUnit::Days => chrono::Duration::days(self.delay_value),
        }
    }
}

/// Configuration of a loop step
///
/// The loop body is every step after the loop step through the end of the
/// step list, repeated once per collection item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStepConfig {
    /// Dot-path resolving to an array in the run context
    pub collection_field: String,

    /// Iteration cap; defaults to [`DEFAULT_MAX_LOOP_ITERATIONS`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl LoopStepConfig {
    /// The effective iteration cap
    pub fn cap(&self) -> u32 {
        self.max_iterations.unwrap_or(DEFAULT_MAX_LOOP_ITERATIONS)
    }
}

/// Per-action configuration, keyed by `action_type`
///
/// Every string field may contain `{{path}}` template tokens; the
/// interpreter resolves them against the run context before the executor
/// sees the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ActionConfig {
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    SendNotification {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        title: String,
        message: String,
    },
    CreateTask {
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assignee_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        priority: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        due_in_days: Option<i64>,
    },
    UpdateTask {
        task_id: String,
        fields: BTreeMap<String, serde_json::Value>,
    },
    CreateContact {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        phone: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        company: Option<String>,
    },
    UpdateContact {
        contact_id: String,
        fields: BTreeMap<String, serde_json::Value>,
    },
    CreateOpportunity {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        contact_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
    UpdateOpportunity {
        opportunity_id: String,
        fields: BTreeMap<String, serde_json::Value>,
    },
    UpdateProject {
        project_id: String,
        fields: BTreeMap<String, serde_json::Value>,
    },
    AddTag {
        entity_type: String,
        entity_id: String,
        tag: String,
    },
    RemoveTag {
        entity_type: String,
        entity_id: String,
        tag: String,
    },
    AiGenerate {
        prompt: String,
    },
    AiCategorize {
        text: String,
        categories: Vec<String>,
    },
    AiSummarize {
        text: String,
    },
    WebhookCall {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    CreateActivity {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        entity_id: Option<String>,
    },
    SlackMessage {
        channel: String,
        message: String,
    },
}

impl ActionConfig {
    /// The `action_type` tag as stored and used for registry dispatch
    pub fn action_type(&self) -> &'static str {
        match self {
            Self::SendEmail { .. } => "send_email",
            Self::SendNotification { .. } => "send_notification",
            Self::CreateTask { .. } => "create_task",
            Self::UpdateTask { .. } => "update_task",
            Self::CreateContact { .. } => "create_contact",
            Self::UpdateContact { .. } => "update_contact",
            Self::CreateOpportunity { .. } => "create_opportunity",
            Self::UpdateOpportunity { .. } => "update_opportunity",
            Self::UpdateProject { .. } => "update_project",
            Self::AddTag { .. } => "add_tag",
            Self::RemoveTag { .. } => "remove_tag",
            Self::AiGenerate { .. } => "ai_generate",
            Self::AiCategorize { .. } => "ai_categorize",
            Self::AiSummarize { .. } => "ai_summarize",
            Self::WebhookCall { .. } => "webhook_call",
            Self::CreateActivity { .. } => "create_activity",
            Self::SlackMessage { .. } => "slack_message",
        }
    }
}

/// One node in a workflow's ordered step list, keyed by `step_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    Action(ActionConfig),
    Condition(ConditionStepConfig),
    Delay(DelayStepConfig),
    Loop(LoopStepConfig),
}

impl StepKind {
    /// The `step_type` tag
    pub fn step_type(&self) -> &'static str {
        match self {
            Self::Action(_) => "action",
            Self::Condition(_) => "condition",
            Self::Delay(_) => "delay",
            Self::Loop(_) => "loop",
        }
    }

    /// The `action_type` tag, present only for action steps
    pub fn action_type(&self) -> Option<&'static str> {
        match self {
            Self::Action(config) => Some(config.action_type()),
            _ => None,
        }
    }
}

/// One persisted step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Unique per workflow; defines the default "next" sequencing
    pub step_order: i32,
    #[serde(flatten)]
    pub kind: StepKind,
    pub created_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// Create a step with a fresh id
    pub fn new(workflow_id: Uuid, step_order: i32, kind: StepKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            step_order,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_kind_tags() {
        let kind = StepKind::Action(ActionConfig::SendEmail {
            to: "a@b.c".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
        });
        assert_eq!(kind.step_type(), "action");
        assert_eq!(kind.action_type(), Some("send_email"));

        let kind = StepKind::Delay(DelayStepConfig {
            delay_value: 10,
            delay_type: DelayUnit::Minutes,
        });
        assert_eq!(kind.step_type(), "delay");
        assert_eq!(kind.action_type(), None);
    }

    #[test]
    fn test_step_kind_serialization_carries_both_tags() {
        let kind = StepKind::Action(ActionConfig::WebhookCall {
            url: "https://example.com/hook".to_string(),
            method: Some("POST".to_string()),
            headers: BTreeMap::new(),
            body: Some(json!({"k": "v"})),
            timeout_secs: Some(10),
        });

        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["step_type"], json!("action"));
        assert_eq!(value["action_type"], json!("webhook_call"));
        assert_eq!(value["url"], json!("https://example.com/hook"));

        let parsed: StepKind = serde_json::from_value(value).unwrap();
        assert_eq!(kind, parsed);
    }

    #[test]
    fn test_condition_step_serialization() {
        let kind = StepKind::Condition(ConditionStepConfig {
            field: "task.priority".to_string(),
            operator: ConditionOperator::Equals,
            value: Some(json!("critical")),
            else_goto_step: Some(3),
        });

        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["step_type"], json!("condition"));
        assert_eq!(value["operator"], json!("equals"));
        assert_eq!(value["else_goto_step"], json!(3));

        let parsed: StepKind = serde_json::from_value(value).unwrap();
        assert_eq!(kind, parsed);
    }

    #[test]
    fn test_workflow_step_flattens_kind() {
        let step = WorkflowStep::new(
            Uuid::now_v7(),
            1,
            StepKind::Loop(LoopStepConfig {
                collection_field: "steps.1.items".to_string(),
                max_iterations: Some(50),
            }),
        );

        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["step_type"], json!("loop"));
        assert_eq!(value["step_order"], json!(1));
        assert_eq!(value["collection_field"], json!("steps.1.items"));

        let parsed: WorkflowStep = serde_json::from_value(value).unwrap();
        assert_eq!(step, parsed);
    }

    #[test]
    fn test_delay_duration() {
        let cfg = DelayStepConfig {
            delay_value: 10,
            delay_type: DelayUnit::Minutes,
        };
        assert_eq!(cfg.duration(), chrono::Duration::minutes(10));

        let cfg = DelayStepConfig {
            delay_value: 2,
            delay_type: DelayUnit::Days,
        };
        assert_eq!(cfg.duration(), chrono::Duration::days(2));
    }

    #[test]
    fn test_loop_cap_default() {
        let cfg = LoopStepConfig {
            collection_field: "x".to_string(),
            max_iterations: None,
        };
        assert_eq!(cfg.cap(), DEFAULT_MAX_LOOP_ITERATIONS);

        let cfg = LoopStepConfig {
            max_iterations: Some(5),
            ..cfg
        };
        assert_eq!(cfg.cap(), 5);
    }
}
