//! Workflow definitions, triggers, and templates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::context::EntityKind;
use crate::step::{StepKind, WorkflowStep};

/// The four ways a workflow can be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A tracked entity was created/updated/deleted
    Event,

    /// A recurring schedule came due
    Schedule,

    /// An explicit invocation named this workflow
    Manual,

    /// An inbound webhook addressed this workflow
    Webhook,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Schedule => write!(f, "schedule"),
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// Domain event kinds workflows can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// Recurrence of a schedule trigger
///
/// `time` fields are `HH:MM` in the schedule's timezone; `day_of_week` uses
/// 0 = Sunday through 6 = Saturday; cron expressions use the standard five
/// fields (minute, hour, day-of-month, month, day-of-week).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum ScheduleFrequency {
    Daily { time: String },
    Weekly { day_of_week: u8, time: String },
    Monthly { day_of_month: u32, time: String },
    Cron { cron: String },
}

/// Trigger configuration, variant per trigger type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Start on matching domain events
    Event {
        /// Event kinds that match (any-of)
        event_types: Vec<EventType>,

        /// Entity kind restriction; `None` matches any entity
        #[serde(skip_serializing_if = "Option::is_none")]
        entity_type: Option<EntityKind>,

        /// Field -> expected value; every filter must match exactly
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        filters: BTreeMap<String, serde_json::Value>,
    },

    /// Start on a recurring schedule
    Schedule {
        #[serde(flatten)]
        frequency: ScheduleFrequency,

        /// UTC-offset timezone string: "UTC", "+02:00", "-0530"
        #[serde(default = "default_timezone")]
        timezone: String,
    },

    /// Start only on explicit invocation
    Manual {},

    /// Start on an inbound webhook addressed to this workflow
    Webhook {
        /// Shared secret; when set, the caller's signature must verify
        #[serde(skip_serializing_if = "Option::is_none")]
        secret: Option<String>,

        /// Caller IP allow-list; empty means any
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allowed_ips: Vec<String>,
    },
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TriggerConfig {
    /// The trigger type this configuration belongs to
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Event { .. } => TriggerType::Event,
            Self::Schedule { .. } => TriggerType::Schedule,
            Self::Manual {} => TriggerType::Manual,
            Self::Webhook { .. } => TriggerType::Webhook,
        }
    }

    /// A manual trigger with no configuration
    pub fn manual() -> Self {
        Self::Manual {}
    }
}

/// A named, organization-scoped automation definition
///
/// Owns an ordered step list (persisted separately as [`WorkflowStep`]s).
/// An inactive workflow never starts new runs; in-flight runs still complete
/// because runs snapshot their step list at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub trigger: TriggerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an active workflow with a fresh id
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        trigger: TriggerConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id,
            name: name.into(),
            description: None,
            is_active: true,
            trigger,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the creating user
    pub fn with_creator(mut self, user_id: Uuid) -> Self {
        self.created_by = Some(user_id);
        self
    }
}

/// A reusable, non-executable blueprint: trigger config plus step kinds
///
/// Global templates (`organization_id = None`) are available to every
/// organization. Instantiating a template copies its steps into a new,
/// independently editable [`Workflow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    /// `None` means the template is global
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: TriggerConfig,
    /// Step kinds in order; orders 1..N are assigned on instantiation
    pub steps: Vec<StepKind>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    /// Create a global template
    pub fn global(name: impl Into<String>, trigger: TriggerConfig, steps: Vec<StepKind>) -> Self {
        Self {
            id: Uuid::now_v7(),
            organization_id: None,
            name: name.into(),
            description: None,
            trigger,
            steps,
            created_at: Utc::now(),
        }
    }

    /// Create an organization-owned template
    pub fn for_org(
        organization_id: Uuid,
        name: impl Into<String>,
        trigger: TriggerConfig,
        steps: Vec<StepKind>,
    ) -> Self {
        Self {
            organization_id: Some(organization_id),
            ..Self::global(name, trigger, steps)
        }
    }

    /// Instantiate this template as a new workflow for an organization
    ///
    /// Steps receive fresh ids and dense orders starting at 1.
    pub fn instantiate(
        &self,
        organization_id: Uuid,
        created_by: Option<Uuid>,
    ) -> (Workflow, Vec<WorkflowStep>) {
        let mut workflow = Workflow::new(organization_id, self.name.clone(), self.trigger.clone());
        workflow.description = self.description.clone();
        workflow.created_by = created_by;

        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, kind)| WorkflowStep::new(workflow.id, (i + 1) as i32, kind.clone()))
            .collect();

        (workflow, steps)
    }
}

/// Definition-level validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("workflow has no steps")]
    Empty,

    #[error("step orders must be dense starting at 1; found {0} at position {1}")]
    NonDenseOrder(i32, usize),

    #[error("else_goto_step {target} on step {step_order} references no existing step")]
    DanglingGoto { step_order: i32, target: i32 },

    #[error("workflow has more than one loop step (second at order {0})")]
    MultipleLoops(i32),

    #[error("step {0} follows a loop step but is a {1}; loop bodies allow only actions and conditions")]
    InvalidLoopBody(i32, &'static str),
}

/// Validate a workflow's step list before it may start runs
///
/// Checks: non-empty, dense 1..N orders, `else_goto_step` targets exist, at
/// most one loop step, and nothing after a loop step except actions and
/// conditions (the loop body is everything that follows it).
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
    orders.sort_unstable();
    for (i, order) in orders.iter().enumerate() {
        if *order != (i + 1) as i32 {
            return Err(ValidationError::NonDenseOrder(*order, i));
        }
    }

    let mut loop_order: Option<i32> = None;
    for step in steps {
        if let StepKind::Condition(cfg) = &step.kind {
            if let Some(target) = cfg.else_goto_step {
                if orders.binary_search(&target).is_err() {
                    return Err(ValidationError::DanglingGoto {
                        step_order: step.step_order,
                        target,
                    });
                }
            }
        }
        if matches!(step.kind, StepKind::Loop(_)) {
            if loop_order.is_some() {
                return Err(ValidationError::MultipleLoops(step.step_order));
            }
            loop_order = Some(step.step_order);
        }
    }

    if let Some(loop_at) = loop_order {
        for step in steps {
            if step.step_order > loop_at {
                match step.kind {
                    StepKind::Action(_) | StepKind::Condition(_) => {}
                    StepKind::Delay(_) => {
                        return Err(ValidationError::InvalidLoopBody(step.step_order, "delay"))
                    }
                    StepKind::Loop(_) => unreachable!("caught by MultipleLoops above"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ActionConfig, ConditionStepConfig, DelayStepConfig, DelayUnit};
    use crate::ConditionOperator;
    use serde_json::json;

    fn action_step(workflow_id: Uuid, order: i32) -> WorkflowStep {
        WorkflowStep::new(
            workflow_id,
            order,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "noted".to_string(),
                entity_id: None,
            }),
        )
    }

    #[test]
    fn test_trigger_config_serialization() {
        let trigger = TriggerConfig::Event {
            event_types: vec![EventType::Created],
            entity_type: Some(EntityKind::Task),
            filters: BTreeMap::from([("status".to_string(), json!("new"))]),
        };

        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value["trigger_type"], json!("event"));
        assert_eq!(value["entity_type"], json!("task"));
        assert_eq!(value["filters"]["status"], json!("new"));

        let parsed: TriggerConfig = serde_json::from_value(value).unwrap();
        assert_eq!(trigger, parsed);
    }

    #[test]
    fn test_schedule_frequency_flattens() {
        let trigger = TriggerConfig::Schedule {
            frequency: ScheduleFrequency::Weekly {
                day_of_week: 1,
                time: "09:00".to_string(),
            },
            timezone: "+02:00".to_string(),
        };

        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value["frequency"], json!("weekly"));
        assert_eq!(value["day_of_week"], json!(1));
        assert_eq!(value["timezone"], json!("+02:00"));

        let parsed: TriggerConfig = serde_json::from_value(value).unwrap();
        assert_eq!(trigger, parsed);
    }

    #[test]
    fn test_validate_dense_orders() {
        let wf = Uuid::now_v7();
        let steps = vec![action_step(wf, 1), action_step(wf, 3)];
        assert_eq!(
            validate_steps(&steps),
            Err(ValidationError::NonDenseOrder(3, 1))
        );
    }

    #[test]
    fn test_validate_empty() {
        assert_eq!(validate_steps(&[]), Err(ValidationError::Empty));
    }

    #[test]
    fn test_validate_dangling_goto() {
        let wf = Uuid::now_v7();
        let steps = vec![
            WorkflowStep::new(
                wf,
                1,
                StepKind::Condition(ConditionStepConfig {
                    field: "task.priority".to_string(),
                    operator: ConditionOperator::Equals,
                    value: Some(json!("critical")),
                    else_goto_step: Some(9),
                }),
            ),
            action_step(wf, 2),
        ];
        assert_eq!(
            validate_steps(&steps),
            Err(ValidationError::DanglingGoto {
                step_order: 1,
                target: 9
            })
        );
    }

    #[test]
    fn test_validate_delay_after_loop_rejected() {
        let wf = Uuid::now_v7();
        let steps = vec![
            WorkflowStep::new(
                wf,
                1,
                StepKind::Loop(crate::step::LoopStepConfig {
                    collection_field: "steps.0.items".to_string(),
                    max_iterations: None,
                }),
            ),
            WorkflowStep::new(
                wf,
                2,
                StepKind::Delay(DelayStepConfig {
                    delay_value: 5,
                    delay_type: DelayUnit::Minutes,
                }),
            ),
        ];
        assert_eq!(
            validate_steps(&steps),
            Err(ValidationError::InvalidLoopBody(2, "delay"))
        );
    }

    #[test]
    fn test_template_instantiation() {
        let template = WorkflowTemplate::global(
            "welcome sequence",
            TriggerConfig::manual(),
            vec![
                StepKind::Action(ActionConfig::SendEmail {
                    to: "{{contact.email}}".to_string(),
                    subject: "Welcome".to_string(),
                    body: "Hi {{contact.name}}".to_string(),
                }),
                StepKind::Action(ActionConfig::CreateActivity {
                    message: "welcomed".to_string(),
                    entity_id: None,
                }),
            ],
        );

        let org = Uuid::now_v7();
        let user = Uuid::now_v7();
        let (workflow, steps) = template.instantiate(org, Some(user));

        assert_eq!(workflow.organization_id, org);
        assert_eq!(workflow.created_by, Some(user));
        assert!(workflow.is_active);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_order, 1);
        assert_eq!(steps[1].step_order, 2);
        assert!(steps.iter().all(|s| s.workflow_id == workflow.id));
        assert!(validate_steps(&steps).is_ok());
    }
}
