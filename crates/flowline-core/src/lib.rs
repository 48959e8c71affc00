//! # Flowline Core
//!
//! Domain types and leaf logic for the flowline workflow automation engine:
//!
//! - **Workflow definitions**: trigger configuration plus an ordered step list
//! - **Steps**: tagged sum types for action / condition / delay / loop steps
//! - **Runs**: execution instances with an append-only audit trail
//! - **Context**: the immutable-per-step data bag threaded through a run
//! - **Template renderer**: `{{path.to.field}}` substitution against the context
//! - **Condition evaluator**: `(field, operator, value)` branching predicates
//!
//! This crate does no I/O. Persistence, trigger matching, and step execution
//! live in `flowline-engine`.

pub mod condition;
pub mod context;
pub mod run;
pub mod step;
pub mod template;
pub mod workflow;

pub use condition::{evaluate_condition, ConditionOperator};
pub use context::{EntityKind, LoopFrame, RunContext, TriggerInfo};
pub use run::{
    RunStatus, RunStepStatus, ScheduledStep, ScheduledStepStatus, WorkflowRun, WorkflowRunStep,
};
pub use step::{
    ActionConfig, ConditionStepConfig, DelayStepConfig, DelayUnit, LoopStepConfig, StepKind,
    WorkflowStep, DEFAULT_MAX_LOOP_ITERATIONS,
};
pub use template::{render_str, render_value, resolve_path};
pub use workflow::{
    validate_steps, EventType, ScheduleFrequency, TriggerConfig, TriggerType, ValidationError,
    Workflow, WorkflowTemplate,
};
