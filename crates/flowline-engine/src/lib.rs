//! # Flowline Engine
//!
//! Execution engine for the flowline workflow automation system: trigger
//! matching, step interpretation, run scheduling, and PostgreSQL-backed
//! persistence on top of the domain types in `flowline-core`.
//!
//! ## Features
//!
//! - **Four trigger kinds**: domain events with filters, recurring schedules
//!   (daily/weekly/monthly/cron in a UTC-offset timezone), manual
//!   invocations, and signed inbound webhooks
//! - **Durable delays**: a delay step pauses the run and persists a wake-up
//!   record; any poller in any process can resume it after a restart
//! - **Append-only audit trail**: every step execution is recorded before it
//!   runs and finalized after
//! - **Pluggable actions**: one executor per `action_type`, dispatched
//!   through a registry; side effects go through collaborator traits
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (dispatches events, ticks, manual calls, webhooks)         │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                │
//!              ▼                                ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │      TriggerMatcher       │   │        RunScheduler          │
//! │  (which workflows fire,   │   │  (start / cancel / resume,   │
//! │   builds initial context) │   │   drives StepInterpreter)    │
//! └──────────────────────────┘   └──────────────────────────────┘
//!              │                                │
//!              └────────────────┬───────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowStore                           │
//! │  (PostgreSQL: workflows, runs, audit trail, wake-ups)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flowline_engine::prelude::*;
//!
//! let store = Arc::new(PostgresWorkflowStore::new(pool));
//! let engine = Arc::new(WorkflowEngine::new(
//!     store,
//!     collaborators,
//!     EngineConfig::default(),
//! ));
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let tasks = engine.spawn_background_tasks(shutdown_rx);
//!
//! let run = engine.dispatch_manual(workflow_id, json!({}), None).await?;
//! ```

pub mod actions;
pub mod collaborators;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod persistence;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod trigger;

/// Commonly used types
pub mod prelude {
    pub use crate::actions::{ActionError, ActionExecutor, ActionRegistry};
    pub use crate::collaborators::Collaborators;
    pub use crate::engine::{EngineConfig, WorkflowEngine};
    pub use crate::error::EngineError;
    pub use crate::persistence::{
        InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore,
    };
    pub use crate::retry::RetryPolicy;
    pub use crate::scheduler::{RunScheduler, SchedulerConfig};
    pub use crate::trigger::{EventStimulus, TriggerMatch, TriggerMatcher, WebhookStimulus};
    pub use flowline_core::{
        RunContext, RunStatus, TriggerConfig, TriggerType, Workflow, WorkflowRun, WorkflowStep,
        WorkflowTemplate,
    };
}

pub use actions::{ActionError, ActionExecutor, ActionRegistry};
pub use collaborators::Collaborators;
pub use engine::{EngineConfig, WorkflowEngine};
pub use error::EngineError;
pub use interpreter::StepInterpreter;
pub use persistence::{InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, WorkflowStore};
pub use retry::RetryPolicy;
pub use scheduler::{RunScheduler, SchedulerConfig};
pub use trigger::{EventStimulus, TriggerMatch, TriggerMatcher, WebhookStimulus};
