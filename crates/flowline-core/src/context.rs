//! Run execution context
//!
//! The context is the bag of data available to template resolution and
//! condition evaluation during a run: trigger metadata, entity snapshots,
//! prior step outputs, and (inside a loop body) the current loop frame.
//!
//! Contexts are immutable per step: each step receives the prior context and
//! produces a new one with its own output merged in. This keeps the audit
//! trail reconstructible and makes concurrent-run isolation free.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{EventType, TriggerType};

/// Domain entities that can trigger workflows and be snapshotted into context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Opportunity,
    Task,
    Project,
    Company,
}

impl EntityKind {
    /// Stable string form, used as the context key for entity snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Opportunity => "opportunity",
            Self::Task => "task",
            Self::Project => "project",
            Self::Company => "company",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What started the run, visible to templates under `trigger.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// Which trigger kind fired
    pub trigger_type: TriggerType,

    /// Event kind for event triggers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,

    /// Entity kind for event triggers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityKind>,

    /// Entity id for event triggers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Raw trigger payload (webhook body, manual invocation data, ...)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl TriggerInfo {
    /// Trigger info carrying only the trigger kind
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            event_type: None,
            entity_type: None,
            entity_id: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Attach a raw payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// The loop frame present while executing inside a loop body
///
/// Visible to templates as `loop.index`, `loop.item`, `loop.collection_length`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFrame {
    /// Zero-based iteration index
    pub index: usize,

    /// The collection item for this iteration
    pub item: serde_json::Value,

    /// Total number of items in the collection
    pub collection_length: usize,
}

/// The execution context threaded through one run
///
/// Serializes to the JSON document that template paths and condition fields
/// resolve against: `trigger`, entity snapshots (`contact`, `task`, ...),
/// `steps.<order>` for prior step outputs, and `loop` inside a loop body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Trigger metadata
    pub trigger: TriggerInfo,

    /// Entity snapshots, populated from whatever entity triggered the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opportunity: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<serde_json::Value>,

    /// Outputs of executed steps, keyed by step order
    #[serde(default)]
    pub steps: BTreeMap<i32, serde_json::Value>,

    /// Organization scope for the run
    pub organization_id: Uuid,

    /// User that triggered the run, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    /// When the trigger fired
    pub triggered_at: DateTime<Utc>,

    /// Present only while executing inside a loop body
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_frame: Option<LoopFrame>,
}

impl RunContext {
    /// Create an initial context for a fresh run
    pub fn new(trigger: TriggerInfo, organization_id: Uuid) -> Self {
        Self {
            trigger,
            contact: None,
            opportunity: None,
            task: None,
            project: None,
            company: None,
            steps: BTreeMap::new(),
            organization_id,
            user_id: None,
            triggered_at: Utc::now(),
            loop_frame: None,
        }
    }

    /// Set the triggering user
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Attach an entity snapshot under its kind's key
    pub fn with_entity(mut self, kind: EntityKind, data: serde_json::Value) -> Self {
        match kind {
            EntityKind::Contact => self.contact = Some(data),
            EntityKind::Opportunity => self.opportunity = Some(data),
            EntityKind::Task => self.task = Some(data),
            EntityKind::Project => self.project = Some(data),
            EntityKind::Company => self.company = Some(data),
        }
        self
    }

    /// A new context with the given step's output recorded
    pub fn with_step_output(mut self, step_order: i32, output: serde_json::Value) -> Self {
        self.steps.insert(step_order, output);
        self
    }

    /// A new context inside the given loop frame
    pub fn with_loop(mut self, frame: LoopFrame) -> Self {
        self.loop_frame = Some(frame);
        self
    }

    /// A new context with any loop frame removed
    pub fn without_loop(mut self) -> Self {
        self.loop_frame = None;
        self
    }

    /// The JSON document templates and conditions resolve against
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
