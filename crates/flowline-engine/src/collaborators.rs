//! Collaborator contracts for action-backing services
//!
//! Each built-in action executor wraps exactly one of these traits. The
//! surrounding application owns the implementations (mailer, push service,
//! CRM mutators, AI provider, activity log, Slack client); the engine only
//! depends on the contracts. Every method receives already-template-resolved
//! parameters and returns a JSON-serializable result or an [`ActionError`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::actions::ActionError;

/// Sends email on behalf of an organization
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        organization_id: Uuid,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<Value, ActionError>;
}

/// Delivers in-app / push notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        organization_id: Uuid,
        user_id: Option<&str>,
        title: &str,
        message: &str,
    ) -> Result<Value, ActionError>;
}

/// Creates and updates tasks
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn create(&self, organization_id: Uuid, task: Value) -> Result<Value, ActionError>;

    async fn update(
        &self,
        organization_id: Uuid,
        task_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError>;
}

/// Creates and updates contacts
#[async_trait]
pub trait ContactService: Send + Sync {
    async fn create(&self, organization_id: Uuid, contact: Value) -> Result<Value, ActionError>;

    async fn update(
        &self,
        organization_id: Uuid,
        contact_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError>;
}

/// Creates and updates opportunities
#[async_trait]
pub trait OpportunityService: Send + Sync {
    async fn create(&self, organization_id: Uuid, opportunity: Value)
        -> Result<Value, ActionError>;

    async fn update(
        &self,
        organization_id: Uuid,
        opportunity_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError>;
}

/// Updates projects
#[async_trait]
pub trait ProjectService: Send + Sync {
    async fn update(
        &self,
        organization_id: Uuid,
        project_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError>;
}

/// Adds and removes entity tags
#[async_trait]
pub trait TagService: Send + Sync {
    async fn add(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        tag: &str,
    ) -> Result<Value, ActionError>;

    async fn remove(
        &self,
        organization_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        tag: &str,
    ) -> Result<Value, ActionError>;
}

/// Generic AI text service
#[async_trait]
pub trait AiService: Send + Sync {
    async fn generate(&self, organization_id: Uuid, prompt: &str) -> Result<Value, ActionError>;

    async fn categorize(
        &self,
        organization_id: Uuid,
        text: &str,
        categories: &[String],
    ) -> Result<Value, ActionError>;

    async fn summarize(&self, organization_id: Uuid, text: &str) -> Result<Value, ActionError>;
}

/// Appends to the organization's activity log
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(
        &self,
        organization_id: Uuid,
        message: &str,
        entity_id: Option<&str>,
    ) -> Result<Value, ActionError>;
}

/// Posts messages to Slack
#[async_trait]
pub trait SlackPoster: Send + Sync {
    async fn post(
        &self,
        organization_id: Uuid,
        channel: &str,
        message: &str,
    ) -> Result<Value, ActionError>;
}

/// The full set of collaborator services the built-in executors need
#[derive(Clone)]
pub struct Collaborators {
    pub email: Arc<dyn EmailSender>,
    pub notifier: Arc<dyn Notifier>,
    pub tasks: Arc<dyn TaskService>,
    pub contacts: Arc<dyn ContactService>,
    pub opportunities: Arc<dyn OpportunityService>,
    pub projects: Arc<dyn ProjectService>,
    pub tags: Arc<dyn TagService>,
    pub ai: Arc<dyn AiService>,
    pub activity: Arc<dyn ActivityLog>,
    pub slack: Arc<dyn SlackPoster>,
}
