//! Built-in action executors
//!
//! One executor per action type, each wrapping exactly one collaborator
//! contract. Executors receive already-resolved configs; the only validation
//! left to them is what the collaborator cannot express (and whatever the
//! collaborator rejects surfaces as the run's failure).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ActionError, ActionExecutor};
use crate::collaborators::{
    ActivityLog, AiService, ContactService, EmailSender, Notifier, OpportunityService,
    ProjectService, SlackPoster, TagService, TaskService,
};
use flowline_core::{ActionConfig, RunContext};

/// Registry dispatch guarantees the config variant matches the executor; a
/// mismatch means a registry wired by hand with the wrong tag.
fn config_mismatch(expected: &str) -> ActionError {
    ActionError::non_retryable(format!("config does not match action type '{expected}'"))
        .with_type("CONFIG_MISMATCH")
}

pub struct SendEmailExecutor {
    email: Arc<dyn EmailSender>,
}

impl SendEmailExecutor {
    pub fn new(email: Arc<dyn EmailSender>) -> Self {
        Self { email }
    }
}

#[async_trait]
impl ActionExecutor for SendEmailExecutor {
    fn action_type(&self) -> &'static str {
        "send_email"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::SendEmail { to, subject, body } => {
                if to.trim().is_empty() {
                    return Err(ActionError::non_retryable("email recipient resolved empty")
                        .with_type("INVALID_RECIPIENT"));
                }
                self.email.send(ctx.organization_id, to, subject, body).await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct SendNotificationExecutor {
    notifier: Arc<dyn Notifier>,
}

impl SendNotificationExecutor {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionExecutor for SendNotificationExecutor {
    fn action_type(&self) -> &'static str {
        "send_notification"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::SendNotification {
                user_id,
                title,
                message,
            } => {
                self.notifier
                    .notify(ctx.organization_id, user_id.as_deref(), title, message)
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct CreateTaskExecutor {
    tasks: Arc<dyn TaskService>,
}

impl CreateTaskExecutor {
    pub fn new(tasks: Arc<dyn TaskService>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl ActionExecutor for CreateTaskExecutor {
    fn action_type(&self) -> &'static str {
        "create_task"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::CreateTask {
                title,
                project_id,
                description,
                assignee_id,
                priority,
                due_in_days,
            } => {
                if title.trim().is_empty() {
                    return Err(ActionError::non_retryable("task title resolved empty")
                        .with_type("INVALID_TITLE"));
                }
                let due_date = due_in_days
                    .map(|days| (chrono::Utc::now() + chrono::Duration::days(days)).to_rfc3339());
                self.tasks
                    .create(
                        ctx.organization_id,
                        json!({
                            "title": title,
                            "project_id": project_id,
                            "description": description,
                            "assignee_id": assignee_id,
                            "priority": priority,
                            "due_date": due_date,
                        }),
                    )
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct UpdateTaskExecutor {
    tasks: Arc<dyn TaskService>,
}

impl UpdateTaskExecutor {
    pub fn new(tasks: Arc<dyn TaskService>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl ActionExecutor for UpdateTaskExecutor {
    fn action_type(&self) -> &'static str {
        "update_task"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::UpdateTask { task_id, fields } => {
                self.tasks.update(ctx.organization_id, task_id, fields).await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct CreateContactExecutor {
    contacts: Arc<dyn ContactService>,
}

impl CreateContactExecutor {
    pub fn new(contacts: Arc<dyn ContactService>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ActionExecutor for CreateContactExecutor {
    fn action_type(&self) -> &'static str {
        "create_contact"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::CreateContact {
                name,
                email,
                phone,
                company,
            } => {
                self.contacts
                    .create(
                        ctx.organization_id,
                        json!({
                            "name": name,
                            "email": email,
                            "phone": phone,
                            "company": company,
                        }),
                    )
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct UpdateContactExecutor {
    contacts: Arc<dyn ContactService>,
}

impl UpdateContactExecutor {
    pub fn new(contacts: Arc<dyn ContactService>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ActionExecutor for UpdateContactExecutor {
    fn action_type(&self) -> &'static str {
        "update_contact"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::UpdateContact { contact_id, fields } => {
                self.contacts
                    .update(ctx.organization_id, contact_id, fields)
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct CreateOpportunityExecutor {
    opportunities: Arc<dyn OpportunityService>,
}

impl CreateOpportunityExecutor {
    pub fn new(opportunities: Arc<dyn OpportunityService>) -> Self {
        Self { opportunities }
    }
}

#[async_trait]
impl ActionExecutor for CreateOpportunityExecutor {
    fn action_type(&self) -> &'static str {
        "create_opportunity"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::CreateOpportunity {
                name,
                contact_id,
                value,
                stage,
            } => {
                self.opportunities
                    .create(
                        ctx.organization_id,
                        json!({
                            "name": name,
                            "contact_id": contact_id,
                            "value": value,
                            "stage": stage,
                        }),
                    )
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct UpdateOpportunityExecutor {
    opportunities: Arc<dyn OpportunityService>,
}

impl UpdateOpportunityExecutor {
    pub fn new(opportunities: Arc<dyn OpportunityService>) -> Self {
        Self { opportunities }
    }
}

#[async_trait]
impl ActionExecutor for UpdateOpportunityExecutor {
    fn action_type(&self) -> &'static str {
        "update_opportunity"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::UpdateOpportunity {
                opportunity_id,
                fields,
            } => {
                self.opportunities
                    .update(ctx.organization_id, opportunity_id, fields)
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct UpdateProjectExecutor {
    projects: Arc<dyn ProjectService>,
}

impl UpdateProjectExecutor {
    pub fn new(projects: Arc<dyn ProjectService>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl ActionExecutor for UpdateProjectExecutor {
    fn action_type(&self) -> &'static str {
        "update_project"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::UpdateProject { project_id, fields } => {
                self.projects
                    .update(ctx.organization_id, project_id, fields)
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct AddTagExecutor {
    tags: Arc<dyn TagService>,
}

impl AddTagExecutor {
    pub fn new(tags: Arc<dyn TagService>) -> Self {
        Self { tags }
    }
}

#[async_trait]
impl ActionExecutor for AddTagExecutor {
    fn action_type(&self) -> &'static str {
        "add_tag"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::AddTag {
                entity_type,
                entity_id,
                tag,
            } => {
                self.tags
                    .add(ctx.organization_id, entity_type, entity_id, tag)
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct RemoveTagExecutor {
    tags: Arc<dyn TagService>,
}

impl RemoveTagExecutor {
    pub fn new(tags: Arc<dyn TagService>) -> Self {
        Self { tags }
    }
}

#[async_trait]
impl ActionExecutor for RemoveTagExecutor {
    fn action_type(&self) -> &'static str {
        "remove_tag"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::RemoveTag {
                entity_type,
                entity_id,
                tag,
            } => {
                self.tags
                    .remove(ctx.organization_id, entity_type, entity_id, tag)
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct AiGenerateExecutor {
    ai: Arc<dyn AiService>,
}

impl AiGenerateExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl ActionExecutor for AiGenerateExecutor {
    fn action_type(&self) -> &'static str {
        "ai_generate"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::AiGenerate { prompt } => {
                self.ai.generate(ctx.organization_id, prompt).await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct AiCategorizeExecutor {
    ai: Arc<dyn AiService>,
}

impl AiCategorizeExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl ActionExecutor for AiCategorizeExecutor {
    fn action_type(&self) -> &'static str {
        "ai_categorize"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::AiCategorize { text, categories } => {
                if categories.is_empty() {
                    return Err(ActionError::non_retryable("no categories configured")
                        .with_type("INVALID_CATEGORIES"));
                }
                self.ai.categorize(ctx.organization_id, text, categories).await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct AiSummarizeExecutor {
    ai: Arc<dyn AiService>,
}

impl AiSummarizeExecutor {
    pub fn new(ai: Arc<dyn AiService>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl ActionExecutor for AiSummarizeExecutor {
    fn action_type(&self) -> &'static str {
        "ai_summarize"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::AiSummarize { text } => {
                self.ai.summarize(ctx.organization_id, text).await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct CreateActivityExecutor {
    activity: Arc<dyn ActivityLog>,
}

impl CreateActivityExecutor {
    pub fn new(activity: Arc<dyn ActivityLog>) -> Self {
        Self { activity }
    }
}

#[async_trait]
impl ActionExecutor for CreateActivityExecutor {
    fn action_type(&self) -> &'static str {
        "create_activity"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::CreateActivity { message, entity_id } => {
                self.activity
                    .record(ctx.organization_id, message, entity_id.as_deref())
                    .await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}

pub struct SlackMessageExecutor {
    slack: Arc<dyn SlackPoster>,
}

impl SlackMessageExecutor {
    pub fn new(slack: Arc<dyn SlackPoster>) -> Self {
        Self { slack }
    }
}

#[async_trait]
impl ActionExecutor for SlackMessageExecutor {
    fn action_type(&self) -> &'static str {
        "slack_message"
    }

    async fn execute(&self, config: &ActionConfig, ctx: &RunContext) -> Result<Value, ActionError> {
        match config {
            ActionConfig::SlackMessage { channel, message } => {
                self.slack.post(ctx.organization_id, channel, message).await
            }
            _ => Err(config_mismatch(self.action_type())),
        }
    }
}
