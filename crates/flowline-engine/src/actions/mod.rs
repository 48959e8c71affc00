//! Action execution: errors, the executor trait, and the registry
//!
//! Each action type registers one executor; the registry performs no
//! business logic beyond dispatch on the `action_type` tag. Action-specific
//! validation lives in each executor and surfaces as an [`ActionError`]
//! consumed by the interpreter.

mod builtin;
mod http;

pub use builtin::{
    AddTagExecutor, AiCategorizeExecutor, AiGenerateExecutor, AiSummarizeExecutor,
    CreateActivityExecutor, CreateContactExecutor, CreateOpportunityExecutor, CreateTaskExecutor,
    RemoveTagExecutor, SendEmailExecutor, SendNotificationExecutor, SlackMessageExecutor,
    UpdateContactExecutor, UpdateOpportunityExecutor, UpdateProjectExecutor, UpdateTaskExecutor,
};
pub use http::WebhookCallExecutor;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::Collaborators;
use flowline_core::{ActionConfig, RunContext};

/// Error type for action failures
///
/// An action error fails its run: there is no interpreter-level retry and no
/// partial-success state. `retryable` only informs executor-internal retry
/// (e.g. the webhook action retrying its own HTTP call).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether an executor-internal retry may help
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<Value>,
}

impl ActionError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// One side-effecting action implementation
///
/// Executors receive a fully template-resolved config and the run context,
/// and return a JSON output that is recorded into `context.steps`.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// The `action_type` tag this executor handles
    fn action_type(&self) -> &'static str;

    /// Perform the side effect
    async fn execute(&self, config: &ActionConfig, ctx: &RunContext)
        -> Result<Value, ActionError>;
}

/// Registry mapping `action_type` tags to executors
///
/// Adding a new action type registers a new executor; the interpreter is
/// never touched.
#[derive(Default)]
pub struct ActionRegistry {
    executors: HashMap<&'static str, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in executor wired to collaborators
    pub fn with_builtins(collaborators: Collaborators) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SendEmailExecutor::new(collaborators.email)));
        registry.register(Arc::new(SendNotificationExecutor::new(collaborators.notifier)));
        registry.register(Arc::new(CreateTaskExecutor::new(collaborators.tasks.clone())));
        registry.register(Arc::new(UpdateTaskExecutor::new(collaborators.tasks)));
        registry.register(Arc::new(CreateContactExecutor::new(collaborators.contacts.clone())));
        registry.register(Arc::new(UpdateContactExecutor::new(collaborators.contacts)));
        registry.register(Arc::new(CreateOpportunityExecutor::new(
            collaborators.opportunities.clone(),
        )));
        registry.register(Arc::new(UpdateOpportunityExecutor::new(
            collaborators.opportunities,
        )));
        registry.register(Arc::new(UpdateProjectExecutor::new(collaborators.projects)));
        registry.register(Arc::new(AddTagExecutor::new(collaborators.tags.clone())));
        registry.register(Arc::new(RemoveTagExecutor::new(collaborators.tags)));
        registry.register(Arc::new(AiGenerateExecutor::new(collaborators.ai.clone())));
        registry.register(Arc::new(AiCategorizeExecutor::new(collaborators.ai.clone())));
        registry.register(Arc::new(AiSummarizeExecutor::new(collaborators.ai)));
        registry.register(Arc::new(CreateActivityExecutor::new(collaborators.activity)));
        registry.register(Arc::new(SlackMessageExecutor::new(collaborators.slack)));
        registry.register(Arc::new(WebhookCallExecutor::default()));
        registry
    }

    /// Register an executor under its action type
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.action_type(), executor);
    }

    /// Check whether an action type is registered
    pub fn contains(&self, action_type: &str) -> bool {
        self.executors.contains_key(action_type)
    }

    /// Registered action type tags
    pub fn action_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.executors.keys().copied()
    }

    /// Dispatch a resolved config to its executor
    pub async fn execute(
        &self,
        config: &ActionConfig,
        ctx: &RunContext,
    ) -> Result<Value, ActionError> {
        let tag = config.action_type();
        let executor = self.executors.get(tag).ok_or_else(|| {
            ActionError::non_retryable(format!("no executor registered for '{tag}'"))
                .with_type("UNKNOWN_ACTION_TYPE")
        })?;
        executor.execute(config, ctx).await
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("action_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::{TriggerInfo, TriggerType};
    use serde_json::json;
    use uuid::Uuid;

    struct EchoExecutor;

    #[async_trait]
    impl ActionExecutor for EchoExecutor {
        fn action_type(&self) -> &'static str {
            "create_activity"
        }

        async fn execute(
            &self,
            config: &ActionConfig,
            _ctx: &RunContext,
        ) -> Result<Value, ActionError> {
            match config {
                ActionConfig::CreateActivity { message, .. } => Ok(json!({"echo": message})),
                _ => Err(ActionError::non_retryable("wrong config variant")),
            }
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(TriggerInfo::new(TriggerType::Manual), Uuid::now_v7())
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(EchoExecutor));

        assert!(registry.contains("create_activity"));
        assert!(!registry.contains("send_email"));

        let config = ActionConfig::CreateActivity {
            message: "hello".to_string(),
            entity_id: None,
        };
        let out = registry.execute(&config, &ctx()).await.unwrap();
        assert_eq!(out, json!({"echo": "hello"}));
    }

    #[tokio::test]
    async fn test_unknown_action_type() {
        let registry = ActionRegistry::new();
        let config = ActionConfig::AiSummarize {
            text: "long text".to_string(),
        };
        let err = registry.execute(&config, &ctx()).await.unwrap_err();
        assert_eq!(err.error_type.as_deref(), Some("UNKNOWN_ACTION_TYPE"));
        assert!(!err.retryable);
    }

    #[test]
    fn test_action_error_builders() {
        let err = ActionError::retryable("timeout").with_type("TIMEOUT");
        assert!(err.retryable);
        assert_eq!(err.error_type.as_deref(), Some("TIMEOUT"));
        assert_eq!(err.to_string(), "timeout");

        let err = ActionError::non_retryable("bad input").with_details(json!({"field": "to"}));
        assert!(!err.retryable);
        assert_eq!(err.details, Some(json!({"field": "to"})));
    }
}
