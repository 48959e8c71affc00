//! Engine-level error type

use uuid::Uuid;

use crate::persistence::StoreError;
use flowline_core::ValidationError;

/// Errors from engine operations
///
/// These are caller-facing failures (bad definitions, invalid invocations,
/// storage trouble). Failures *inside* a run never surface here: they end as
/// the run's `failed` status with an `error_message`, per the audit-trail
/// failure-reporting contract.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Workflow definition failed validation
    #[error("invalid workflow definition: {0}")]
    InvalidWorkflow(#[from] ValidationError),

    /// Workflow exists but is deactivated
    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
