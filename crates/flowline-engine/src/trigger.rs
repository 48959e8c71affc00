//! Trigger matching
//!
//! Maps external stimuli (domain events, schedule ticks, manual
//! invocations, inbound webhooks) to the workflows that should start.
//! Matching only decides *whether* a workflow fires and builds its
//! initial context; starting the run is the scheduler's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::persistence::WorkflowStore;
use crate::schedule;
use flowline_core::{
    resolve_path, EntityKind, EventType, RunContext, TriggerConfig, TriggerInfo, TriggerType,
    Workflow,
};

/// A domain event offered to event triggers
#[derive(Debug, Clone)]
pub struct EventStimulus {
    pub organization_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub event_type: EventType,
    /// Snapshot of the entity after the event
    pub entity: serde_json::Value,
    pub user_id: Option<Uuid>,
}

/// An inbound webhook delivery addressed to one workflow
#[derive(Debug, Clone)]
pub struct WebhookStimulus {
    pub workflow_id: Uuid,
    /// Raw request body, used for signature verification
    pub body: Vec<u8>,
    /// Parsed request body, becomes the trigger payload
    pub payload: serde_json::Value,
    /// Value of the signature header, if the caller sent one
    pub signature: Option<String>,
    pub source_ip: Option<String>,
}

/// A workflow that should start, with its initial run context
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub workflow: Workflow,
    pub context: RunContext,
}

/// Matches stimuli against active workflow triggers
///
/// Holds a process-local record of fired schedule occurrences so one
/// workflow fires at most once per scheduled minute even when ticks
/// arrive more than once within it.
pub struct TriggerMatcher<S> {
    store: Arc<S>,
    /// (workflow id, minute-truncated occurrence) already fired
    fired_occurrences: DashMap<(Uuid, i64), ()>,
}

impl<S: WorkflowStore> TriggerMatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            fired_occurrences: DashMap::new(),
        }
    }

    /// Workflows whose event trigger matches the stimulus
    ///
    /// A workflow matches when the event kind is among its subscribed
    /// `event_types`, its entity restriction (if any) matches, and every
    /// configured filter equals the corresponding field of the entity
    /// snapshot. A filter naming a missing field never matches.
    #[instrument(skip(self, stimulus), fields(entity_type = %stimulus.entity_type, event_type = ?stimulus.event_type))]
    pub async fn match_event(
        &self,
        stimulus: &EventStimulus,
    ) -> Result<Vec<TriggerMatch>, EngineError> {
        let workflows = self
            .store
            .list_active_workflows_for_org(stimulus.organization_id, TriggerType::Event)
            .await?;

        let mut matches = Vec::new();
        for workflow in workflows {
            let TriggerConfig::Event {
                event_types,
                entity_type,
                filters,
            } = &workflow.trigger
            else {
                continue;
            };

            if !event_types.contains(&stimulus.event_type) {
                continue;
            }
            if entity_type.is_some_and(|t| t != stimulus.entity_type) {
                continue;
            }
            let filters_pass = filters.iter().all(|(field, expected)| {
                resolve_path(&stimulus.entity, field) == Some(expected)
            });
            if !filters_pass {
                continue;
            }

            let trigger = TriggerInfo {
                trigger_type: TriggerType::Event,
                event_type: Some(stimulus.event_type),
                entity_type: Some(stimulus.entity_type),
                entity_id: Some(stimulus.entity_id.clone()),
                payload: stimulus.entity.clone(),
            };
            let mut context = RunContext::new(trigger, stimulus.organization_id)
                .with_entity(stimulus.entity_type, stimulus.entity.clone());
            if let Some(user_id) = stimulus.user_id {
                context = context.with_user(user_id);
            }

            debug!(workflow_id = %workflow.id, "event trigger matched");
            matches.push(TriggerMatch { workflow, context });
        }
        Ok(matches)
    }

    /// Workflows whose schedule is due at the minute containing `tick`
    ///
    /// Each (workflow, minute) occurrence fires at most once per process.
    /// A workflow with an unparseable schedule is skipped with a warning
    /// so it cannot block the rest.
    #[instrument(skip(self))]
    pub async fn match_schedule(
        &self,
        tick: DateTime<Utc>,
    ) -> Result<Vec<TriggerMatch>, EngineError> {
        let workflows = self
            .store
            .list_active_workflows(TriggerType::Schedule)
            .await?;
        let occurrence = tick.timestamp().div_euclid(60);

        let mut matches = Vec::new();
        for workflow in workflows {
            let TriggerConfig::Schedule {
                frequency,
                timezone,
            } = &workflow.trigger
            else {
                continue;
            };

            let due = match schedule::is_due(frequency, timezone, tick) {
                Ok(due) => due,
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "skipping workflow with invalid schedule");
                    continue;
                }
            };
            if !due {
                continue;
            }
            if self
                .fired_occurrences
                .insert((workflow.id, occurrence), ())
                .is_some()
            {
                continue;
            }

            let trigger = TriggerInfo::new(TriggerType::Schedule)
                .with_payload(serde_json::json!({ "tick": tick.to_rfc3339() }));
            let context = RunContext::new(trigger, workflow.organization_id);

            debug!(workflow_id = %workflow.id, %tick, "schedule trigger fired");
            matches.push(TriggerMatch { workflow, context });
        }
        Ok(matches)
    }

    /// Explicit invocation of one workflow
    ///
    /// Works for any trigger type, but refuses inactive workflows.
    #[instrument(skip(self, payload))]
    pub async fn match_manual(
        &self,
        workflow_id: Uuid,
        payload: serde_json::Value,
        user_id: Option<Uuid>,
    ) -> Result<TriggerMatch, EngineError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }

        let trigger = TriggerInfo::new(TriggerType::Manual).with_payload(payload);
        let mut context = RunContext::new(trigger, workflow.organization_id);
        if let Some(user_id) = user_id {
            context = context.with_user(user_id);
        }
        Ok(TriggerMatch { workflow, context })
    }

    /// An inbound webhook delivery
    ///
    /// Returns `Ok(None)` for quiet rejections: the workflow is inactive,
    /// is not webhook-triggered, the signature fails to verify, or the
    /// caller IP is not on the allow-list. Callers should answer such
    /// deliveries without revealing which check failed.
    #[instrument(skip(self, stimulus), fields(workflow_id = %stimulus.workflow_id))]
    pub async fn match_webhook(
        &self,
        stimulus: &WebhookStimulus,
    ) -> Result<Option<TriggerMatch>, EngineError> {
        let workflow = self.store.get_workflow(stimulus.workflow_id).await?;

        let TriggerConfig::Webhook {
            secret,
            allowed_ips,
        } = &workflow.trigger
        else {
            warn!("webhook delivery to non-webhook workflow rejected");
            return Ok(None);
        };
        if !workflow.is_active {
            warn!("webhook delivery to inactive workflow rejected");
            return Ok(None);
        }

        if !allowed_ips.is_empty() {
            let allowed = stimulus
                .source_ip
                .as_deref()
                .is_some_and(|ip| allowed_ips.iter().any(|a| a == ip));
            if !allowed {
                warn!(source_ip = ?stimulus.source_ip, "webhook source ip not allowed");
                return Ok(None);
            }
        }

        if let Some(secret) = secret {
            let expected = webhook_signature(secret, &stimulus.body);
            let verified = stimulus
                .signature
                .as_deref()
                .is_some_and(|sig| sig.eq_ignore_ascii_case(&expected));
            if !verified {
                warn!("webhook signature verification failed");
                return Ok(None);
            }
        }

        let trigger = TriggerInfo::new(TriggerType::Webhook).with_payload(stimulus.payload.clone());
        let context = RunContext::new(trigger, workflow.organization_id);
        Ok(Some(TriggerMatch { workflow, context }))
    }
}

/// Hex-encoded SHA-256 over the shared secret concatenated with the raw body
pub fn webhook_signature(secret: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowStore;
    use chrono::TimeZone;
    use flowline_core::{ActionConfig, ScheduleFrequency, StepKind, WorkflowStep};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn step(workflow_id: Uuid) -> WorkflowStep {
        WorkflowStep::new(
            workflow_id,
            1,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "noted".to_string(),
                entity_id: None,
            }),
        )
    }

    async fn store_with(workflow: &Workflow) -> Arc<InMemoryWorkflowStore> {
        let store = Arc::new(InMemoryWorkflowStore::new());
        store
            .create_workflow(workflow, &[step(workflow.id)])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_event_matching_respects_filters() {
        let org = Uuid::now_v7();
        let workflow = Workflow::new(
            org,
            "on critical task",
            TriggerConfig::Event {
                event_types: vec![EventType::Created],
                entity_type: Some(EntityKind::Task),
                filters: BTreeMap::from([("priority".to_string(), json!("critical"))]),
            },
        );
        let matcher = TriggerMatcher::new(store_with(&workflow).await);

        let mut stimulus = EventStimulus {
            organization_id: org,
            entity_type: EntityKind::Task,
            entity_id: "t1".to_string(),
            event_type: EventType::Created,
            entity: json!({"priority": "critical", "title": "outage"}),
            user_id: None,
        };
        let matches = matcher.match_event(&stimulus).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(
            matches[0].context.task,
            Some(json!({"priority": "critical", "title": "outage"}))
        );

        stimulus.entity = json!({"priority": "low"});
        assert!(matcher.match_event(&stimulus).await.unwrap().is_empty());

        // Filter on a missing field never matches
        stimulus.entity = json!({"title": "no priority"});
        assert!(matcher.match_event(&stimulus).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_event_matching_scoped_to_org() {
        let workflow = Workflow::new(
            Uuid::now_v7(),
            "wf",
            TriggerConfig::Event {
                event_types: vec![EventType::Updated],
                entity_type: None,
                filters: BTreeMap::new(),
            },
        );
        let matcher = TriggerMatcher::new(store_with(&workflow).await);

        let stimulus = EventStimulus {
            organization_id: Uuid::now_v7(),
            entity_type: EntityKind::Contact,
            entity_id: "c1".to_string(),
            event_type: EventType::Updated,
            entity: json!({}),
            user_id: None,
        };
        assert!(matcher.match_event(&stimulus).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_fires_once_per_occurrence() {
        let workflow = Workflow::new(
            Uuid::now_v7(),
            "daily digest",
            TriggerConfig::Schedule {
                frequency: ScheduleFrequency::Daily {
                    time: "09:00".to_string(),
                },
                timezone: "UTC".to_string(),
            },
        );
        let matcher = TriggerMatcher::new(store_with(&workflow).await);

        let tick = Utc.with_ymd_and_hms(2026, 8, 25, 9, 0, 5).unwrap();
        assert_eq!(matcher.match_schedule(tick).await.unwrap().len(), 1);

        // Second tick in the same minute is deduplicated
        let later = Utc.with_ymd_and_hms(2026, 8, 25, 9, 0, 40).unwrap();
        assert!(matcher.match_schedule(later).await.unwrap().is_empty());

        let off_schedule = Utc.with_ymd_and_hms(2026, 8, 25, 9, 1, 0).unwrap();
        assert!(matcher.match_schedule(off_schedule).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_refuses_inactive() {
        let workflow = Workflow::new(Uuid::now_v7(), "wf", TriggerConfig::manual());
        let store = store_with(&workflow).await;
        store.set_workflow_active(workflow.id, false).await.unwrap();

        let matcher = TriggerMatcher::new(store);
        let err = matcher
            .match_manual(workflow.id, json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowInactive(_)));
    }

    #[tokio::test]
    async fn test_webhook_signature_verification() {
        let workflow = Workflow::new(
            Uuid::now_v7(),
            "hook",
            TriggerConfig::Webhook {
                secret: Some("s3cret".to_string()),
                allowed_ips: vec![],
            },
        );
        let matcher = TriggerMatcher::new(store_with(&workflow).await);

        let body = br#"{"ok":true}"#.to_vec();
        let mut stimulus = WebhookStimulus {
            workflow_id: workflow.id,
            body: body.clone(),
            payload: json!({"ok": true}),
            signature: Some(webhook_signature("s3cret", &body)),
            source_ip: None,
        };
        assert!(matcher.match_webhook(&stimulus).await.unwrap().is_some());

        stimulus.signature = Some("deadbeef".to_string());
        assert!(matcher.match_webhook(&stimulus).await.unwrap().is_none());

        stimulus.signature = None;
        assert!(matcher.match_webhook(&stimulus).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_ip_allowlist() {
        let workflow = Workflow::new(
            Uuid::now_v7(),
            "hook",
            TriggerConfig::Webhook {
                secret: None,
                allowed_ips: vec!["10.0.0.1".to_string()],
            },
        );
        let matcher = TriggerMatcher::new(store_with(&workflow).await);

        let mut stimulus = WebhookStimulus {
            workflow_id: workflow.id,
            body: vec![],
            payload: json!({}),
            signature: None,
            source_ip: Some("10.0.0.1".to_string()),
        };
        assert!(matcher.match_webhook(&stimulus).await.unwrap().is_some());

        stimulus.source_ip = Some("10.0.0.2".to_string());
        assert!(matcher.match_webhook(&stimulus).await.unwrap().is_none());
    }
}
