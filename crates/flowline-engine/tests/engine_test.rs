//! End-to-end engine tests against the in-memory store
//!
//! Exercises the full path: stimulus -> trigger match -> run start ->
//! step interpretation -> collaborator side effects -> audit trail,
//! including delay round-trips and cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use flowline_engine::actions::ActionError;
use flowline_engine::collaborators::{
    ActivityLog, AiService, Collaborators, ContactService, EmailSender, Notifier,
    OpportunityService, ProjectService, SlackPoster, TagService, TaskService,
};
use flowline_engine::prelude::*;
use flowline_engine::trigger::webhook_signature;
use flowline_core::{
    ActionConfig, ConditionOperator, ConditionStepConfig, DelayStepConfig, DelayUnit, EntityKind,
    EventType, RunStepStatus, StepKind, WorkflowStep,
};

/// Records every collaborator call; optionally fails a named email recipient
#[derive(Default)]
struct StubServices {
    calls: Mutex<Vec<String>>,
    fail_email_to: Option<String>,
}

impl StubServices {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl EmailSender for StubServices {
    async fn send(
        &self,
        _organization_id: Uuid,
        to: &str,
        subject: &str,
        _body: &str,
    ) -> Result<Value, ActionError> {
        if self.fail_email_to.as_deref() == Some(to) {
            return Err(ActionError::non_retryable("mailbox rejected").with_type("SEND_FAILED"));
        }
        self.log(format!("email:{to}:{subject}"));
        Ok(json!({"sent": true, "to": to}))
    }
}

#[async_trait]
impl Notifier for StubServices {
    async fn notify(
        &self,
        _organization_id: Uuid,
        _user_id: Option<&str>,
        title: &str,
        _message: &str,
    ) -> Result<Value, ActionError> {
        self.log(format!("notify:{title}"));
        Ok(json!({"notified": true}))
    }
}

#[async_trait]
impl TaskService for StubServices {
    async fn create(&self, _organization_id: Uuid, task: Value) -> Result<Value, ActionError> {
        self.log(format!("task.create:{}", task["title"].as_str().unwrap_or("")));
        Ok(json!({"id": "task-1"}))
    }

    async fn update(
        &self,
        _organization_id: Uuid,
        task_id: &str,
        _fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError> {
        self.log(format!("task.update:{task_id}"));
        Ok(json!({"updated": true}))
    }
}

#[async_trait]
impl ContactService for StubServices {
    async fn create(&self, _organization_id: Uuid, contact: Value) -> Result<Value, ActionError> {
        self.log(format!(
            "contact.create:{}",
            contact["name"].as_str().unwrap_or("")
        ));
        Ok(json!({"id": "contact-1"}))
    }

    async fn update(
        &self,
        _organization_id: Uuid,
        contact_id: &str,
        _fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError> {
        self.log(format!("contact.update:{contact_id}"));
        Ok(json!({"updated": true}))
    }
}

#[async_trait]
impl OpportunityService for StubServices {
    async fn create(
        &self,
        _organization_id: Uuid,
        _opportunity: Value,
    ) -> Result<Value, ActionError> {
        self.log("opportunity.create".to_string());
        Ok(json!({"id": "opp-1"}))
    }

    async fn update(
        &self,
        _organization_id: Uuid,
        opportunity_id: &str,
        _fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError> {
        self.log(format!("opportunity.update:{opportunity_id}"));
        Ok(json!({"updated": true}))
    }
}

#[async_trait]
impl ProjectService for StubServices {
    async fn update(
        &self,
        _organization_id: Uuid,
        project_id: &str,
        _fields: &BTreeMap<String, Value>,
    ) -> Result<Value, ActionError> {
        self.log(format!("project.update:{project_id}"));
        Ok(json!({"updated": true}))
    }
}

#[async_trait]
impl TagService for StubServices {
    async fn add(
        &self,
        _organization_id: Uuid,
        _entity_type: &str,
        entity_id: &str,
        tag: &str,
    ) -> Result<Value, ActionError> {
        self.log(format!("tag.add:{entity_id}:{tag}"));
        Ok(json!({"tagged": true}))
    }

    async fn remove(
        &self,
        _organization_id: Uuid,
        _entity_type: &str,
        entity_id: &str,
        tag: &str,
    ) -> Result<Value, ActionError> {
        self.log(format!("tag.remove:{entity_id}:{tag}"));
        Ok(json!({"untagged": true}))
    }
}

#[async_trait]
impl AiService for StubServices {
    async fn generate(&self, _organization_id: Uuid, prompt: &str) -> Result<Value, ActionError> {
        self.log(format!("ai.generate:{prompt}"));
        Ok(json!({"text": format!("generated for: {prompt}")}))
    }

    async fn categorize(
        &self,
        _organization_id: Uuid,
        _text: &str,
        categories: &[String],
    ) -> Result<Value, ActionError> {
        Ok(json!({"category": categories.first().cloned().unwrap_or_default()}))
    }

    async fn summarize(&self, _organization_id: Uuid, _text: &str) -> Result<Value, ActionError> {
        Ok(json!({"summary": "short"}))
    }
}

#[async_trait]
impl ActivityLog for StubServices {
    async fn record(
        &self,
        _organization_id: Uuid,
        message: &str,
        _entity_id: Option<&str>,
    ) -> Result<Value, ActionError> {
        self.log(format!("activity:{message}"));
        Ok(json!({"recorded": message}))
    }
}

#[async_trait]
impl SlackPoster for StubServices {
    async fn post(
        &self,
        _organization_id: Uuid,
        channel: &str,
        _message: &str,
    ) -> Result<Value, ActionError> {
        self.log(format!("slack:{channel}"));
        Ok(json!({"posted": true}))
    }
}

fn collaborators(services: Arc<StubServices>) -> Collaborators {
    Collaborators {
        email: services.clone(),
        notifier: services.clone(),
        tasks: services.clone(),
        contacts: services.clone(),
        opportunities: services.clone(),
        projects: services.clone(),
        tags: services.clone(),
        ai: services.clone(),
        activity: services.clone(),
        slack: services,
    }
}

fn engine_with(
    services: Arc<StubServices>,
) -> Arc<WorkflowEngine<InMemoryWorkflowStore>> {
    let store = Arc::new(InMemoryWorkflowStore::new());
    Arc::new(WorkflowEngine::new(
        store,
        collaborators(services),
        EngineConfig::default(),
    ))
}

/// Escalation workflow: notify on critical tasks, always log an activity
///
/// 1. condition: task.priority equals "critical", else goto 3
/// 2. send_notification (the escalation)
/// 3. create_activity (always runs)
fn escalation_steps(workflow_id: Uuid) -> Vec<WorkflowStep> {
    vec![
        WorkflowStep::new(
            workflow_id,
            1,
            StepKind::Condition(ConditionStepConfig {
                field: "task.priority".to_string(),
                operator: ConditionOperator::Equals,
                value: Some(json!("critical")),
                else_goto_step: Some(3),
            }),
        ),
        WorkflowStep::new(
            workflow_id,
            2,
            StepKind::Action(ActionConfig::SendNotification {
                user_id: None,
                title: "Critical: {{task.title}}".to_string(),
                message: "Task {{task.title}} needs attention".to_string(),
            }),
        ),
        WorkflowStep::new(
            workflow_id,
            3,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "triaged {{task.title}}".to_string(),
                entity_id: None,
            }),
        ),
    ]
}

fn task_event(org: Uuid, task: Value) -> EventStimulus {
    EventStimulus {
        organization_id: org,
        entity_type: EntityKind::Task,
        entity_id: "t1".to_string(),
        event_type: EventType::Created,
        entity: task,
        user_id: None,
    }
}

#[tokio::test]
async fn test_escalation_branches_on_priority() {
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(
        org,
        "task escalation",
        TriggerConfig::Event {
            event_types: vec![EventType::Created],
            entity_type: Some(EntityKind::Task),
            filters: BTreeMap::new(),
        },
    );
    engine
        .create_workflow(&workflow, &escalation_steps(workflow.id))
        .await
        .unwrap();

    // Critical task: condition true, both actions run
    let runs = engine
        .dispatch_event(&task_event(org, json!({"priority": "critical", "title": "outage"})))
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(
        services.calls(),
        vec!["notify:Critical: outage", "activity:triaged outage"]
    );

    // Low-priority task: condition false, jumps over the notification
    let runs = engine
        .dispatch_event(&task_event(org, json!({"priority": "low", "title": "typo"})))
        .await
        .unwrap();
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(
        services.calls(),
        vec![
            "notify:Critical: outage",
            "activity:triaged outage",
            "activity:triaged typo"
        ]
    );
}

#[tokio::test]
async fn test_audit_trail_shows_branching() {
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services);

    let org = Uuid::now_v7();
    let workflow = Workflow::new(org, "escalation", TriggerConfig::manual());
    engine
        .create_workflow(&workflow, &escalation_steps(workflow.id))
        .await
        .unwrap();

    // Manual invocation has no task snapshot; the condition is false
    let run = engine
        .dispatch_manual(workflow.id, json!({}), None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let trail = engine.store().list_run_steps(run.id).await.unwrap();
    // Step 2 was never entered, so only steps 1 and 3 have records
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].step_order, 1);
    assert_eq!(
        trail[0].output,
        Some(json!({"condition_result": false, "next_step": 3}))
    );
    assert_eq!(trail[1].step_order, 3);
    assert_eq!(trail[1].status, RunStepStatus::Success);
}

#[tokio::test]
async fn test_delay_roundtrip_preserves_context() {
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(org, "follow up", TriggerConfig::manual());
    let steps = vec![
        WorkflowStep::new(
            workflow.id,
            1,
            StepKind::Action(ActionConfig::AiGenerate {
                prompt: "draft follow-up".to_string(),
            }),
        ),
        WorkflowStep::new(
            workflow.id,
            2,
            StepKind::Delay(DelayStepConfig {
                delay_value: 2,
                delay_type: DelayUnit::Days,
            }),
        ),
        WorkflowStep::new(
            workflow.id,
            3,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "sent: {{steps.1.text}}".to_string(),
                entity_id: None,
            }),
        ),
    ];
    engine.create_workflow(&workflow, &steps).await.unwrap();

    let run = engine
        .dispatch_manual(workflow.id, json!({}), None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Paused);
    assert_eq!(run.current_step, 3);

    // Two days later the poller resumes it; step 1's output is still visible
    let later = Utc::now() + chrono::Duration::days(2) + chrono::Duration::minutes(1);
    assert_eq!(engine.scheduler().resume_due(later).await.unwrap(), 1);

    let run = engine.store().get_run(run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        services.calls(),
        vec![
            "ai.generate:draft follow-up",
            "activity:sent: generated for: draft follow-up"
        ]
    );
}

#[tokio::test]
async fn test_action_failure_fails_run_with_audit() {
    let services = Arc::new(StubServices {
        fail_email_to: Some("broken@example.com".to_string()),
        ..Default::default()
    });
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(org, "mailer", TriggerConfig::manual());
    let steps = vec![
        WorkflowStep::new(
            workflow.id,
            1,
            StepKind::Action(ActionConfig::SendEmail {
                to: "broken@example.com".to_string(),
                subject: "hi".to_string(),
                body: "b".to_string(),
            }),
        ),
        WorkflowStep::new(
            workflow.id,
            2,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "never reached".to_string(),
                entity_id: None,
            }),
        ),
    ];
    engine.create_workflow(&workflow, &steps).await.unwrap();

    let run = engine
        .dispatch_manual(workflow.id, json!({}), None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let message = run.error_message.unwrap_or_default();
    assert!(message.contains("send_email"), "message: {message}");
    assert!(services.calls().is_empty());

    let trail = engine.store().list_run_steps(run.id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].status, RunStepStatus::Failed);
    assert!(trail[0].error_message.is_some());
}

#[tokio::test]
async fn test_cancel_paused_run_never_resumes() {
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(org, "delayed", TriggerConfig::manual());
    let steps = vec![
        WorkflowStep::new(
            workflow.id,
            1,
            StepKind::Delay(DelayStepConfig {
                delay_value: 1,
                delay_type: DelayUnit::Hours,
            }),
        ),
        WorkflowStep::new(
            workflow.id,
            2,
            StepKind::Action(ActionConfig::CreateActivity {
                message: "never".to_string(),
                entity_id: None,
            }),
        ),
    ];
    engine.create_workflow(&workflow, &steps).await.unwrap();

    let run = engine
        .dispatch_manual(workflow.id, json!({}), None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Paused);

    let cancelled = engine.scheduler().cancel_run(run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let later = Utc::now() + chrono::Duration::hours(2);
    assert_eq!(engine.scheduler().resume_due(later).await.unwrap(), 0);
    assert!(services.calls().is_empty());

    // Cancelling again stays a no-op
    let again = engine.scheduler().cancel_run(run.id).await.unwrap();
    assert_eq!(again.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_webhook_dispatch_with_signature() {
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(
        org,
        "inbound hook",
        TriggerConfig::Webhook {
            secret: Some("hook-secret".to_string()),
            allowed_ips: vec![],
        },
    );
    let steps = vec![WorkflowStep::new(
        workflow.id,
        1,
        StepKind::Action(ActionConfig::CreateActivity {
            message: "hook from {{trigger.payload.source}}".to_string(),
            entity_id: None,
        }),
    )];
    engine.create_workflow(&workflow, &steps).await.unwrap();

    let body = br#"{"source":"billing"}"#.to_vec();
    let run = engine
        .dispatch_webhook(&WebhookStimulus {
            workflow_id: workflow.id,
            body: body.clone(),
            payload: json!({"source": "billing"}),
            signature: Some(webhook_signature("hook-secret", &body)),
            source_ip: Some("203.0.113.9".to_string()),
        })
        .await
        .unwrap()
        .expect("signed delivery should start a run");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(services.calls(), vec!["activity:hook from billing"]);

    // Tampered body fails verification and is quietly dropped
    let rejected = engine
        .dispatch_webhook(&WebhookStimulus {
            workflow_id: workflow.id,
            body: br#"{"source":"evil"}"#.to_vec(),
            payload: json!({"source": "evil"}),
            signature: Some(webhook_signature("hook-secret", &body)),
            source_ip: None,
        })
        .await
        .unwrap();
    assert!(rejected.is_none());
}

#[tokio::test]
async fn test_loop_fans_out_over_collection() {
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(
        org,
        "notify overdue",
        TriggerConfig::Event {
            event_types: vec![EventType::Updated],
            entity_type: Some(EntityKind::Project),
            filters: BTreeMap::new(),
        },
    );
    let steps = vec![
        WorkflowStep::new(
            workflow.id,
            1,
            StepKind::Loop(flowline_core::LoopStepConfig {
                collection_field: "project.overdue_tasks".to_string(),
                max_iterations: None,
            }),
        ),
        WorkflowStep::new(
            workflow.id,
            2,
            StepKind::Action(ActionConfig::SendNotification {
                user_id: None,
                title: "Overdue: {{loop.item.title}}".to_string(),
                message: "{{loop.index}} of {{loop.collection_length}}".to_string(),
            }),
        ),
    ];
    engine.create_workflow(&workflow, &steps).await.unwrap();

    let runs = engine
        .dispatch_event(&EventStimulus {
            organization_id: org,
            entity_type: EntityKind::Project,
            entity_id: "p1".to_string(),
            event_type: EventType::Updated,
            entity: json!({"overdue_tasks": [{"title": "specs"}, {"title": "review"}]}),
            user_id: None,
        })
        .await
        .unwrap();
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(
        services.calls(),
        vec!["notify:Overdue: specs", "notify:Overdue: review"]
    );
}

#[tokio::test]
async fn test_trigger_payload_visible_in_context() {
    // trigger.payload templates work for manual runs too
    let services = Arc::new(StubServices::default());
    let engine = engine_with(services.clone());

    let org = Uuid::now_v7();
    let workflow = Workflow::new(org, "greeter", TriggerConfig::manual());
    let steps = vec![WorkflowStep::new(
        workflow.id,
        1,
        StepKind::Action(ActionConfig::CreateActivity {
            message: "hello {{trigger.payload.name}}".to_string(),
            entity_id: None,
        }),
    )];
    engine.create_workflow(&workflow, &steps).await.unwrap();

    let run = engine
        .dispatch_manual(workflow.id, json!({"name": "Ada"}), None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(services.calls(), vec!["activity:hello Ada"]);
}
