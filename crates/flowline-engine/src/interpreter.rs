//! Step interpretation
//!
//! Walks a run's step snapshot from its current cursor until the run
//! completes, fails, pauses on a delay, or is cancelled from outside.
//! Every step execution appends an audit record before the step runs and
//! finalizes it afterwards, so a crashed process leaves a visible
//! `running` record rather than silence.
//!
//! Context handling is immutable per step: each step receives the prior
//! context and produces a new one with its own output merged in, and only
//! that new context is persisted with the advanced cursor.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::error::EngineError;
use crate::persistence::WorkflowStore;
use flowline_core::{
    evaluate_condition, resolve_path, ActionConfig, ConditionStepConfig, LoopFrame,
    LoopStepConfig, RunContext, RunStatus, RunStepStatus, ScheduledStep, StepKind, WorkflowRun,
    WorkflowRunStep, WorkflowStep,
};

/// What a single step decided about the run's continuation
enum StepOutcome {
    /// Advance to the given step order with the given context
    Continue(i32, RunContext),
    /// The run paused on a delay; a wake-up record exists
    Paused,
    /// The step failed and the run must fail with this message
    Failed(String),
}

/// Executes a run's steps against the action registry and the store
pub struct StepInterpreter<S> {
    store: Arc<S>,
    registry: Arc<ActionRegistry>,
}

impl<S> Clone for StepInterpreter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: WorkflowStore> StepInterpreter<S> {
    pub fn new(store: Arc<S>, registry: Arc<ActionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Drive a run from its current cursor until it completes, fails,
    /// pauses, or is cancelled
    ///
    /// Returns the run's final persisted state. Run-internal failures
    /// (action errors, loop overflows, bad jumps) fail the run and return
    /// `Ok`; only infrastructure failures surface as `Err`.
    #[instrument(skip(self), fields(%run_id))]
    pub async fn run_to_completion(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        let run = self.store.get_run(run_id).await?;
        if run.status != RunStatus::Running {
            return Ok(run);
        }

        let mut steps = run.steps.clone();
        steps.sort_by_key(|s| s.step_order);
        let last_order = steps.last().map(|s| s.step_order).unwrap_or(0);

        let mut cursor = run.current_step;
        let mut context = run.context.clone();

        loop {
            // Observe outside cancellation between steps
            let fresh = self.store.get_run(run_id).await?;
            if fresh.status == RunStatus::Cancelled {
                debug!("run cancelled, stopping interpretation");
                return Ok(fresh);
            }

            let Some(step) = steps.iter().find(|s| s.step_order == cursor) else {
                // Past the last step
                self.store
                    .update_run_status(run_id, RunStatus::Completed, None)
                    .await?;
                info!("run completed");
                return self.store.get_run(run_id).await.map_err(Into::into);
            };

            let outcome = match &step.kind {
                StepKind::Loop(config) => {
                    self.execute_loop(run_id, step, config, &steps, context.clone(), last_order)
                        .await?
                }
                _ => self.execute_step(run_id, step, context.clone()).await?,
            };

            match outcome {
                StepOutcome::Continue(next, new_context) => {
                    self.store
                        .update_run_progress(run_id, next, &new_context)
                        .await?;
                    cursor = next;
                    context = new_context;
                }
                StepOutcome::Paused => {
                    return self.store.get_run(run_id).await.map_err(Into::into);
                }
                StepOutcome::Failed(message) => {
                    self.store
                        .update_run_status(run_id, RunStatus::Failed, Some(&message))
                        .await?;
                    warn!(%message, "run failed");
                    return self.store.get_run(run_id).await.map_err(Into::into);
                }
            }
        }
    }

    /// Execute one non-loop step and decide the continuation
    async fn execute_step(
        &self,
        run_id: Uuid,
        step: &WorkflowStep,
        context: RunContext,
    ) -> Result<StepOutcome, EngineError> {
        let audit = WorkflowRunStep::begin(run_id, step, context.to_value());
        let audit_id = audit.id;
        self.store.append_run_step(&audit).await?;

        match &step.kind {
            StepKind::Action(config) => {
                self.execute_action(run_id, step, config, context, audit_id)
                    .await
            }
            StepKind::Condition(config) => {
                self.execute_condition(step, config, context, audit_id)
                    .await
            }
            StepKind::Delay(config) => {
                let resume_step = step.step_order + 1;
                let execute_at = Utc::now() + config.duration();
                let scheduled =
                    ScheduledStep::new(run_id, resume_step, execute_at, context.clone());
                self.store.create_scheduled_step(&scheduled).await?;

                self.store
                    .update_run_progress(run_id, resume_step, &context)
                    .await?;
                self.store
                    .update_run_status(run_id, RunStatus::Paused, None)
                    .await?;
                self.finish(
                    audit_id,
                    RunStepStatus::Success,
                    Some(json!({"paused_until": execute_at.to_rfc3339()})),
                    None,
                )
                .await?;

                info!(step_order = step.step_order, %execute_at, "run paused on delay");
                Ok(StepOutcome::Paused)
            }
            StepKind::Loop(_) => {
                // Loops are handled by execute_loop before we get here
                let message = "loop step reached sequential execution".to_string();
                self.finish(audit_id, RunStepStatus::Failed, None, Some(&message))
                    .await?;
                Ok(StepOutcome::Failed(message))
            }
        }
    }

    async fn execute_action(
        &self,
        _run_id: Uuid,
        step: &WorkflowStep,
        config: &ActionConfig,
        context: RunContext,
        audit_id: Uuid,
    ) -> Result<StepOutcome, EngineError> {
        let context_doc = context.to_value();
        let raw = serde_json::to_value(config)?;
        let (resolved, unresolved) = flowline_core::render_value(&raw, &context_doc);
        if !unresolved.is_empty() {
            warn!(step_order = step.step_order, paths = ?unresolved, "unresolved template paths");
        }

        let resolved_config: ActionConfig = match serde_json::from_value(resolved) {
            Ok(config) => config,
            Err(e) => {
                let message = format!("rendered action config is invalid: {e}");
                self.finish(audit_id, RunStepStatus::Failed, None, Some(&message))
                    .await?;
                return Ok(StepOutcome::Failed(message));
            }
        };

        match self.registry.execute(&resolved_config, &context).await {
            Ok(output) => {
                let audit_output = if unresolved.is_empty() {
                    output.clone()
                } else {
                    json!({"result": output, "unresolved_paths": unresolved})
                };
                self.finish(audit_id, RunStepStatus::Success, Some(audit_output), None)
                    .await?;

                let next = context.with_step_output(step.step_order, output);
                Ok(StepOutcome::Continue(step.step_order + 1, next))
            }
            Err(err) => {
                let message = format!(
                    "action '{}' failed at step {}: {}",
                    resolved_config.action_type(),
                    step.step_order,
                    err
                );
                let details = serde_json::to_value(&err).ok();
                self.finish(audit_id, RunStepStatus::Failed, details, Some(&message))
                    .await?;
                Ok(StepOutcome::Failed(message))
            }
        }
    }

    async fn execute_condition(
        &self,
        step: &WorkflowStep,
        config: &ConditionStepConfig,
        context: RunContext,
        audit_id: Uuid,
    ) -> Result<StepOutcome, EngineError> {
        let context_doc = context.to_value();
        let result = evaluate_condition(
            &context_doc,
            &config.field,
            config.operator,
            config.value.as_ref(),
        );

        let next = if result {
            step.step_order + 1
        } else {
            config.else_goto_step.unwrap_or(step.step_order + 1)
        };

        // Forward-only jumps keep every run finite
        if next <= step.step_order {
            let message = format!(
                "condition at step {} jumps backwards to step {}",
                step.step_order, next
            );
            self.finish(audit_id, RunStepStatus::Failed, None, Some(&message))
                .await?;
            return Ok(StepOutcome::Failed(message));
        }

        self.finish(
            audit_id,
            RunStepStatus::Success,
            Some(json!({"condition_result": result, "next_step": next})),
            None,
        )
        .await?;

        let next_context = context.with_step_output(
            step.step_order,
            json!({"condition_result": result}),
        );
        Ok(StepOutcome::Continue(next, next_context))
    }

    /// Execute a loop step: the body is every trailing step, repeated once
    /// per collection item, each iteration under its own loop frame
    async fn execute_loop(
        &self,
        run_id: Uuid,
        step: &WorkflowStep,
        config: &LoopStepConfig,
        steps: &[WorkflowStep],
        context: RunContext,
        last_order: i32,
    ) -> Result<StepOutcome, EngineError> {
        let audit = WorkflowRunStep::begin(run_id, step, context.to_value());
        let audit_id = audit.id;
        self.store.append_run_step(&audit).await?;

        let context_doc = context.to_value();
        let items: Vec<serde_json::Value> =
            match resolve_path(&context_doc, &config.collection_field) {
                Some(serde_json::Value::Array(items)) => items.clone(),
                _ => {
                    warn!(
                        field = %config.collection_field,
                        "loop collection missing or not an array, iterating zero times"
                    );
                    Vec::new()
                }
            };

        let cap = config.cap() as usize;
        if items.len() > cap {
            let message = format!(
                "loop collection has {} items, exceeding the cap of {cap}",
                items.len()
            );
            self.finish(audit_id, RunStepStatus::Failed, None, Some(&message))
                .await?;
            return Ok(StepOutcome::Failed(message));
        }

        let body: Vec<&WorkflowStep> = steps
            .iter()
            .filter(|s| s.step_order > step.step_order)
            .collect();
        let total = items.len();

        for (index, item) in items.into_iter().enumerate() {
            // Observe outside cancellation between iterations
            let fresh = self.store.get_run(run_id).await?;
            if fresh.status == RunStatus::Cancelled {
                self.finish(
                    audit_id,
                    RunStepStatus::Skipped,
                    Some(json!({"iterations_completed": index})),
                    None,
                )
                .await?;
                return Ok(StepOutcome::Paused);
            }

            let frame = LoopFrame {
                index,
                item,
                collection_length: total,
            };
            let mut iteration_context = context.clone().with_loop(frame);

            let mut body_cursor = step.step_order + 1;
            while body_cursor <= last_order {
                let Some(body_step) = body.iter().find(|s| s.step_order == body_cursor) else {
                    break;
                };
                match self
                    .execute_body_step(run_id, body_step, iteration_context)
                    .await?
                {
                    StepOutcome::Continue(next, ctx) => {
                        body_cursor = next;
                        iteration_context = ctx;
                    }
                    StepOutcome::Failed(message) => {
                        let message = format!("loop iteration {index}: {message}");
                        self.finish(audit_id, RunStepStatus::Failed, None, Some(&message))
                            .await?;
                        return Ok(StepOutcome::Failed(message));
                    }
                    StepOutcome::Paused => {
                        // Unreachable when definitions were validated
                        let message =
                            format!("loop iteration {index} hit a delay step, which loops forbid");
                        self.finish(audit_id, RunStepStatus::Failed, None, Some(&message))
                            .await?;
                        return Ok(StepOutcome::Failed(message));
                    }
                }
            }
        }

        self.finish(
            audit_id,
            RunStepStatus::Success,
            Some(json!({"iterations": total})),
            None,
        )
        .await?;

        // The loop body is everything trailing, so the run is done
        let final_context = context.with_step_output(step.step_order, json!({"iterations": total}));
        Ok(StepOutcome::Continue(last_order + 1, final_context))
    }

    /// Execute one step inside a loop body; only actions and conditions
    /// are legal there
    async fn execute_body_step(
        &self,
        run_id: Uuid,
        step: &WorkflowStep,
        context: RunContext,
    ) -> Result<StepOutcome, EngineError> {
        match &step.kind {
            StepKind::Action(_) | StepKind::Condition(_) => {
                self.execute_step(run_id, step, context).await
            }
            StepKind::Delay(_) => Ok(StepOutcome::Failed(format!(
                "delay step {} inside a loop body",
                step.step_order
            ))),
            StepKind::Loop(_) => Ok(StepOutcome::Failed(format!(
                "nested loop step {} inside a loop body",
                step.step_order
            ))),
        }
    }

    async fn finish(
        &self,
        audit_id: Uuid,
        status: RunStepStatus,
        output: Option<serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), EngineError> {
        self.store
            .finish_run_step(audit_id, status, output, error_message)
            .await
            .map_err(Into::into)
    }
}
