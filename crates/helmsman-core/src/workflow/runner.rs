//! Continuation runner: executes one slice of a scheduled workflow per
//! event, persisting progress after every step.
//!
//! The runner is re-entrant by construction. All position state (current
//! action, step index, executed-steps journal, revert flag) lives in the
//! replicated context, so any worker can pick up a run from storage after
//! a crash and reach the same decision. Step leases guarantee that at most
//! one worker executes a given step slot at a time.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use helmsman_types::error::RepositoryError;
use helmsman_types::id::{ScheduleId, StepId, WorkerId};

use crate::repository::context::ContextRepository;
use crate::repository::lease::LeaseRepository;

use super::context::{reserved, ContextError, ContextValue, ValueScope, WorkflowContext};
use super::definition::Workflow;
use super::step::{NoopHooks, RunnerHooks, StepDirection};

/// Value of the terminal marker after a run that finished its action chain.
pub const TERMINAL_SUCCESS: &str = "success";
/// Value of the terminal marker after a run that failed and was reverted.
pub const TERMINAL_FAILED: &str = "failed";

/// What a single continuation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Progress was made and more work remains; deliver another event.
    Continue,
    /// A step lease is held by another worker; retry after a backoff.
    Suspended,
    /// The run reached durable terminal success.
    Completed,
    /// The run reached durable terminal failure.
    Failed,
}

/// Errors a continuation can surface to the engine.
///
/// These are framework-level failures. Step failures never appear here:
/// they are converted into the revert phase and, eventually, a terminal
/// failure marker.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("persisted context references unknown action '{0}'")]
    UnknownAction(String),

    #[error("executed-steps journal is malformed: {0}")]
    MalformedJournal(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// One completed step, as recorded in the executed-steps journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    action: String,
    step: String,
}

/// Lease-gated, crash-safe executor for one workflow continuation.
pub struct WorkflowRunner<L, C> {
    leases: Arc<L>,
    contexts: Arc<C>,
    worker: WorkerId,
    lease_duration: Duration,
    hooks: Arc<dyn RunnerHooks>,
}

impl<L: LeaseRepository, C: ContextRepository> WorkflowRunner<L, C> {
    pub fn new(
        leases: Arc<L>,
        contexts: Arc<C>,
        worker: WorkerId,
        lease_duration: Duration,
    ) -> Self {
        Self {
            leases,
            contexts,
            worker,
            lease_duration,
            hooks: Arc::new(NoopHooks),
        }
    }

    /// Install observation hooks invoked around every step.
    pub fn with_hooks(mut self, hooks: Arc<dyn RunnerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Execute one continuation of the run described by `ctx`.
    ///
    /// Progress is persisted after every step, so callers may drop the
    /// context afterwards and rebuild it from storage for the next event.
    pub async fn run_continuation(
        &self,
        workflow: &Workflow,
        schedule_id: ScheduleId,
        ctx: &mut WorkflowContext,
    ) -> Result<RunOutcome, RunnerError> {
        // A terminal marker makes every later continuation idempotent.
        if let Ok(terminal) = ctx.get::<String>(reserved::TERMINAL) {
            return Ok(if terminal == TERMINAL_SUCCESS {
                RunOutcome::Completed
            } else {
                RunOutcome::Failed
            });
        }

        if ctx.get::<bool>(reserved::REVERTING).unwrap_or(false) {
            return self.run_revert(workflow, schedule_id, ctx).await;
        }

        // Cancellation is non-preemptive: it is observed here, between
        // continuations, and turns into an ordinary revert. Once the run
        // is already reverting the request is ignored.
        if ctx.get::<bool>(reserved::CANCEL_REQUESTED).unwrap_or(false) {
            let action_name = ctx.get::<String>(reserved::ACTION_NAME)?;
            tracing::info!(
                schedule_id = %schedule_id,
                action = %action_name,
                "cancellation requested, entering revert phase"
            );
            self.enter_revert_phase(ctx, &action_name, "cancelled by request");
            self.persist(schedule_id, ctx).await?;
            return Ok(RunOutcome::Continue);
        }

        self.run_forward(workflow, schedule_id, ctx).await
    }

    // -----------------------------------------------------------------------
    // Forward phase
    // -----------------------------------------------------------------------

    async fn run_forward(
        &self,
        workflow: &Workflow,
        schedule_id: ScheduleId,
        ctx: &mut WorkflowContext,
    ) -> Result<RunOutcome, RunnerError> {
        let action_name = ctx.get::<String>(reserved::ACTION_NAME)?;
        let action = workflow
            .action(&action_name)
            .ok_or_else(|| RunnerError::UnknownAction(action_name.clone()))?;
        let mut step_index = ctx.get::<i64>(reserved::STEP_INDEX)? as usize;
        let mut journal = self.read_journal(ctx)?;

        while step_index < action.steps().len() {
            let step = &action.steps()[step_index];
            let step_id = StepId::new(schedule_id, &action_name, step.name());

            if !self
                .leases
                .acquire_or_extend_lease(&step_id, &self.worker, self.lease_duration)
                .await?
            {
                // Nothing to persist: all completed work was saved after
                // its step, and writing here could clobber a cancellation
                // flagged between continuations.
                tracing::debug!(
                    schedule_id = %schedule_id,
                    step = %step_id,
                    "step lease held by another worker, suspending"
                );
                return Ok(RunOutcome::Suspended);
            }

            self.run_hook_before(schedule_id, &action_name, step.name(), StepDirection::Execute)
                .await;
            let result = step.execute(ctx).await;
            self.run_hook_after(schedule_id, &action_name, step.name(), StepDirection::Execute)
                .await;

            match result {
                Ok(()) => {
                    tracing::debug!(
                        schedule_id = %schedule_id,
                        action = %action_name,
                        step = %step.name(),
                        "step executed"
                    );
                    journal.push(JournalEntry {
                        action: action_name.clone(),
                        step: step.name().to_string(),
                    });
                    self.write_journal(ctx, &journal)?;
                    step_index += 1;
                    ctx.set_reserved(
                        reserved::STEP_INDEX,
                        step_index as i64,
                        ValueScope::Replicated,
                    );
                    self.persist(schedule_id, ctx).await?;
                }
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %schedule_id,
                        action = %action_name,
                        step = %step.name(),
                        error = %e,
                        "step failed, entering revert phase"
                    );
                    self.enter_revert_phase(ctx, &action_name, &e.to_string());
                    self.persist(schedule_id, ctx).await?;
                    return Ok(RunOutcome::Continue);
                }
            }
        }

        if let Some(next) = action.next_action_name() {
            tracing::debug!(
                schedule_id = %schedule_id,
                from = %action_name,
                to = %next,
                "action complete, transitioning"
            );
            ctx.set_reserved(
                reserved::ACTION_NAME,
                next.to_string(),
                ValueScope::Replicated,
            );
            ctx.set_reserved(reserved::STEP_INDEX, 0i64, ValueScope::Replicated);
            self.persist(schedule_id, ctx).await?;
            return Ok(RunOutcome::Continue);
        }

        tracing::info!(schedule_id = %schedule_id, action = %action_name, "run completed");
        ctx.set_reserved(
            reserved::TERMINAL,
            TERMINAL_SUCCESS.to_string(),
            ValueScope::Replicated,
        );
        self.persist(schedule_id, ctx).await?;
        Ok(RunOutcome::Completed)
    }

    // -----------------------------------------------------------------------
    // Revert phase
    // -----------------------------------------------------------------------

    /// Walk the executed-steps journal strictly last-in-first-out, undoing
    /// completed steps across the whole executed action chain.
    ///
    /// Steps without a revert counterpart are no-ops. A failing revert is
    /// recorded but never stops the walk: a wedged backward walk would pin
    /// the schedule forever.
    async fn run_revert(
        &self,
        workflow: &Workflow,
        schedule_id: ScheduleId,
        ctx: &mut WorkflowContext,
    ) -> Result<RunOutcome, RunnerError> {
        let mut journal = self.read_journal(ctx)?;

        while let Some(entry) = journal.last().cloned() {
            let action = workflow
                .action(&entry.action)
                .ok_or_else(|| RunnerError::UnknownAction(entry.action.clone()))?;

            match action.find_step(&entry.step) {
                Some(step) if step.has_revert() => {
                    let step_id = StepId::new(schedule_id, &entry.action, &entry.step);
                    if !self
                        .leases
                        .acquire_or_extend_lease(&step_id, &self.worker, self.lease_duration)
                        .await?
                    {
                        tracing::debug!(
                            schedule_id = %schedule_id,
                            step = %step_id,
                            "revert lease held by another worker, suspending"
                        );
                        return Ok(RunOutcome::Suspended);
                    }

                    self.run_hook_before(
                        schedule_id,
                        &entry.action,
                        &entry.step,
                        StepDirection::Revert,
                    )
                    .await;
                    let result = step.revert(ctx).await;
                    self.run_hook_after(
                        schedule_id,
                        &entry.action,
                        &entry.step,
                        StepDirection::Revert,
                    )
                    .await;

                    match result {
                        Ok(()) => {
                            tracing::debug!(
                                schedule_id = %schedule_id,
                                action = %entry.action,
                                step = %entry.step,
                                "step reverted"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                schedule_id = %schedule_id,
                                action = %entry.action,
                                step = %entry.step,
                                error = %e,
                                "revert failed, continuing backward walk"
                            );
                            ctx.set_reserved(
                                reserved::LAST_ERROR,
                                format!("revert of '{}/{}' failed: {e}", entry.action, entry.step),
                                ValueScope::Replicated,
                            );
                        }
                    }
                }
                Some(_) => {
                    tracing::debug!(
                        schedule_id = %schedule_id,
                        action = %entry.action,
                        step = %entry.step,
                        "step has no revert counterpart, skipping"
                    );
                }
                None => {
                    tracing::warn!(
                        schedule_id = %schedule_id,
                        action = %entry.action,
                        step = %entry.step,
                        "journaled step missing from workflow definition, skipping"
                    );
                }
            }

            journal.pop();
            self.write_journal(ctx, &journal)?;
            self.persist(schedule_id, ctx).await?;
        }

        // Backward walk exhausted: hand off to the error action, or finish.
        // A run hops at most once: an error action that fails itself
        // terminates instead of consulting its own on_error_action.
        let cancelled = ctx.get::<bool>(reserved::CANCEL_REQUESTED).unwrap_or(false);
        let prior_hop = ctx.get::<String>(reserved::ERROR_ACTION).ok();
        let on_error_action = ctx
            .get::<String>(reserved::FAILED_ACTION)
            .ok()
            .filter(|name| prior_hop.as_deref() != Some(name.as_str()))
            .and_then(|name| workflow.action(&name))
            .and_then(|action| action.on_error_action_name())
            .map(str::to_string);

        if let Some(target) = on_error_action.filter(|_| !cancelled) {
            tracing::info!(
                schedule_id = %schedule_id,
                to = %target,
                "revert complete, transitioning to error action"
            );
            ctx.clear_reserved(reserved::REVERTING);
            ctx.clear_reserved(reserved::FAILED_ACTION);
            ctx.clear_reserved(reserved::EXECUTED_STEPS);
            ctx.set_reserved(reserved::ERROR_ACTION, target.clone(), ValueScope::Replicated);
            ctx.set_reserved(reserved::ACTION_NAME, target, ValueScope::Replicated);
            ctx.set_reserved(reserved::STEP_INDEX, 0i64, ValueScope::Replicated);
            self.persist(schedule_id, ctx).await?;
            return Ok(RunOutcome::Continue);
        }

        tracing::info!(
            schedule_id = %schedule_id,
            error = %ctx.get::<String>(reserved::LAST_ERROR).unwrap_or_default(),
            "revert complete, run failed"
        );
        ctx.set_reserved(
            reserved::TERMINAL,
            TERMINAL_FAILED.to_string(),
            ValueScope::Replicated,
        );
        self.persist(schedule_id, ctx).await?;
        Ok(RunOutcome::Failed)
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    fn enter_revert_phase(&self, ctx: &mut WorkflowContext, action_name: &str, error: &str) {
        ctx.set_reserved(
            reserved::LAST_ERROR,
            error.to_string(),
            ValueScope::Replicated,
        );
        ctx.set_reserved(
            reserved::FAILED_ACTION,
            action_name.to_string(),
            ValueScope::Replicated,
        );
        ctx.set_reserved(reserved::REVERTING, true, ValueScope::Replicated);
    }

    fn read_journal(&self, ctx: &WorkflowContext) -> Result<Vec<JournalEntry>, RunnerError> {
        match ctx.get::<serde_json::Value>(reserved::EXECUTED_STEPS) {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| RunnerError::MalformedJournal(e.to_string())),
            Err(ContextError::NotInContext(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_journal(
        &self,
        ctx: &mut WorkflowContext,
        journal: &[JournalEntry],
    ) -> Result<(), RunnerError> {
        let value = serde_json::to_value(journal)
            .map_err(|e| RunnerError::MalformedJournal(e.to_string()))?;
        ctx.set_reserved(reserved::EXECUTED_STEPS, value, ValueScope::Replicated);
        Ok(())
    }

    async fn persist(
        &self,
        schedule_id: ScheduleId,
        ctx: &mut WorkflowContext,
    ) -> Result<(), RepositoryError> {
        // A cancellation request is a load-modify-save of the stored
        // document from another task. Re-read the marker before
        // overwriting so a request landing mid-continuation survives
        // this save and is observed at the next continuation.
        if !ctx.get::<bool>(reserved::CANCEL_REQUESTED).unwrap_or(false) {
            if let Some(stored) = self.contexts.load(&schedule_id).await? {
                if let Some(ContextValue::Boolean(true)) = stored.get(reserved::CANCEL_REQUESTED) {
                    ctx.set_reserved(reserved::CANCEL_REQUESTED, true, ValueScope::Replicated);
                }
            }
        }
        self.contexts
            .save(&schedule_id, &ctx.get_serialized_context())
            .await
    }

    async fn run_hook_before(
        &self,
        schedule_id: ScheduleId,
        action: &str,
        step: &str,
        direction: StepDirection,
    ) {
        if let Err(e) = self.hooks.before_step(schedule_id, action, step, direction).await {
            tracing::warn!(
                schedule_id = %schedule_id,
                action,
                step,
                direction = %direction,
                error = %e,
                "before_step hook failed, ignoring"
            );
        }
    }

    async fn run_hook_after(
        &self,
        schedule_id: ScheduleId,
        action: &str,
        step: &str,
        direction: StepDirection,
    ) {
        if let Err(e) = self.hooks.after_step(schedule_id, action, step, direction).await {
            tracing::warn!(
                schedule_id = %schedule_id,
                action,
                step,
                direction = %direction,
                error = %e,
                "after_step hook failed, ignoring"
            );
        }
    }
}
