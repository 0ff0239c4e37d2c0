//! The workflow engine: ties the registry of workflow definitions, the
//! continuation runner, and the event queue together.
//!
//! One engine instance handles every schedule event delivered by the
//! dispatcher: it rebuilds the run's context from storage, executes one
//! continuation, and decides whether to re-enqueue, back off, or clean up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use helmsman_types::error::RepositoryError;
use helmsman_types::id::ScheduleId;

use crate::repository::context::ContextRepository;
use crate::repository::lease::LeaseRepository;
use crate::workflow::context::{reserved, ContextError, SerializedContext, ValueScope, WorkflowContext};
use crate::workflow::definition::Workflow;
use crate::workflow::runner::{RunOutcome, RunnerError, WorkflowRunner};

use super::dispatcher::{EventQueue, ScheduleEventHandler};

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("duplicate workflow '{0}'")]
    DuplicateWorkflow(String),

    #[error("no context found for schedule '{0}'")]
    ScheduleNotFound(ScheduleId),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Event-driven workflow engine over an immutable set of definitions.
///
/// The workflow set is fixed at construction; there is no global
/// registration. Two engines may carry entirely different sets.
pub struct WorkflowScheduler<L, C> {
    workflows: HashMap<String, Workflow>,
    runner: WorkflowRunner<L, C>,
    leases: Arc<L>,
    contexts: Arc<C>,
    queue: EventQueue,
    retry_backoff: Duration,
}

impl<L: LeaseRepository, C: ContextRepository> WorkflowScheduler<L, C> {
    pub fn new(
        workflows: impl IntoIterator<Item = Workflow>,
        runner: WorkflowRunner<L, C>,
        leases: Arc<L>,
        contexts: Arc<C>,
        queue: EventQueue,
        retry_backoff: Duration,
    ) -> Result<Self, SchedulerError> {
        let mut map = HashMap::new();
        for workflow in workflows {
            let name = workflow.name().to_string();
            if map.insert(name.clone(), workflow).is_some() {
                return Err(SchedulerError::DuplicateWorkflow(name));
            }
        }
        Ok(Self {
            workflows: map,
            runner,
            leases,
            contexts,
            queue,
            retry_backoff,
        })
    }

    /// Start a new run of a registered workflow.
    ///
    /// Seeds the context with the caller's entries (reserved keys are
    /// rejected), persists it, and enqueues the first schedule event.
    pub async fn enqueue_workflow(
        &self,
        workflow_name: &str,
        seed: SerializedContext,
    ) -> Result<ScheduleId, SchedulerError> {
        let workflow = self
            .workflows
            .get(workflow_name)
            .ok_or_else(|| SchedulerError::UnknownWorkflow(workflow_name.to_string()))?;

        let mut ctx = WorkflowContext::new(workflow_name, workflow.entry_action());
        for (key, value) in seed {
            ctx.set_value(&key, value)?;
        }

        let schedule_id = ScheduleId::new();
        self.contexts
            .save(&schedule_id, &ctx.get_serialized_context())
            .await?;
        self.queue.enqueue_schedule_event(schedule_id);
        tracing::info!(
            schedule_id = %schedule_id,
            workflow = workflow_name,
            "workflow enqueued"
        );
        Ok(schedule_id)
    }

    /// Process one schedule event: rebuild the context, run a continuation,
    /// and act on the outcome.
    pub async fn on_schedule_event(&self, schedule_id: ScheduleId) -> Result<(), SchedulerError> {
        let serialized = self
            .contexts
            .load(&schedule_id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound(schedule_id))?;
        let mut ctx = WorkflowContext::import_from_serialized_context(serialized);

        let workflow_name = ctx.get::<String>(reserved::WORKFLOW_NAME)?;
        let workflow = self
            .workflows
            .get(&workflow_name)
            .ok_or(SchedulerError::UnknownWorkflow(workflow_name))?;

        match self
            .runner
            .run_continuation(workflow, schedule_id, &mut ctx)
            .await?
        {
            RunOutcome::Continue => self.queue.enqueue_schedule_event(schedule_id),
            RunOutcome::Suspended => self.queue.enqueue_after(self.retry_backoff, schedule_id),
            RunOutcome::Completed => self.finalize(schedule_id, &ctx, true).await?,
            RunOutcome::Failed => self.finalize(schedule_id, &ctx, false).await?,
        }
        Ok(())
    }

    /// The catch-all wrapper the dispatcher invokes.
    ///
    /// An event arriving after terminal cleanup is normal (delivery is
    /// at-least-once); it is logged at debug and swallowed. Anything else
    /// bubbles up for the dispatcher to log and drop.
    pub async fn safe_on_schedule_event(&self, schedule_id: ScheduleId) -> anyhow::Result<()> {
        match self.on_schedule_event(schedule_id).await {
            Ok(()) => Ok(()),
            Err(SchedulerError::ScheduleNotFound(id)) => {
                tracing::debug!(
                    schedule_id = %id,
                    "no context for schedule event, run already cleaned up"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ask a run to stop. Non-preemptive: the cancel marker is evaluated at
    /// the run's next continuation, which then compensates completed work.
    pub async fn request_cancellation(
        &self,
        schedule_id: ScheduleId,
    ) -> Result<(), SchedulerError> {
        let serialized = self
            .contexts
            .load(&schedule_id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound(schedule_id))?;
        let mut ctx = WorkflowContext::import_from_serialized_context(serialized);
        ctx.set_reserved(reserved::CANCEL_REQUESTED, true, ValueScope::Replicated);
        self.contexts
            .save(&schedule_id, &ctx.get_serialized_context())
            .await?;
        self.queue.enqueue_schedule_event(schedule_id);
        tracing::info!(schedule_id = %schedule_id, "cancellation requested");
        Ok(())
    }

    /// Terminal cleanup: drop the run's leases and context, keeping only
    /// the log line as a trace of the outcome.
    async fn finalize(
        &self,
        schedule_id: ScheduleId,
        ctx: &WorkflowContext,
        success: bool,
    ) -> Result<(), SchedulerError> {
        let leases_removed = self.leases.remove_schedule_leases(&schedule_id).await?;
        self.contexts.remove(&schedule_id).await?;
        if success {
            tracing::info!(
                schedule_id = %schedule_id,
                leases_removed,
                "run succeeded, state cleaned up"
            );
        } else {
            tracing::warn!(
                schedule_id = %schedule_id,
                leases_removed,
                error = %ctx.get::<String>(reserved::LAST_ERROR).unwrap_or_default(),
                "run failed, state cleaned up"
            );
        }
        Ok(())
    }
}

impl<L, C> std::fmt::Debug for WorkflowScheduler<L, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowScheduler")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl<L: LeaseRepository + 'static, C: ContextRepository + 'static> ScheduleEventHandler
    for WorkflowScheduler<L, C>
{
    fn handle_schedule_event(&self, schedule_id: ScheduleId) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self.safe_on_schedule_event(schedule_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{InMemoryContextRepository, InMemoryLeaseRepository};
    use crate::scheduler::dispatcher::EventScheduler;
    use crate::workflow::context::ContextValue;
    use crate::workflow::definition::{Action, WorkflowBuilder};
    use crate::workflow::step::{Step, StepError};
    use helmsman_types::id::{StepId, WorkerId};
    use std::sync::Mutex;

    type EventLog = Arc<Mutex<Vec<(String, &'static str)>>>;

    struct Probe {
        name: String,
        log: EventLog,
        fail: bool,
        delay: Duration,
    }

    impl Step for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.log.lock().unwrap().push((self.name.clone(), "executed"));
            // Prove seeded entries are visible to steps.
            if self.name == "use_seed" {
                ctx.get::<String>("service_name")
                    .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
            }
            if self.fail {
                Err(StepError::ExecutionFailed("boom".to_string()))
            } else {
                Ok(())
            }
        }

        async fn revert(&self, _ctx: &mut WorkflowContext) -> Result<(), StepError> {
            self.log.lock().unwrap().push((self.name.clone(), "reverted"));
            Ok(())
        }

        fn has_revert(&self) -> bool {
            true
        }
    }

    fn probe(name: &str, log: &EventLog, fail: bool) -> Probe {
        Probe {
            name: name.to_string(),
            log: Arc::clone(log),
            fail,
            delay: Duration::ZERO,
        }
    }

    fn slow_probe(name: &str, log: &EventLog, delay: Duration) -> Probe {
        Probe {
            delay,
            ..probe(name, log, false)
        }
    }

    struct Fixture {
        engine: Arc<WorkflowScheduler<InMemoryLeaseRepository, InMemoryContextRepository>>,
        leases: Arc<InMemoryLeaseRepository>,
        contexts: Arc<InMemoryContextRepository>,
        cancel: tokio_util::sync::CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn fixture(workflows: Vec<Workflow>) -> Fixture {
        let leases = Arc::new(InMemoryLeaseRepository::new());
        let contexts = Arc::new(InMemoryContextRepository::new());
        let (scheduler, queue) = EventScheduler::new();
        let runner = WorkflowRunner::new(
            Arc::clone(&leases),
            Arc::clone(&contexts),
            WorkerId::new("engine-worker"),
            Duration::from_secs(30),
        );
        let engine = Arc::new(
            WorkflowScheduler::new(
                workflows,
                runner,
                Arc::clone(&leases),
                Arc::clone(&contexts),
                queue,
                Duration::from_millis(10),
            )
            .unwrap(),
        );
        let cancel = scheduler.cancellation_token();
        let task = scheduler.spawn(Arc::clone(&engine));
        Fixture {
            engine,
            leases,
            contexts,
            cancel,
            task,
        }
    }

    async fn wait_until_cleaned(
        contexts: &InMemoryContextRepository,
        schedule_id: ScheduleId,
    ) {
        for _ in 0..400 {
            if contexts.load(&schedule_id).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run never reached terminal cleanup");
    }

    #[tokio::test]
    async fn end_to_end_success_cleans_up_state() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let workflow = WorkflowBuilder::new("start_service")
            .action(
                Action::new("create")
                    .step(probe("use_seed", &log, false))
                    .next_action("monitor"),
            )
            .action(Action::new("monitor").step(probe("await_running", &log, false)))
            .build()
            .unwrap();
        let f = fixture(vec![workflow]);

        let mut seed = SerializedContext::new();
        seed.insert(
            "service_name".to_string(),
            ContextValue::Text("jupyter".to_string()),
        );
        let schedule_id = f.engine.enqueue_workflow("start_service", seed).await.unwrap();

        wait_until_cleaned(&f.contexts, schedule_id).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("use_seed".to_string(), "executed"),
                ("await_running".to_string(), "executed"),
            ]
        );
        let lease = f
            .leases
            .get_lease(&StepId::new(schedule_id, "create", "use_seed"))
            .await
            .unwrap();
        assert!(lease.is_none(), "terminal cleanup should drop leases");

        f.cancel.cancel();
        f.task.await.unwrap();
    }

    #[tokio::test]
    async fn end_to_end_failure_reverts_then_cleans_up() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let workflow = WorkflowBuilder::new("wf")
            .action(
                Action::new("only")
                    .step(probe("a", &log, false))
                    .step(probe("b", &log, true)),
            )
            .build()
            .unwrap();
        let f = fixture(vec![workflow]);

        let schedule_id = f
            .engine
            .enqueue_workflow("wf", SerializedContext::new())
            .await
            .unwrap();
        wait_until_cleaned(&f.contexts, schedule_id).await;

        // "b" failed before completing, so only "a" is compensated.
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("a".to_string(), "executed"),
                ("b".to_string(), "executed"),
                ("a".to_string(), "reverted"),
            ]
        );

        f.cancel.cancel();
        f.task.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_unknown_workflow_is_rejected() {
        let f = fixture(vec![]);
        let err = f
            .engine
            .enqueue_workflow("ghost", SerializedContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownWorkflow(_)));

        f.cancel.cancel();
        f.task.await.unwrap();
    }

    #[tokio::test]
    async fn seeding_reserved_keys_is_rejected() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let workflow = WorkflowBuilder::new("wf")
            .action(Action::new("only").step(probe("s", &log, false)))
            .build()
            .unwrap();
        let f = fixture(vec![workflow]);

        let mut seed = SerializedContext::new();
        seed.insert(
            reserved::ACTION_NAME.to_string(),
            ContextValue::Text("hijack".to_string()),
        );
        let err = f.engine.enqueue_workflow("wf", seed).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Context(ContextError::NotAllowedContextKey(_))
        ));

        f.cancel.cancel();
        f.task.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_workflow_names_are_rejected_at_construction() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let build = |_: usize| {
            WorkflowBuilder::new("same")
                .action(Action::new("only").step(probe("s", &log, false)))
                .build()
                .unwrap()
        };
        let leases = Arc::new(InMemoryLeaseRepository::new());
        let contexts = Arc::new(InMemoryContextRepository::new());
        let (_scheduler, queue) = EventScheduler::new();
        let runner = WorkflowRunner::new(
            Arc::clone(&leases),
            Arc::clone(&contexts),
            WorkerId::new("w"),
            Duration::from_secs(30),
        );
        let err = WorkflowScheduler::new(
            vec![build(0), build(1)],
            runner,
            leases,
            contexts,
            queue,
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateWorkflow(_)));
    }

    #[tokio::test]
    async fn event_after_cleanup_is_swallowed() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let workflow = WorkflowBuilder::new("wf")
            .action(Action::new("only").step(probe("s", &log, false)))
            .build()
            .unwrap();
        let f = fixture(vec![workflow]);

        let schedule_id = f
            .engine
            .enqueue_workflow("wf", SerializedContext::new())
            .await
            .unwrap();
        wait_until_cleaned(&f.contexts, schedule_id).await;

        // Duplicate delivery after terminal cleanup is not an error.
        f.engine.safe_on_schedule_event(schedule_id).await.unwrap();
        let err = f.engine.on_schedule_event(schedule_id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleNotFound(_)));

        f.cancel.cancel();
        f.task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_of_suspended_run_reverts_and_fails() {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let workflow = WorkflowBuilder::new("wf")
            .action(
                Action::new("only")
                    .step(slow_probe("a", &log, Duration::from_millis(100)))
                    .step(probe("blocked", &log, false)),
            )
            .build()
            .unwrap();
        let f = fixture(vec![workflow]);

        // Pin the second step's lease so the run suspends after "a". The
        // lease key embeds the schedule id, which is only known after
        // enqueueing; the slow first step leaves time to take it.
        let schedule_id = f
            .engine
            .enqueue_workflow("wf", SerializedContext::new())
            .await
            .unwrap();
        f.leases
            .acquire_or_extend_lease(
                &StepId::new(schedule_id, "only", "blocked"),
                &WorkerId::new("other"),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        // Wait out the slow step so the run is parked in suspend cycles,
        // then cancel.
        tokio::time::sleep(Duration::from_millis(200)).await;
        f.engine.request_cancellation(schedule_id).await.unwrap();

        wait_until_cleaned(&f.contexts, schedule_id).await;
        let events = log.lock().unwrap().clone();
        assert!(events.contains(&("a".to_string(), "reverted")));
        assert!(!events.contains(&("blocked".to_string(), "executed")));

        f.cancel.cancel();
        f.task.await.unwrap();
    }
}
