//! End-to-end demo: a two-action workflow running against SQLite.
//!
//! Creates a scheduler with one registered workflow, enqueues a run, and
//! waits for it to reach terminal cleanup. Run with:
//!
//! ```sh
//! RUST_LOG=info cargo run -p helmsman-infra --example run_scheduler
//! ```

use std::sync::Arc;
use std::time::Duration;

use helmsman_core::repository::context::ContextRepository;
use helmsman_core::scheduler::dispatcher::EventScheduler;
use helmsman_core::scheduler::engine::WorkflowScheduler;
use helmsman_core::workflow::context::{ContextValue, SerializedContext, WorkflowContext};
use helmsman_core::workflow::definition::{Action, WorkflowBuilder};
use helmsman_core::workflow::runner::WorkflowRunner;
use helmsman_core::workflow::step::{Step, StepError};
use helmsman_infra::config::load_scheduler_config;
use helmsman_infra::sqlite::{DatabasePool, SqliteContextRepository, SqliteLeaseRepository};
use helmsman_types::id::WorkerId;

struct ProvisionVolume;

impl Step for ProvisionVolume {
    fn name(&self) -> &str {
        "provision_volume"
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
        let service = ctx
            .get::<String>("service_name")
            .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
        tracing::info!(service, "provisioning volume");
        ctx.set("volume_id", format!("vol-{service}"))
            .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
        Ok(())
    }

    async fn revert(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
        if let Ok(volume_id) = ctx.get::<String>("volume_id") {
            tracing::info!(volume_id, "releasing volume");
        }
        Ok(())
    }

    fn has_revert(&self) -> bool {
        true
    }
}

struct AwaitRunning;

impl Step for AwaitRunning {
    fn name(&self) -> &str {
        "await_running"
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
        let volume_id = ctx
            .get::<String>("volume_id")
            .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
        tracing::info!(volume_id, "service is running");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    helmsman_observe::tracing_setup::init_tracing(false)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    let data_dir = tempfile::tempdir()?;
    let config = load_scheduler_config(data_dir.path()).await;
    let database_url = config.database_url.clone().unwrap_or_else(|| {
        format!(
            "sqlite://{}?mode=rwc",
            data_dir.path().join("helmsman.db").display()
        )
    });

    let pool = DatabasePool::new(&database_url).await?;
    let leases = Arc::new(SqliteLeaseRepository::new(pool.clone()));
    let contexts = Arc::new(SqliteContextRepository::new(pool));

    let workflow = WorkflowBuilder::new("start_service")
        .action(
            Action::new("create")
                .step(ProvisionVolume)
                .next_action("monitor"),
        )
        .action(Action::new("monitor").step(AwaitRunning))
        .build()?;

    let (scheduler, queue) = EventScheduler::new();
    let runner = WorkflowRunner::new(
        Arc::clone(&leases),
        Arc::clone(&contexts),
        WorkerId::for_current_process(),
        config.lease_duration(),
    );
    let engine = Arc::new(WorkflowScheduler::new(
        vec![workflow],
        runner,
        leases,
        Arc::clone(&contexts),
        queue,
        config.retry_backoff(),
    )?);

    let cancel = scheduler.cancellation_token();
    let dispatcher = scheduler.spawn(Arc::clone(&engine));

    let mut seed = SerializedContext::new();
    seed.insert(
        "service_name".to_string(),
        ContextValue::Text("jupyter".to_string()),
    );
    let schedule_id = engine.enqueue_workflow("start_service", seed).await?;
    tracing::info!(schedule_id = %schedule_id, "run started");

    // Poll storage until the run's context is gone (terminal cleanup).
    loop {
        if contexts.load(&schedule_id).await?.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tracing::info!(schedule_id = %schedule_id, "run reached terminal cleanup");

    cancel.cancel();
    dispatcher.await?;
    helmsman_observe::tracing_setup::shutdown_tracing();
    Ok(())
}
