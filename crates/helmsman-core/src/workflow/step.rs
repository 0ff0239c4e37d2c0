//! Step trait and its object-safe dynamic dispatch wrapper.
//!
//! `Step` uses native async fn in traits (RPITIT), so it cannot be a trait
//! object directly. `BoxStep` follows the blanket-impl pattern:
//! 1. Define an object-safe `StepDyn` trait with boxed futures
//! 2. Blanket-impl `StepDyn` for all `T: Step`
//! 3. `BoxStep` wraps `Box<dyn StepDyn>` and delegates

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures_util::future::BoxFuture;
use thiserror::Error;

use helmsman_types::id::ScheduleId;

use super::context::WorkflowContext;

/// Errors surfaced by step execution or revert.
///
/// Step authors with domain-specific failures can bubble them through
/// `Other` via `anyhow`; the runner records the message and starts the
/// backward walk either way.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    #[error("step revert failed: {0}")]
    RevertFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Which side of a step the runner is invoking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Execute,
    Revert,
}

impl fmt::Display for StepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepDirection::Execute => write!(f, "execute"),
            StepDirection::Revert => write!(f, "revert"),
        }
    }
}

/// One unit of workflow work with an optional compensating revert.
///
/// Steps must be idempotent: delivery is at-least-once, and a crash between
/// a step completing and its progress being persisted re-runs the step.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Step: Send + Sync {
    /// Stable name, unique within the owning action.
    fn name(&self) -> &str;

    /// Perform the step's forward work against the shared context.
    fn execute(
        &self,
        ctx: &mut WorkflowContext,
    ) -> impl Future<Output = Result<(), StepError>> + Send;

    /// Undo the forward work. Default: no-op.
    ///
    /// Implementors overriding this should also override [`has_revert`].
    ///
    /// [`has_revert`]: Step::has_revert
    fn revert(
        &self,
        ctx: &mut WorkflowContext,
    ) -> impl Future<Output = Result<(), StepError>> + Send {
        let _ = ctx;
        std::future::ready(Ok(()))
    }

    /// Whether this step carries a real revert counterpart.
    fn has_revert(&self) -> bool {
        false
    }
}

/// Object-safe version of [`Step`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn StepDyn`).
/// A blanket implementation is provided for all types implementing `Step`.
pub trait StepDyn: Send + Sync {
    fn name(&self) -> &str;

    fn has_revert(&self) -> bool;

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;

    fn revert_boxed<'a>(
        &'a self,
        ctx: &'a mut WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;
}

/// Blanket implementation: any `Step` automatically implements `StepDyn`.
impl<T: Step> StepDyn for T {
    fn name(&self) -> &str {
        Step::name(self)
    }

    fn has_revert(&self) -> bool {
        Step::has_revert(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        ctx: &'a mut WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>> {
        Box::pin(self.execute(ctx))
    }

    fn revert_boxed<'a>(
        &'a self,
        ctx: &'a mut WorkflowContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>> {
        Box::pin(self.revert(ctx))
    }
}

/// Type-erased step, so an action can hold a heterogeneous step list.
///
/// Since `Step` uses RPITIT, it cannot be used as a trait object directly.
/// `BoxStep` provides equivalent methods that delegate to the inner
/// `StepDyn` trait object.
pub struct BoxStep {
    inner: Box<dyn StepDyn + Send + Sync>,
}

impl BoxStep {
    /// Wrap a concrete `Step` in a type-erased box.
    pub fn new<T: Step + 'static>(step: T) -> Self {
        Self {
            inner: Box::new(step),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn has_revert(&self) -> bool {
        self.inner.has_revert()
    }

    pub async fn execute(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
        self.inner.execute_boxed(ctx).await
    }

    pub async fn revert(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
        self.inner.revert_boxed(ctx).await
    }
}

impl fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxStep")
            .field("name", &self.name())
            .field("has_revert", &self.has_revert())
            .finish()
    }
}

/// Observation hooks invoked around every step execution and revert.
///
/// Hook failures are logged by the runner and never affect the run.
/// Already object-safe (boxed futures), so it is held as `Arc<dyn RunnerHooks>`.
pub trait RunnerHooks: Send + Sync {
    fn before_step<'a>(
        &'a self,
        schedule_id: ScheduleId,
        action_name: &'a str,
        step_name: &'a str,
        direction: StepDirection,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let _ = (schedule_id, action_name, step_name, direction);
        Box::pin(async { Ok(()) })
    }

    fn after_step<'a>(
        &'a self,
        schedule_id: ScheduleId,
        action_name: &'a str,
        step_name: &'a str,
        direction: StepDirection,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        let _ = (schedule_id, action_name, step_name, direction);
        Box::pin(async { Ok(()) })
    }
}

/// Hooks that do nothing. The default when no hooks are installed.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl RunnerHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Increment;

    impl Step for Increment {
        fn name(&self) -> &str {
            "increment"
        }

        async fn execute(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
            let current = ctx.get::<i64>("counter").unwrap_or(0);
            ctx.set("counter", current + 1)
                .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
            Ok(())
        }

        async fn revert(&self, ctx: &mut WorkflowContext) -> Result<(), StepError> {
            let current = ctx.get::<i64>("counter").unwrap_or(0);
            ctx.set("counter", current - 1)
                .map_err(|e| StepError::RevertFailed(e.to_string()))?;
            Ok(())
        }

        fn has_revert(&self) -> bool {
            true
        }
    }

    struct FireAndForget;

    impl Step for FireAndForget {
        fn name(&self) -> &str {
            "fire_and_forget"
        }

        async fn execute(&self, _ctx: &mut WorkflowContext) -> Result<(), StepError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn box_step_delegates_execute_and_revert() {
        let step = BoxStep::new(Increment);
        let mut ctx = WorkflowContext::new("wf", "a");

        step.execute(&mut ctx).await.unwrap();
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.get::<i64>("counter").unwrap(), 2);

        step.revert(&mut ctx).await.unwrap();
        assert_eq!(ctx.get::<i64>("counter").unwrap(), 1);
        assert!(step.has_revert());
        assert_eq!(step.name(), "increment");
    }

    #[tokio::test]
    async fn default_revert_is_noop() {
        let step = BoxStep::new(FireAndForget);
        let mut ctx = WorkflowContext::new("wf", "a");
        step.revert(&mut ctx).await.unwrap();
        assert!(!step.has_revert());
    }

    #[tokio::test]
    async fn noop_hooks_succeed() {
        let hooks = NoopHooks;
        let id = ScheduleId::new();
        hooks
            .before_step(id, "a", "s", StepDirection::Execute)
            .await
            .unwrap();
        hooks
            .after_step(id, "a", "s", StepDirection::Revert)
            .await
            .unwrap();
    }

    #[test]
    fn step_error_display() {
        let err = StepError::ExecutionFailed("volume missing".to_string());
        assert_eq!(err.to_string(), "step execution failed: volume missing");
        let err = StepError::Other(anyhow::anyhow!("backend offline"));
        assert_eq!(err.to_string(), "backend offline");
    }
}
