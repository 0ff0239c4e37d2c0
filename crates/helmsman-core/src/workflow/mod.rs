//! Workflow model: typed context, step traits, action definitions, and the
//! continuation runner.

pub mod context;
pub mod definition;
pub mod runner;
pub mod step;

pub use context::{ContextError, ContextValue, SerializedContext, ValueScope, WorkflowContext};
pub use definition::{Action, Workflow, WorkflowBuilder, WorkflowError};
pub use runner::{RunOutcome, RunnerError, WorkflowRunner};
pub use step::{BoxStep, NoopHooks, RunnerHooks, Step, StepDirection, StepError};
