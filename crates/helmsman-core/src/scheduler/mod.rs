//! Event-driven scheduling: the single-process event dispatcher and the
//! workflow engine it delivers to.

pub mod dispatcher;
pub mod engine;

pub use dispatcher::{EventQueue, EventScheduler, ScheduleEventHandler};
pub use engine::{SchedulerError, WorkflowScheduler};
