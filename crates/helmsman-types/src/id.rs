use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Unique identifier for a scheduled workflow run, wrapping a UUID v7
/// (time-sortable).
///
/// Issued when a workflow is enqueued and referenced by every subsequent
/// schedule event until terminal cleanup removes the run's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    /// Create a new ScheduleId using UUID v7 (time-sortable, guaranteed ordering).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a ScheduleId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScheduleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identity of a runner process competing for step leases.
///
/// Two runners with the same WorkerId are treated as the same lease holder,
/// so the id must be unique per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Create a WorkerId from an arbitrary stable string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a WorkerId for the current process from hostname and pid,
    /// with a uuid suffix so restarted processes never collide with their
    /// previous incarnation's live leases.
    pub fn for_current_process() -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let pid = std::process::id();
        Self(format!("{host}-{pid}-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single step execution slot within a scheduled run.
///
/// Derived from the schedule, the action name, and the step name. Renders
/// as one stable key string (`<schedule>/<action>/<step>`) used to key
/// lease rows, so at most one worker at a time may run the step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId {
    pub schedule_id: ScheduleId,
    pub action_name: String,
    pub step_name: String,
}

impl StepId {
    pub fn new(
        schedule_id: ScheduleId,
        action_name: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self {
            schedule_id,
            action_name: action_name.into(),
            step_name: step_name.into(),
        }
    }

    /// The stable lease key for this step slot.
    pub fn lease_key(&self) -> String {
        format!("{}/{}/{}", self.schedule_id, self.action_name, self.step_name)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lease_key())
    }
}
