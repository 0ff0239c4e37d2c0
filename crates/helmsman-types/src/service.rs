use serde::{Deserialize, Serialize};

use std::fmt;

/// Observed lifecycle state of one component of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// The component does not exist.
    Absent,
    /// The component exists but is not yet serving.
    Starting,
    /// The component is up and serving.
    Running,
    /// The component exists and is broken.
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::Absent => "absent",
            ComponentState::Starting => "starting",
            ComponentState::Running => "running",
            ComponentState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A point-in-time observation of the three components that make up a
/// managed service: the sidecar that orchestrates it, the proxy that
/// exposes it, and the user services themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub sidecar: ComponentState,
    pub proxy: ComponentState,
    pub user_services: ComponentState,
}

impl ServiceSnapshot {
    pub fn new(
        sidecar: ComponentState,
        proxy: ComponentState,
        user_services: ComponentState,
    ) -> Self {
        Self {
            sidecar,
            proxy,
            user_services,
        }
    }
}

/// Aggregate service status as seen by the scheduler.
///
/// Derived from a `ServiceSnapshot` by the reconciler; workflow steps use
/// it to decide whether a start/stop workflow has reached its goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerServiceStatus {
    /// Nothing exists; the service is fully torn down.
    IsAbsent,
    /// Everything is up; the service is fully available.
    IsPresent,
    /// The service is on its way up.
    TransitionToPresent,
    /// The service is on its way down.
    TransitionToAbsent,
    /// At least one component is broken; operator attention required.
    InError,
}

impl fmt::Display for SchedulerServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerServiceStatus::IsAbsent => "is_absent",
            SchedulerServiceStatus::IsPresent => "is_present",
            SchedulerServiceStatus::TransitionToPresent => "transition_to_present",
            SchedulerServiceStatus::TransitionToAbsent => "transition_to_absent",
            SchedulerServiceStatus::InError => "in_error",
        };
        write!(f, "{s}")
    }
}
