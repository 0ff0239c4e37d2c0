//! Lease repository trait definition.
//!
//! Defines the storage interface for step leases, the mutual exclusion
//! primitive of the engine. The infrastructure layer (helmsman-infra)
//! implements this trait with SQLite persistence.

use std::time::Duration;

use helmsman_types::error::RepositoryError;
use helmsman_types::id::{ScheduleId, StepId, WorkerId};
use helmsman_types::lease::Lease;

/// Repository trait for step lease persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait LeaseRepository: Send + Sync {
    /// Atomically acquire or extend the lease for a step slot.
    ///
    /// This MUST be a single atomic storage operation. Returns `true` when
    /// the calling worker holds the lease afterwards:
    /// - no lease, or an expired one: taken over with `renew_count = 1`
    /// - live lease held by `worker`: extended, `renew_count` incremented
    /// - live lease held by another worker: untouched, returns `false`
    fn acquire_or_extend_lease(
        &self,
        step_id: &StepId,
        worker: &WorkerId,
        duration: Duration,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Current lease row for a step slot, if any (expired rows included).
    fn get_lease(
        &self,
        step_id: &StepId,
    ) -> impl std::future::Future<Output = Result<Option<Lease>, RepositoryError>> + Send;

    /// Delete all lease rows belonging to a schedule. Returns the number
    /// removed. Called during terminal cleanup.
    fn remove_schedule_leases(
        &self,
        schedule_id: &ScheduleId,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
