//! Context repository trait definition.
//!
//! Defines the storage interface for serialized workflow contexts. The
//! infrastructure layer (helmsman-infra) implements this trait with
//! SQLite persistence.

use helmsman_types::error::RepositoryError;
use helmsman_types::id::ScheduleId;

use crate::workflow::context::SerializedContext;

/// Repository trait for workflow context persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ContextRepository: Send + Sync {
    /// Upsert the serialized context for a schedule.
    fn save(
        &self,
        schedule_id: &ScheduleId,
        context: &SerializedContext,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load the serialized context for a schedule, if present.
    fn load(
        &self,
        schedule_id: &ScheduleId,
    ) -> impl std::future::Future<Output = Result<Option<SerializedContext>, RepositoryError>> + Send;

    /// Delete the context for a schedule. Returns `true` if it existed.
    fn remove(
        &self,
        schedule_id: &ScheduleId,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
