//! In-memory repository implementations.
//!
//! Back the engine in single-process deployments and tests where SQLite
//! durability is not needed. The lease map sits behind a single async
//! mutex so acquire-or-extend stays one atomic check-and-set.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use helmsman_types::error::RepositoryError;
use helmsman_types::id::{ScheduleId, StepId, WorkerId};
use helmsman_types::lease::Lease;

use crate::workflow::context::SerializedContext;

use super::context::ContextRepository;
use super::lease::LeaseRepository;

/// Lease store backed by a mutexed map.
#[derive(Debug, Default)]
pub struct InMemoryLeaseRepository {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLeaseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseRepository for InMemoryLeaseRepository {
    async fn acquire_or_extend_lease(
        &self,
        step_id: &StepId,
        worker: &WorkerId,
        duration: Duration,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(duration)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let key = step_id.lease_key();

        let mut leases = self.leases.lock().await;
        match leases.get_mut(&key) {
            Some(lease) if !lease.is_expired(now) => {
                if &lease.owner == worker {
                    lease.renew_count += 1;
                    lease.expires_at = now + ttl;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            // Absent or expired: take over with a fresh counter.
            _ => {
                leases.insert(
                    key.clone(),
                    Lease {
                        step_key: key,
                        owner: worker.clone(),
                        renew_count: 1,
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn get_lease(&self, step_id: &StepId) -> Result<Option<Lease>, RepositoryError> {
        let leases = self.leases.lock().await;
        Ok(leases.get(&step_id.lease_key()).cloned())
    }

    async fn remove_schedule_leases(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<u64, RepositoryError> {
        let prefix = format!("{schedule_id}/");
        let mut leases = self.leases.lock().await;
        let before = leases.len();
        leases.retain(|key, _| !key.starts_with(&prefix));
        Ok((before - leases.len()) as u64)
    }
}

/// Context store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryContextRepository {
    contexts: DashMap<ScheduleId, SerializedContext>,
}

impl InMemoryContextRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextRepository for InMemoryContextRepository {
    async fn save(
        &self,
        schedule_id: &ScheduleId,
        context: &SerializedContext,
    ) -> Result<(), RepositoryError> {
        self.contexts.insert(*schedule_id, context.clone());
        Ok(())
    }

    async fn load(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<Option<SerializedContext>, RepositoryError> {
        Ok(self.contexts.get(schedule_id).map(|entry| entry.clone()))
    }

    async fn remove(&self, schedule_id: &ScheduleId) -> Result<bool, RepositoryError> {
        Ok(self.contexts.remove(schedule_id).is_some())
    }
}
