//! SQLite step lease repository implementation.
//!
//! Implements `LeaseRepository` from `helmsman-core` using sqlx with split
//! read/write pools. The whole acquire-or-extend decision is one
//! conditional upsert, so mutual exclusion holds under concurrent callers
//! without any application-side locking.
//!
//! Expiry is stored as unix epoch milliseconds (INTEGER) because the
//! upsert compares it inside SQL; the audit columns stay RFC3339 text.

use chrono::{DateTime, Utc};
use sqlx::Row;

use helmsman_core::repository::lease::LeaseRepository;
use helmsman_types::error::RepositoryError;
use helmsman_types::id::{ScheduleId, StepId, WorkerId};
use helmsman_types::lease::Lease;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `LeaseRepository`.
pub struct SqliteLeaseRepository {
    pool: DatabasePool,
}

impl SqliteLeaseRepository {
    /// Create a new lease repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct LeaseRow {
    step_key: String,
    owner: String,
    renew_count: i64,
    expires_at: i64,
}

impl LeaseRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            step_key: row.try_get("step_key")?,
            owner: row.try_get("owner")?,
            renew_count: row.try_get("renew_count")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn into_lease(self) -> Result<Lease, RepositoryError> {
        let expires_at = DateTime::<Utc>::from_timestamp_millis(self.expires_at)
            .ok_or_else(|| RepositoryError::Query(format!("invalid expiry: {}", self.expires_at)))?;
        let renew_count = u32::try_from(self.renew_count)
            .map_err(|e| RepositoryError::Query(format!("invalid renew_count: {e}")))?;

        Ok(Lease {
            step_key: self.step_key,
            owner: WorkerId::new(self.owner),
            renew_count,
            expires_at,
        })
    }
}

// ---------------------------------------------------------------------------
// LeaseRepository implementation
// ---------------------------------------------------------------------------

impl LeaseRepository for SqliteLeaseRepository {
    async fn acquire_or_extend_lease(
        &self,
        step_id: &StepId,
        worker: &WorkerId,
        duration: std::time::Duration,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let now_millis = now.timestamp_millis();
        let expires_millis = now_millis
            + i64::try_from(duration.as_millis())
                .map_err(|e| RepositoryError::Query(format!("lease duration overflow: {e}")))?;
        let now_str = now.to_rfc3339();

        // One conditional upsert carries the whole protocol:
        // - no row: insert, renew_count starts at 1
        // - row held by this worker: extend; the counter restarts at 1 if
        //   the previous lease had already expired (expired means absent)
        // - live row held by someone else: the WHERE clause rejects the
        //   update, zero rows are affected, and the caller backs off
        let result = sqlx::query(
            r#"INSERT INTO step_leases (step_key, owner, renew_count, expires_at, created_at, updated_at)
               VALUES (?, ?, 1, ?, ?, ?)
               ON CONFLICT (step_key) DO UPDATE SET
                   renew_count = CASE
                       WHEN step_leases.owner = excluded.owner AND step_leases.expires_at > ?
                           THEN step_leases.renew_count + 1
                       ELSE 1
                   END,
                   owner = excluded.owner,
                   expires_at = excluded.expires_at,
                   updated_at = excluded.updated_at
               WHERE step_leases.owner = excluded.owner OR step_leases.expires_at <= ?"#,
        )
        .bind(step_id.lease_key())
        .bind(worker.as_str())
        .bind(expires_millis)
        .bind(&now_str)
        .bind(&now_str)
        .bind(now_millis)
        .bind(now_millis)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_lease(&self, step_id: &StepId) -> Result<Option<Lease>, RepositoryError> {
        let row = sqlx::query(
            "SELECT step_key, owner, renew_count, expires_at FROM step_leases WHERE step_key = ?",
        )
        .bind(step_id.lease_key())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let lease = LeaseRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_lease()?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    async fn remove_schedule_leases(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM step_leases WHERE step_key LIKE ?")
            .bind(format!("{schedule_id}/%"))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
