//! SQLite workflow context repository implementation.
//!
//! Implements `ContextRepository` from `helmsman-core` using sqlx with
//! split read/write pools. Each schedule's replicated context is stored
//! as one JSON text document and deserialized on read.

use chrono::Utc;
use sqlx::Row;

use helmsman_core::repository::context::ContextRepository;
use helmsman_core::workflow::context::SerializedContext;
use helmsman_types::error::RepositoryError;
use helmsman_types::id::ScheduleId;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ContextRepository`.
pub struct SqliteContextRepository {
    pool: DatabasePool,
}

impl SqliteContextRepository {
    /// Create a new context repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl ContextRepository for SqliteContextRepository {
    async fn save(
        &self,
        schedule_id: &ScheduleId,
        context: &SerializedContext,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let data = serde_json::to_string(context)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize context: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_contexts (schedule_id, data, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (schedule_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at"#,
        )
        .bind(schedule_id.to_string())
        .bind(&data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load(
        &self,
        schedule_id: &ScheduleId,
    ) -> Result<Option<SerializedContext>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM workflow_contexts WHERE schedule_id = ?")
            .bind(schedule_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let data: String = row
                    .try_get("data")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let context: SerializedContext = serde_json::from_str(&data)
                    .map_err(|e| RepositoryError::Query(format!("invalid context JSON: {e}")))?;
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, schedule_id: &ScheduleId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_contexts WHERE schedule_id = ?")
            .bind(schedule_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::workflow::context::WorkflowContext;

    async fn test_repo() -> SqliteContextRepository {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        std::mem::forget(dir);
        SqliteContextRepository::new(pool)
    }

    fn sample_context() -> SerializedContext {
        let mut ctx = WorkflowContext::new("start_service", "create");
        ctx.set("service_name", "jupyter".to_string()).unwrap();
        ctx.set("replica_count", 2i64).unwrap();
        ctx.set("manifest", serde_json::json!({"image": "jupyter/base"}))
            .unwrap();
        ctx.get_serialized_context()
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrips() {
        let repo = test_repo().await;
        let schedule = ScheduleId::new();
        let serialized = sample_context();

        repo.save(&schedule, &serialized).await.unwrap();
        let loaded = repo.load(&schedule).await.unwrap().unwrap();
        assert_eq!(loaded, serialized);

        // Typed reads survive the storage roundtrip.
        let restored = WorkflowContext::import_from_serialized_context(loaded);
        assert_eq!(restored.get::<String>("service_name").unwrap(), "jupyter");
        assert_eq!(restored.get::<i64>("replica_count").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let repo = test_repo().await;
        let schedule = ScheduleId::new();

        repo.save(&schedule, &sample_context()).await.unwrap();

        let mut ctx = WorkflowContext::import_from_serialized_context(sample_context());
        ctx.set("replica_count", 5i64).unwrap();
        let updated = ctx.get_serialized_context();
        repo.save(&schedule, &updated).await.unwrap();

        let loaded = repo.load(&schedule).await.unwrap().unwrap();
        assert_eq!(loaded, updated);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let repo = test_repo().await;
        assert!(repo.load(&ScheduleId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_reports_existence() {
        let repo = test_repo().await;
        let schedule = ScheduleId::new();

        repo.save(&schedule, &sample_context()).await.unwrap();
        assert!(repo.remove(&schedule).await.unwrap());
        assert!(repo.load(&schedule).await.unwrap().is_none());
        assert!(!repo.remove(&schedule).await.unwrap());
    }
}
