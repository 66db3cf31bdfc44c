//! Postgres-backed `Queue`. Claims use `FOR UPDATE SKIP LOCKED` so two
//! workers pulling the same queue concurrently never claim the same row —
//! the standard Postgres job-queue pattern, reached for here instead of an
//! in-process `Mutex<HashMap<...>>` session registry because tasks must
//! survive a worker restart, not just serialize access within one
//! process.

use async_trait::async_trait;
use fame_core::{AnalysisId, FameError, FameResult};
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::queue::{Queue, Task, TaskHandle};
use crate::sqlx_err;

pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Queue for PgQueue {
    async fn publish(&self, queue_name: &str, task: Task) -> FameResult<()> {
        sqlx::query(
            "INSERT INTO queue_tasks (queue, analysis_id, module_name) VALUES ($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(task.analysis_id.to_string())
        .bind(&task.module_name)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn pull(&self, queue_name: &str, worker_id: &str) -> FameResult<Option<(TaskHandle, Task)>> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        let row = sqlx::query(
            "SELECT id, analysis_id, module_name FROM queue_tasks
             WHERE queue = $1 AND claimed_at IS NULL
             ORDER BY id ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1",
        )
        .bind(queue_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        let Some(row) = row else {
            tx.commit().await.map_err(sqlx_err)?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(sqlx_err)?;
        let analysis_id: String = row.try_get("analysis_id").map_err(sqlx_err)?;
        let module_name: String = row.try_get("module_name").map_err(sqlx_err)?;

        sqlx::query("UPDATE queue_tasks SET claimed_by = $1, claimed_at = now() WHERE id = $2")
            .bind(worker_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        tx.commit().await.map_err(sqlx_err)?;

        let task = Task {
            analysis_id: AnalysisId::from_str(&analysis_id)
                .map_err(|_| FameError::Store("malformed analysis_id in queue_tasks".into()))?,
            module_name,
        };
        Ok(Some((TaskHandle(id), task)))
    }

    async fn ack(&self, handle: TaskHandle) -> FameResult<()> {
        sqlx::query("UPDATE queue_tasks SET completed_at = now() WHERE id = $1 AND completed_at IS NULL")
            .bind(handle.0)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn depth(&self, queue_name: &str) -> FameResult<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_tasks WHERE queue = $1 AND claimed_at IS NULL",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(count as usize)
    }
}
