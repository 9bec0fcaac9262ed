//! SQLite implementation of the `JobStore` trait.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use revenc_core::domain::{CpuQueue, Job, JobStatus, StatusMessageRef};
use revenc_core::ports::{JobStore, StoreError};

/// SQLite implementation of the `JobStore` trait.
///
/// One row per job; the frozen configuration lives in the `job_data`
/// JSON column. Status writes are compare-and-set at the SQL level
/// (`WHERE task_id = ? AND status = ?`) so a concurrent cancellation
/// always wins cleanly.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Create a new SQLite job store.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<Job, StoreError> {
        let status_str: String = row.get("status");
        let status = JobStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Storage(format!("unknown status in store: {status_str}")))?;

        let job_data_json: String = row.get("job_data");
        let job_data = serde_json::from_str(&job_data_json)
            .map_err(|e| StoreError::Storage(format!("corrupt job_data: {e}")))?;

        Ok(Job {
            task_id: row.get("task_id"),
            user_id: row.get("user_id"),
            filename: row.get("filename"),
            status,
            status_message: StatusMessageRef::new(
                row.get("status_chat_id"),
                row.get("status_message_id"),
            ),
            broker_message_id: row.get("broker_message_id"),
            job_data,
        })
    }

    async fn current_status(&self, task_id: &str) -> Result<Option<JobStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        match row {
            Some(r) => {
                let status_str: String = r.get("status");
                Ok(JobStatus::parse(&status_str))
            }
            None => Ok(None),
        }
    }
}

fn now_string() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        let job_data = serde_json::to_string(&job.job_data)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let now = now_string();

        sqlx::query(
            r"
            INSERT OR REPLACE INTO jobs
                (task_id, user_id, filename, status, status_chat_id,
                 status_message_id, broker_message_id, job_data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                COALESCE((SELECT created_at FROM jobs WHERE task_id = ?), ?), ?)
            ",
        )
        .bind(&job.task_id)
        .bind(job.user_id)
        .bind(&job.filename)
        .bind(job.status.as_str())
        .bind(job.status_message.chat_id)
        .bind(job.status_message.message_id)
        .bind(job.broker_message_id.as_deref())
        .bind(&job_data)
        .bind(&job.task_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get_job(&self, task_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_active_by_user(&self, user_id: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT * FROM jobs
            WHERE user_id = ? AND status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')
            ORDER BY created_at, task_id
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn update_status(
        &self,
        task_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError> {
        if !JobStatus::can_transition(from, to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let result = sqlx::query(
            "UPDATE jobs SET status = ?, updated_at = ? WHERE task_id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now_string())
        .bind(task_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.current_status(task_id).await? {
                None => Err(StoreError::NotFound(task_id.to_string())),
                Some(_) => Err(StoreError::CasRejected {
                    task_id: task_id.to_string(),
                    from,
                    to,
                }),
            };
        }

        Ok(())
    }

    async fn set_broker_message_id(
        &self,
        task_id: &str,
        broker_message_id: Option<String>,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE jobs SET broker_message_id = ?, updated_at = ? WHERE task_id = ?")
                .bind(broker_message_id)
                .bind(now_string())
                .bind(task_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn set_cpu_queue(&self, task_id: &str, queue: CpuQueue) -> Result<(), StoreError> {
        // job_data is a JSON document; patch the single key in place.
        let result = sqlx::query(
            r"
            UPDATE jobs
            SET job_data = json_set(job_data, '$.cpu_queue', ?), updated_at = ?
            WHERE task_id = ?
            ",
        )
        .bind(queue.as_str())
        .bind(now_string())
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn remove_job(&self, task_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM jobs WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn cleanup_terminal_jobs(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM jobs WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED')")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::create_schema;
    use revenc_core::domain::{JobData, MessageRef, Preset, Quality, UserSettings};

    async fn test_store() -> SqliteJobStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    fn sample_job(task_id: &str, user_id: i64) -> Job {
        Job {
            task_id: task_id.to_string(),
            user_id,
            filename: "Some.Show.S01E01.mkv".to_string(),
            status: JobStatus::Queued,
            status_message: StatusMessageRef::new(user_id, 900),
            broker_message_id: None,
            job_data: JobData {
                source_message_refs: vec![MessageRef::new(user_id, 1001)],
                quality: Quality::Q720,
                preset: Preset::Medium,
                final_filename: "Some.Show.S01E01.720p.10bit.WEBRip.2CH.x265-[B].mkv".to_string(),
                cpu_queue: CpuQueue::Default,
                thumbnail_ref: None,
                user_settings: UserSettings::default(),
            },
        }
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let store = test_store().await;
        let job = sample_job("task-1", 42);
        store.put_job(&job).await.unwrap();

        let fetched = store.get_job("task-1").await.unwrap().unwrap();
        assert_eq!(fetched.task_id, "task-1");
        assert_eq!(fetched.user_id, 42);
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.job_data.quality, Quality::Q720);
        assert_eq!(fetched.job_data.source_message_refs.len(), 1);

        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_accepts_allowed_transition() {
        let store = test_store().await;
        store.put_job(&sample_job("task-1", 42)).await.unwrap();

        store
            .update_status("task-1", JobStatus::Queued, JobStatus::Downloading)
            .await
            .unwrap();
        let job = store.get_job("task-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
    }

    #[tokio::test]
    async fn cas_rejects_when_status_moved() {
        let store = test_store().await;
        store.put_job(&sample_job("task-1", 42)).await.unwrap();

        // Cancellation wins the race
        store
            .update_status("task-1", JobStatus::Queued, JobStatus::Cancelled)
            .await
            .unwrap();

        let err = store
            .update_status("task-1", JobStatus::Queued, JobStatus::Downloading)
            .await
            .unwrap_err();
        assert!(err.is_cas_rejected(), "expected CasRejected, got {err:?}");
    }

    #[tokio::test]
    async fn disallowed_transition_is_rejected_up_front() {
        let store = test_store().await;
        store.put_job(&sample_job("task-1", 42)).await.unwrap();

        let err = store
            .update_status("task-1", JobStatus::Queued, JobStatus::Encoding)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn missing_job_reports_not_found() {
        let store = test_store().await;
        let err = store
            .update_status("ghost", JobStatus::Queued, JobStatus::Downloading)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn active_listing_excludes_terminal_jobs() {
        let store = test_store().await;
        store.put_job(&sample_job("active", 42)).await.unwrap();

        let mut done = sample_job("done", 42);
        done.status = JobStatus::Completed;
        store.put_job(&done).await.unwrap();

        let mut other_user = sample_job("other", 99);
        other_user.status = JobStatus::Encoding;
        store.put_job(&other_user).await.unwrap();

        let active = store.list_active_by_user(42).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, "active");
    }

    #[tokio::test]
    async fn broker_message_id_and_cpu_queue_updates() {
        let store = test_store().await;
        store.put_job(&sample_job("task-1", 42)).await.unwrap();

        store
            .set_broker_message_id("task-1", Some("msg-abc".to_string()))
            .await
            .unwrap();
        store
            .set_cpu_queue("task-1", CpuQueue::HighPriority)
            .await
            .unwrap();

        let job = store.get_job("task-1").await.unwrap().unwrap();
        assert_eq!(job.broker_message_id.as_deref(), Some("msg-abc"));
        assert_eq!(job.job_data.cpu_queue, CpuQueue::HighPriority);

        store.set_broker_message_id("task-1", None).await.unwrap();
        let job = store.get_job("task-1").await.unwrap().unwrap();
        assert_eq!(job.broker_message_id, None);
    }

    #[tokio::test]
    async fn cleanup_removes_only_terminal_jobs() {
        let store = test_store().await;
        store.put_job(&sample_job("active", 42)).await.unwrap();
        let mut failed = sample_job("failed", 42);
        failed.status = JobStatus::Failed;
        store.put_job(&failed).await.unwrap();

        let removed = store.cleanup_terminal_jobs().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_job("active").await.unwrap().is_some());
        assert!(store.get_job("failed").await.unwrap().is_none());
    }
}
