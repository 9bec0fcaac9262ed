//! SQLite-backed implementation of the `QueueBroker` port.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use revenc_core::ports::{BrokerError, Delivery, QueueBroker, QueueName, TaskKind, TaskMessage};

/// Create the broker's message table and indexes.
pub async fn ensure_broker_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS broker_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id TEXT NOT NULL UNIQUE,
            queue TEXT NOT NULL,
            task_kind TEXT NOT NULL,
            task_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'queued',
            claimed_by TEXT,
            enqueued_at TEXT NOT NULL,
            claimed_at TEXT
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_broker_queue_state ON broker_messages(queue, state, seq)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_broker_task_id ON broker_messages(task_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// SQLite-backed queue broker.
///
/// FIFO within a queue comes from the autoincrement sequence; a
/// requeued message keeps its sequence number and therefore its
/// place ahead of everything enqueued after it. Strict priority
/// across queues is the claim order the caller passes in.
pub struct SqliteQueueBroker {
    pool: SqlitePool,
    terminations: Mutex<HashMap<String, CancellationToken>>,
}

impl SqliteQueueBroker {
    /// Create a broker over an existing pool.
    ///
    /// The caller is responsible for having run
    /// [`ensure_broker_schema`] on the pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            terminations: Mutex::new(HashMap::new()),
        }
    }

    /// Return every claimed message to its queue.
    ///
    /// Called once at startup: any claim held when the previous
    /// process died is redelivered (at-least-once).
    pub async fn recover_claims(&self) -> Result<u64, BrokerError> {
        let result = sqlx::query(
            "UPDATE broker_messages SET state = 'queued', claimed_by = NULL, claimed_at = NULL \
             WHERE state = 'claimed'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(e.to_string()))?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, "requeued claims from a previous run");
        }
        Ok(recovered)
    }

    /// Number of queued messages in a queue (diagnostics).
    pub async fn queued_len(&self, queue: QueueName) -> Result<u64, BrokerError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM broker_messages WHERE queue = ? AND state = 'queued'",
        )
        .bind(queue.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(e.to_string()))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(row.0 as u64)
    }

    fn map_delivery(row: &SqliteRow) -> Result<Delivery, BrokerError> {
        let queue_str: String = row.get("queue");
        let queue = QueueName::parse(&queue_str)
            .ok_or_else(|| BrokerError::Malformed(format!("unknown queue: {queue_str}")))?;

        let kind_str: String = row.get("task_kind");
        let kind = TaskKind::parse(&kind_str)
            .ok_or_else(|| BrokerError::Malformed(format!("unknown task kind: {kind_str}")))?;

        let payload_str: String = row.get("payload");
        let payload = serde_json::from_str(&payload_str)
            .map_err(|e| BrokerError::Malformed(e.to_string()))?;

        Ok(Delivery {
            broker_message_id: row.get("message_id"),
            queue,
            task: TaskMessage {
                kind,
                task_id: row.get("task_id"),
                payload,
            },
        })
    }
}

fn now_string() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[async_trait]
impl QueueBroker for SqliteQueueBroker {
    async fn enqueue(&self, queue: QueueName, task: TaskMessage) -> Result<String, BrokerError> {
        let message_id = Uuid::new_v4().to_string();
        let payload =
            serde_json::to_string(&task.payload).map_err(|e| BrokerError::Malformed(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO broker_messages
                (message_id, queue, task_kind, task_id, payload, state, enqueued_at)
            VALUES (?, ?, ?, ?, ?, 'queued', ?)
            ",
        )
        .bind(&message_id)
        .bind(queue.as_str())
        .bind(task.kind.as_str())
        .bind(&task.task_id)
        .bind(&payload)
        .bind(now_string())
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(e.to_string()))?;

        debug!(queue = %queue, task_id = %task.task_id, message_id = %message_id, "enqueued");
        Ok(message_id)
    }

    async fn claim(
        &self,
        queues: &[QueueName],
        worker_id: &str,
    ) -> Result<Option<Delivery>, BrokerError> {
        // Strict priority: drain each queue in the order given before
        // looking at the next one.
        for queue in queues {
            let row = sqlx::query(
                r"
                UPDATE broker_messages
                SET state = 'claimed', claimed_by = ?, claimed_at = ?
                WHERE seq = (
                    SELECT seq FROM broker_messages
                    WHERE queue = ? AND state = 'queued'
                    ORDER BY seq LIMIT 1
                ) AND state = 'queued'
                RETURNING message_id, queue, task_kind, task_id, payload
                ",
            )
            .bind(worker_id)
            .bind(now_string())
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BrokerError::Storage(e.to_string()))?;

            if let Some(row) = row {
                let delivery = Self::map_delivery(&row)?;
                debug!(
                    queue = %delivery.queue,
                    task_id = %delivery.task.task_id,
                    worker = %worker_id,
                    "claimed"
                );
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    async fn ack(&self, broker_message_id: &str) -> Result<(), BrokerError> {
        let result = sqlx::query("DELETE FROM broker_messages WHERE message_id = ?")
            .bind(broker_message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::NotFound(broker_message_id.to_string()));
        }
        Ok(())
    }

    async fn requeue(&self, broker_message_id: &str) -> Result<(), BrokerError> {
        let result = sqlx::query(
            "UPDATE broker_messages SET state = 'queued', claimed_by = NULL, claimed_at = NULL \
             WHERE message_id = ? AND state = 'claimed'",
        )
        .bind(broker_message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::NotFound(broker_message_id.to_string()));
        }
        Ok(())
    }

    async fn revoke(&self, task_id: &str, terminate: bool) -> Result<bool, BrokerError> {
        let result =
            sqlx::query("DELETE FROM broker_messages WHERE task_id = ? AND state = 'queued'")
                .bind(task_id)
                .execute(&self.pool)
                .await
                .map_err(|e| BrokerError::Storage(e.to_string()))?;
        let revoked_queued = result.rows_affected() > 0;

        let terminated = if terminate {
            let mut terminations = self.terminations.lock().expect("terminations poisoned");
            match terminations.get(task_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None if !revoked_queued => {
                    // The message is neither queued nor registered: a
                    // worker may be between claim and registration.
                    // Leave a pre-cancelled token so a late registrant
                    // observes the terminate immediately; the worker's
                    // release removes it.
                    let token = CancellationToken::new();
                    token.cancel();
                    terminations.insert(task_id.to_string(), token);
                    false
                }
                None => false,
            }
        } else {
            false
        };

        debug!(task_id, revoked_queued, terminated, "revoke");
        Ok(revoked_queued || terminated)
    }

    async fn take_queued(
        &self,
        broker_message_id: &str,
    ) -> Result<Option<TaskMessage>, BrokerError> {
        let row = sqlx::query(
            "DELETE FROM broker_messages WHERE message_id = ? AND state = 'queued' \
             RETURNING task_kind, task_id, payload",
        )
        .bind(broker_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind_str: String = row.get("task_kind");
        let kind = TaskKind::parse(&kind_str)
            .ok_or_else(|| BrokerError::Malformed(format!("unknown task kind: {kind_str}")))?;
        let payload_str: String = row.get("payload");
        let payload = serde_json::from_str(&payload_str)
            .map_err(|e| BrokerError::Malformed(e.to_string()))?;

        Ok(Some(TaskMessage {
            kind,
            task_id: row.get("task_id"),
            payload,
        }))
    }

    fn termination_token(&self, task_id: &str) -> CancellationToken {
        let mut terminations = self.terminations.lock().expect("terminations poisoned");
        terminations
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    fn release_termination_token(&self, task_id: &str) {
        let mut terminations = self.terminations.lock().expect("terminations poisoned");
        terminations.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_broker() -> SqliteQueueBroker {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        ensure_broker_schema(&pool).await.unwrap();
        SqliteQueueBroker::new(pool)
    }

    fn io_task(task_id: &str) -> TaskMessage {
        TaskMessage::new(TaskKind::Io, task_id)
    }

    #[tokio::test]
    async fn fifo_within_a_queue() {
        let broker = test_broker().await;
        broker.enqueue(QueueName::Io, io_task("a")).await.unwrap();
        broker.enqueue(QueueName::Io, io_task("b")).await.unwrap();
        broker.enqueue(QueueName::Io, io_task("c")).await.unwrap();

        let mut order = Vec::new();
        while let Some(delivery) = broker.claim(&[QueueName::Io], "w1").await.unwrap() {
            order.push(delivery.task.task_id.clone());
            broker.ack(&delivery.broker_message_id).await.unwrap();
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn high_priority_preempts_default_at_dispatch() {
        let broker = test_broker().await;
        broker
            .enqueue(QueueName::Default, TaskMessage::new(TaskKind::Encode, "old"))
            .await
            .unwrap();
        broker
            .enqueue(
                QueueName::HighPriority,
                TaskMessage::new(TaskKind::Encode, "urgent"),
            )
            .await
            .unwrap();

        let first = broker
            .claim(&[QueueName::HighPriority, QueueName::Default], "cpu1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.task.task_id, "urgent");
        assert_eq!(first.queue, QueueName::HighPriority);

        let second = broker
            .claim(&[QueueName::HighPriority, QueueName::Default], "cpu1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.task.task_id, "old");
    }

    #[tokio::test]
    async fn claim_returns_none_on_empty_queues() {
        let broker = test_broker().await;
        assert!(
            broker
                .claim(&[QueueName::HighPriority, QueueName::Default], "cpu1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn requeue_keeps_queue_position() {
        let broker = test_broker().await;
        broker.enqueue(QueueName::Io, io_task("first")).await.unwrap();
        broker.enqueue(QueueName::Io, io_task("second")).await.unwrap();

        let delivery = broker.claim(&[QueueName::Io], "w1").await.unwrap().unwrap();
        assert_eq!(delivery.task.task_id, "first");
        broker.requeue(&delivery.broker_message_id).await.unwrap();

        // The requeued message comes back before "second"
        let again = broker.claim(&[QueueName::Io], "w1").await.unwrap().unwrap();
        assert_eq!(again.task.task_id, "first");
    }

    #[tokio::test]
    async fn revoke_removes_queued_messages() {
        let broker = test_broker().await;
        broker.enqueue(QueueName::Default, io_task("t1")).await.unwrap();

        assert!(broker.revoke("t1", false).await.unwrap());
        assert!(broker.claim(&[QueueName::Default], "w").await.unwrap().is_none());

        // Second revoke finds nothing
        assert!(!broker.revoke("t1", false).await.unwrap());
    }

    #[tokio::test]
    async fn terminate_fires_registered_token() {
        let broker = test_broker().await;
        let token = broker.termination_token("running-task");
        assert!(!token.is_cancelled());

        assert!(broker.revoke("running-task", true).await.unwrap());
        assert!(token.is_cancelled());

        broker.release_termination_token("running-task");
    }

    #[tokio::test]
    async fn recovery_requeues_unacked_claims() {
        let broker = test_broker().await;
        broker.enqueue(QueueName::Io, io_task("crashed")).await.unwrap();

        // Claim but never ack - simulates a worker dying mid-stage
        let delivery = broker.claim(&[QueueName::Io], "w1").await.unwrap().unwrap();
        assert!(broker.claim(&[QueueName::Io], "w2").await.unwrap().is_none());

        let recovered = broker.recover_claims().await.unwrap();
        assert_eq!(recovered, 1);

        let redelivered = broker.claim(&[QueueName::Io], "w2").await.unwrap().unwrap();
        assert_eq!(redelivered.task.task_id, "crashed");
        assert_eq!(redelivered.broker_message_id, delivery.broker_message_id);
    }

    #[tokio::test]
    async fn take_queued_moves_a_message_between_queues() {
        let broker = test_broker().await;
        let id = broker
            .enqueue(
                QueueName::Default,
                TaskMessage::new(TaskKind::Encode, "t1")
                    .with_payload(serde_json::json!({"height": 720})),
            )
            .await
            .unwrap();

        let taken = broker.take_queued(&id).await.unwrap().unwrap();
        assert_eq!(taken.kind, TaskKind::Encode);
        assert_eq!(taken.payload["height"], 720);

        // Gone from the default queue; re-enqueue on high priority
        assert!(broker.claim(&[QueueName::Default], "w").await.unwrap().is_none());
        broker.enqueue(QueueName::HighPriority, taken).await.unwrap();
        let claimed = broker
            .claim(&[QueueName::HighPriority, QueueName::Default], "w")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task.task_id, "t1");
    }

    #[tokio::test]
    async fn take_queued_ignores_claimed_messages() {
        let broker = test_broker().await;
        let id = broker.enqueue(QueueName::Io, io_task("t1")).await.unwrap();
        broker.claim(&[QueueName::Io], "w").await.unwrap().unwrap();

        assert!(broker.take_queued(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_unknown_message_is_an_error() {
        let broker = test_broker().await;
        assert!(matches!(
            broker.ack("no-such-id").await,
            Err(BrokerError::NotFound(_))
        ));
    }
}
