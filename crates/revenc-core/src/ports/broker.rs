//! Queue broker port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::CpuQueue;

/// The three logical queues of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// I/O stage intake queue.
    Io,
    /// CPU stage, normal priority.
    Default,
    /// CPU stage, accelerated.
    HighPriority,
}

impl QueueName {
    /// Queue name as stored by the broker.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io_queue",
            Self::Default => "default",
            Self::HighPriority => "high_priority",
        }
    }

    /// Parse from the stored name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "io_queue" => Some(Self::Io),
            "default" => Some(Self::Default),
            "high_priority" => Some(Self::HighPriority),
            _ => None,
        }
    }
}

impl From<CpuQueue> for QueueName {
    fn from(queue: CpuQueue) -> Self {
        match queue {
            CpuQueue::Default => Self::Default,
            CpuQueue::HighPriority => Self::HighPriority,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of work a broker message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Download + analysis stage.
    Io,
    /// Encode + upload stage.
    Encode,
}

impl TaskKind {
    /// Kind name as stored by the broker.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Encode => "encode",
        }
    }

    /// Parse from the stored name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "io" => Some(Self::Io),
            "encode" => Some(Self::Encode),
            _ => None,
        }
    }
}

/// A unit of work submitted to a queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Which stage this message drives.
    pub kind: TaskKind,
    /// The job the message belongs to (broker correlation id).
    pub task_id: String,
    /// Stage-specific payload (e.g. the analysis result for encodes).
    pub payload: serde_json::Value,
}

impl TaskMessage {
    /// Create a task message with an empty payload.
    pub fn new(kind: TaskKind, task_id: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A claimed message handed to a worker.
///
/// The worker must `ack` it on completion or `requeue` it when the
/// work should be redelivered.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Broker-internal message identity.
    pub broker_message_id: String,
    /// Queue the message was claimed from.
    pub queue: QueueName,
    /// The work itself.
    pub task: TaskMessage,
}

/// Broker operation failure.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No queued or claimed message matches.
    #[error("No such message: {0}")]
    NotFound(String),

    /// Message payload could not be (de)serialized.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Underlying storage failure (treated as transient by workers).
    #[error("Broker storage error: {0}")]
    Storage(String),
}

/// The broker-backed queue fabric between the pipeline stages.
///
/// FIFO within a queue, worker pull, at-least-once delivery. `claim`
/// honors strict priority across the queue list it is given, so a CPU
/// worker claiming `[HighPriority, Default]` drains accelerated work
/// first.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Append a message to a queue; returns the broker message id.
    async fn enqueue(&self, queue: QueueName, task: TaskMessage) -> Result<String, BrokerError>;

    /// Claim the oldest message from the first non-empty queue.
    ///
    /// Returns `None` when all given queues are empty. The claim is
    /// held until `ack` or `requeue`; unacked claims are returned to
    /// their queue by startup recovery.
    async fn claim(
        &self,
        queues: &[QueueName],
        worker_id: &str,
    ) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a claimed message, removing it permanently.
    async fn ack(&self, broker_message_id: &str) -> Result<(), BrokerError>;

    /// Return a claimed message to the front of its queue.
    async fn requeue(&self, broker_message_id: &str) -> Result<(), BrokerError>;

    /// Revoke a job's messages by task id.
    ///
    /// Deletes any queued (unclaimed) messages. With `terminate`,
    /// also fires the job's termination token so a running stage
    /// kills its subprocess. Returns whether anything was revoked or
    /// terminated.
    async fn revoke(&self, task_id: &str, terminate: bool) -> Result<bool, BrokerError>;

    /// Remove a queued (unclaimed) message and hand it back.
    ///
    /// Used by acceleration to move a not-yet-started message to
    /// another queue. Returns `None` when the message is gone or
    /// already claimed.
    async fn take_queued(&self, broker_message_id: &str)
    -> Result<Option<TaskMessage>, BrokerError>;

    /// The termination token for a task.
    ///
    /// Workers hold this token while running a stage; `revoke` with
    /// `terminate` cancels it.
    fn termination_token(&self, task_id: &str) -> CancellationToken;

    /// Drop the termination token registration for a finished task.
    fn release_termination_token(&self, task_id: &str);
}
