//! Job store port.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CpuQueue, Job, JobStatus};

/// Domain-specific errors for store operations.
///
/// Abstracts away storage implementation details; adapters convert
/// their native errors into these variants.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested job does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested transition is not in the allowed-transition table.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the caller expected.
        from: JobStatus,
        /// Status the caller wanted.
        to: JobStatus,
    },

    /// Compare-and-set lost: the job is no longer in `from`.
    ///
    /// Callers must treat this as "someone else (cancellation) won"
    /// and back out of the stage.
    #[error("Status of {task_id} changed concurrently (expected {from}, wanted {to})")]
    CasRejected {
        /// The job whose status moved underneath the caller.
        task_id: String,
        /// Status the caller expected.
        from: JobStatus,
        /// Status the caller wanted.
        to: JobStatus,
    },

    /// Underlying storage failure (treated as transient by workers).
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether this is the benign lost-CAS case.
    #[must_use]
    pub const fn is_cas_rejected(&self) -> bool {
        matches!(self, Self::CasRejected { .. })
    }
}

/// Durable job bookkeeping.
///
/// Jobs are exclusively owned by the worker running their current
/// stage; every status write is a compare-and-set so concurrent
/// cancellation always wins cleanly.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job document.
    async fn put_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetch a job by its external task id.
    async fn get_job(&self, task_id: &str) -> Result<Option<Job>, StoreError>;

    /// All non-terminal jobs of a user, oldest first.
    async fn list_active_by_user(&self, user_id: i64) -> Result<Vec<Job>, StoreError>;

    /// Compare-and-set the status from `from` to `to`.
    ///
    /// Rejects transitions not in the allowed-transition table with
    /// [`StoreError::InvalidTransition`], and returns
    /// [`StoreError::CasRejected`] when the stored status is no
    /// longer `from`.
    async fn update_status(
        &self,
        task_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), StoreError>;

    /// Record (or clear) the broker message currently carrying the job.
    async fn set_broker_message_id(
        &self,
        task_id: &str,
        broker_message_id: Option<String>,
    ) -> Result<(), StoreError>;

    /// Rewrite the job's CPU-stage queue (acceleration).
    async fn set_cpu_queue(&self, task_id: &str, queue: CpuQueue) -> Result<(), StoreError>;

    /// Delete a job document entirely.
    async fn remove_job(&self, task_id: &str) -> Result<(), StoreError>;

    /// Delete all terminal jobs; returns how many were removed.
    async fn cleanup_terminal_jobs(&self) -> Result<u64, StoreError>;
}
