//! Intake-level errors.

use thiserror::Error;

use revenc_core::JobError;
use revenc_core::ports::{BrokerError, MediaError, StoreError};

/// Errors surfaced to the chat-handler surface.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// No job with that task id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The requester does not own the job (or is not an admin).
    #[error("permission denied")]
    PermissionDenied,

    /// The job has already started its CPU stage (or is terminal).
    #[error("job can no longer be accelerated")]
    NotAccelerable,

    /// Request validation or classification failure.
    #[error(transparent)]
    Job(#[from] JobError),

    /// Store failure.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Broker failure.
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    /// Chat platform failure.
    #[error("media: {0}")]
    Media(#[from] MediaError),
}
