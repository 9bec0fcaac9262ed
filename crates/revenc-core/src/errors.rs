//! Job-level error taxonomy.
//!
//! These errors are the classification the retry policy and the
//! user-visible status messages are built on. They are serializable
//! so workers can persist the failure cause with the job record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for pipeline operations, classified by retry semantics.
///
/// `Transient` and `Upload` failures are retried with backoff; every
/// other variant short-circuits to a terminal `FAILED` (or
/// `CANCELLED`) status.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobError {
    /// Request validation failure at intake.
    #[error("Bad request: {message}")]
    BadRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A source message could not be fetched at submit time.
    #[error("Source unavailable: {message}")]
    SourceUnavailable {
        /// Which source and why.
        message: String,
    },

    /// The merged artifact is not playable media.
    #[error("Invalid media: {message}")]
    InvalidMedia {
        /// Probe failure detail (zero duration, zero height, empty file).
        message: String,
    },

    /// The encoder subprocess exited non-zero.
    #[error("Encoder failed: {stderr_tail}")]
    Encoder {
        /// Last line of the encoder's stderr.
        stderr_tail: String,
    },

    /// Upload of the encoded artifact failed; retried by default.
    #[error("Upload failed: {message}")]
    Upload {
        /// Transport-level detail.
        message: String,
    },

    /// Network, rate-limit, broker, or store blip; retried with backoff.
    #[error("Transient failure: {message}")]
    Transient {
        /// What failed.
        message: String,
    },

    /// The user is not allowed to perform this operation.
    #[error("Permission denied")]
    PermissionDenied,

    /// Cooperative cancellation by the user.
    #[error("Cancelled by user")]
    Cancelled,

    /// A bug; logged with full context, shown generically.
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic detail for the logs.
        message: String,
    },
}

impl JobError {
    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a source unavailable error.
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Create an invalid media error.
    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia {
            message: message.into(),
        }
    }

    /// Create an encoder error from the stderr tail.
    pub fn encoder(stderr_tail: impl Into<String>) -> Self {
        Self::Encoder {
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Create an upload error.
    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload {
            message: message.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the retry policy applies to this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Upload { .. })
    }

    /// Whether this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// One-line cause for the user-visible status message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message } => format!("Rejected: {message}"),
            Self::SourceUnavailable { message } => {
                format!("Could not fetch the source file: {message}")
            }
            Self::InvalidMedia { message } => format!("The file is not valid media: {message}"),
            Self::Encoder { stderr_tail } => format!("Encoding failed: {stderr_tail}"),
            Self::Upload { message } => format!("Upload failed: {message}"),
            Self::Transient { message } => format!("Temporary failure: {message}"),
            Self::PermissionDenied => "You are not authorized to do that.".to_string(),
            Self::Cancelled => "Cancelled by user".to_string(),
            Self::Internal { .. } => "Something went wrong on our side.".to_string(),
        }
    }
}

/// Convenience result type for pipeline operations.
pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(JobError::transient("socket reset").is_retryable());
        assert!(JobError::upload("timed out").is_retryable());

        assert!(!JobError::invalid_media("zero duration").is_retryable());
        assert!(!JobError::encoder("Invalid data found").is_retryable());
        assert!(!JobError::bad_request("bad quality").is_retryable());
        assert!(!JobError::Cancelled.is_retryable());
        assert!(!JobError::PermissionDenied.is_retryable());
    }

    #[test]
    fn encoder_error_carries_stderr_tail() {
        let err = JobError::encoder("Invalid data found when processing input");
        assert!(
            err.user_message()
                .contains("Invalid data found when processing input")
        );
    }

    #[test]
    fn internal_errors_are_generic_to_users() {
        let err = JobError::internal("index out of bounds at worker.rs:42");
        assert!(!err.user_message().contains("worker.rs"));
    }

    #[test]
    fn serialization_round_trip() {
        let err = JobError::encoder("moov atom not found");
        let json = serde_json::to_string(&err).unwrap();
        let parsed: JobError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }
}
