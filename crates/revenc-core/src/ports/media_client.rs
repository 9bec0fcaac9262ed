//! Media client port: the capability surface over the chat platform.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AttachmentRef, MessageMeta, StatusMessageRef};

/// A lazy, restartable sequence of attachment bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, MediaError>> + Send>>;

/// Progress callback invoked as `(current, total)` bytes.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Media client operation failure.
///
/// Serializable so failure causes can be persisted with the job.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaError {
    /// Transport-level failure.
    #[error("Network error: {message}")]
    Network {
        /// Detailed error message.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// The platform asked us to slow down.
    ///
    /// The adapter absorbs these internally where it can; when one
    /// escapes, the worker sleeps the hinted interval and retries.
    #[error("Rate limited for {retry_after_secs}s")]
    RateLimited {
        /// Seconds the platform asked us to wait.
        retry_after_secs: u64,
    },

    /// The message or attachment does not exist (or is inaccessible).
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// Local I/O failure while spooling bytes.
    #[error("I/O error ({kind}): {message}")]
    Io {
        /// The kind of I/O error.
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// The platform rejected the API call.
    #[error("Platform error: {message}")]
    Api {
        /// Description returned by the platform.
        message: String,
    },
}

impl MediaError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a network error with an HTTP status code.
    pub fn network_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an I/O error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        Self::Io {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// Create a platform error.
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Whether retrying can reasonably succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RateLimited { .. } | Self::Io { .. }
        )
    }
}

/// The capability surface the pipeline needs from the chat platform.
///
/// All byte movement is streamed; implementations must honor upstream
/// rate-limit hints internally (sleep the indicated interval, then
/// retry) for the small status operations.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait MediaClient: Send + Sync {
    /// Fetch metadata of a media-bearing message.
    async fn fetch_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<MessageMeta, MediaError>;

    /// Open a byte stream over an attachment.
    async fn stream_attachment(&self, attachment: &AttachmentRef)
    -> Result<ByteStream, MediaError>;

    /// Send a new status message; returns its reference for edits.
    async fn send_status(&self, chat_id: i64, text: &str)
    -> Result<StatusMessageRef, MediaError>;

    /// Edit a status message in place.
    async fn edit_status(&self, status: &StatusMessageRef, text: &str)
    -> Result<(), MediaError>;

    /// Delete a status message.
    async fn delete_status(&self, status: &StatusMessageRef) -> Result<(), MediaError>;

    /// Upload a document with optional thumbnail and caption.
    ///
    /// `progress` is invoked as bytes move; callers throttle their
    /// own status edits on top of it.
    async fn send_document(
        &self,
        chat_id: i64,
        file: &Path,
        thumbnail: Option<PathBuf>,
        caption: &str,
        progress: Option<ProgressFn>,
    ) -> Result<(), MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MediaError::network("reset").is_transient());
        assert!(MediaError::RateLimited {
            retry_after_secs: 30
        }
        .is_transient());
        assert!(!MediaError::not_found("message 5").is_transient());
        assert!(!MediaError::api("chat not found").is_transient());
    }

    #[test]
    fn io_error_captures_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = MediaError::from_io_error(&io_err);
        match err {
            MediaError::Io { kind, .. } => assert_eq!(kind, "PermissionDenied"),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
