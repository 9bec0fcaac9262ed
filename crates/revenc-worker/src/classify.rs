//! Conversions from port errors into the job-level taxonomy.
//!
//! Workers decide retry behavior from `JobError` alone, so every
//! port error is classified here exactly once.

use revenc_core::JobError;
use revenc_core::ports::{BrokerError, MediaError, StoreError};

/// Store failures: storage blips are transient, the rest are bugs.
#[must_use]
pub fn store_error(err: &StoreError) -> JobError {
    match err {
        StoreError::Storage(message) => JobError::transient(format!("store: {message}")),
        other => JobError::internal(other.to_string()),
    }
}

/// Broker failures: storage blips are transient, the rest are bugs.
#[must_use]
pub fn broker_error(err: &BrokerError) -> JobError {
    match err {
        BrokerError::Storage(message) => JobError::transient(format!("broker: {message}")),
        other => JobError::internal(other.to_string()),
    }
}

/// Media failures while fetching sources.
///
/// Missing messages and platform rejections mean the source is gone
/// (no retry); transport problems are transient.
#[must_use]
pub fn media_error_download(err: &MediaError) -> JobError {
    if err.is_transient() {
        JobError::transient(err.to_string())
    } else {
        JobError::source_unavailable(err.to_string())
    }
}

/// Media failures while uploading the result.
#[must_use]
pub fn media_error_upload(err: &MediaError) -> JobError {
    JobError::upload(err.to_string())
}
