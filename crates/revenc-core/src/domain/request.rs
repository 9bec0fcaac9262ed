//! The validated submission request the intake controller accepts.

use serde::{Deserialize, Serialize};

use super::media::{MessageRef, StatusMessageRef};
use super::job::{Preset, Quality};
use super::settings::UserSettings;
use crate::errors::JobError;

/// A validated request to transcode one or more source messages.
///
/// Produced by the chat-handler surface once the user has confirmed
/// quality, preset, and filename.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRequest {
    /// Submitting user.
    pub user_id: i64,
    /// Source messages; intake sorts these by ascending message id.
    pub source_message_refs: Vec<MessageRef>,
    /// Requested output resolution.
    pub quality: Quality,
    /// Encoder preset.
    pub preset: Preset,
    /// Filename proposed by the user (pre-standardization).
    pub proposed_filename: String,
    /// The user's settings at submit time.
    pub user_settings: UserSettings,
}

impl JobRequest {
    /// Validate the request shape before any I/O happens.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.source_message_refs.is_empty() {
            return Err(JobError::bad_request("no source messages in request"));
        }
        let mut ids: Vec<i64> = self
            .source_message_refs
            .iter()
            .map(|r| r.message_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.source_message_refs.len() {
            return Err(JobError::bad_request("duplicate source messages in request"));
        }
        if self.proposed_filename.trim().is_empty() {
            return Err(JobError::bad_request("empty filename"));
        }
        Ok(())
    }
}

/// What intake returns to the caller on successful submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// External job identity (stable for the job's lifetime).
    pub task_id: String,
    /// The status message the job will keep editing.
    pub status_message: StatusMessageRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(refs: Vec<MessageRef>) -> JobRequest {
        JobRequest {
            user_id: 1,
            source_message_refs: refs,
            quality: Quality::Q720,
            preset: Preset::Medium,
            proposed_filename: "Some.Show.S01E01.mkv".to_string(),
            user_settings: UserSettings::default(),
        }
    }

    #[test]
    fn rejects_empty_and_duplicate_refs() {
        assert!(request(vec![]).validate().is_err());
        assert!(
            request(vec![MessageRef::new(1, 10), MessageRef::new(1, 10)])
                .validate()
                .is_err()
        );
        assert!(
            request(vec![MessageRef::new(1, 10), MessageRef::new(1, 11)])
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn rejects_blank_filename() {
        let mut req = request(vec![MessageRef::new(1, 10)]);
        req.proposed_filename = "   ".to_string();
        assert!(req.validate().is_err());
    }
}
