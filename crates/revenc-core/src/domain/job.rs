//! The durable job record and its embedded configuration.

use serde::{Deserialize, Serialize};

use super::media::{AttachmentRef, MessageRef, StatusMessageRef};
use super::settings::UserSettings;
use super::status::JobStatus;
use crate::errors::JobError;

/// Requested output vertical resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Quality {
    /// 480p output.
    Q480,
    /// 720p output.
    Q720,
    /// 1080p output.
    Q1080,
}

impl Quality {
    /// The requested vertical resolution in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        match self {
            Self::Q480 => 480,
            Self::Q720 => 720,
            Self::Q1080 => 1080,
        }
    }

    /// Effective encode height for a source: never upscale.
    #[must_use]
    pub fn effective_height(&self, source_height: u32) -> u32 {
        self.height().min(source_height)
    }
}

impl TryFrom<u16> for Quality {
    type Error = JobError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            480 => Ok(Self::Q480),
            720 => Ok(Self::Q720),
            1080 => Ok(Self::Q1080),
            other => Err(JobError::bad_request(format!(
                "unsupported quality: {other}p"
            ))),
        }
    }
}

impl From<Quality> for u16 {
    fn from(value: Quality) -> Self {
        match value {
            Quality::Q480 => 480,
            Quality::Q720 => 720,
            Quality::Q1080 => 1080,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}p", self.height())
    }
}

/// Encoder preset controlling the speed/size trade-off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Fastest encode, largest output.
    Fast,
    /// Balanced.
    Medium,
    /// Slowest encode, smallest output.
    Slow,
}

impl Preset {
    /// The encoder's preset name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
        }
    }

    /// Parse a preset name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(Self::Fast),
            "medium" => Some(Self::Medium),
            "slow" => Some(Self::Slow),
            _ => None,
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which CPU-stage queue a job's encode task goes to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuQueue {
    /// Normal priority.
    #[default]
    Default,
    /// Accelerated: dispatched before anything on the default queue.
    HighPriority,
}

impl CpuQueue {
    /// Queue name as used by the broker.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::HighPriority => "high_priority",
        }
    }
}

/// Everything a worker needs to run a job, frozen at submit time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobData {
    /// Source messages, ordered by ascending message id.
    pub source_message_refs: Vec<MessageRef>,
    /// Requested output resolution.
    pub quality: Quality,
    /// Encoder preset.
    pub preset: Preset,
    /// Output file name presented to the user.
    pub final_filename: String,
    /// CPU-stage queue the encode task goes to.
    pub cpu_queue: CpuQueue,
    /// Source thumbnail, if the first message carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_ref: Option<AttachmentRef>,
    /// Snapshot of the user's settings at submit time.
    pub user_settings: UserSettings,
}

impl JobData {
    /// Validate the embedded invariants.
    ///
    /// Requires at least one source ref and strictly ascending
    /// message ids (multipart order).
    pub fn validate(&self) -> Result<(), JobError> {
        if self.source_message_refs.is_empty() {
            return Err(JobError::bad_request("job has no source messages"));
        }
        let ascending = self
            .source_message_refs
            .windows(2)
            .all(|w| w[0].message_id < w[1].message_id);
        if !ascending {
            return Err(JobError::bad_request(
                "source messages are not in ascending message-id order",
            ));
        }
        Ok(())
    }
}

/// The durable job record, one per requested transcode.
///
/// `task_id` is the externally visible identity and never changes;
/// `broker_message_id` tracks the job's current broker message so
/// cancellation and acceleration can revoke it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    /// Stable external identity (UUIDv4).
    pub task_id: String,
    /// Owning user.
    pub user_id: i64,
    /// Display name shown in queue listings.
    pub filename: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// The status message this job edits in place.
    pub status_message: StatusMessageRef,
    /// Broker message currently carrying this job, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_message_id: Option<String>,
    /// Frozen job configuration.
    pub job_data: JobData,
}

impl Job {
    /// Whether `user_id` owns this job.
    #[must_use]
    pub const fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }

    /// Whether the CPU stage has already started.
    ///
    /// Acceleration can only move queued work, so anything past
    /// `Analyzing` is no longer accelerable.
    #[must_use]
    pub const fn past_analysis(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Encoding
                | JobStatus::Uploading
                | JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data(refs: Vec<MessageRef>) -> JobData {
        JobData {
            source_message_refs: refs,
            quality: Quality::Q720,
            preset: Preset::Medium,
            final_filename: "out.mkv".to_string(),
            cpu_queue: CpuQueue::Default,
            thumbnail_ref: None,
            user_settings: UserSettings::default(),
        }
    }

    #[test]
    fn quality_never_upscales() {
        assert_eq!(Quality::Q1080.effective_height(540), 540);
        assert_eq!(Quality::Q720.effective_height(1080), 720);
        assert_eq!(Quality::Q480.effective_height(480), 480);
    }

    #[test]
    fn quality_parses_from_number() {
        assert_eq!(Quality::try_from(720u16).unwrap(), Quality::Q720);
        assert!(Quality::try_from(540u16).is_err());

        let json = serde_json::to_string(&Quality::Q1080).unwrap();
        assert_eq!(json, "1080");
        let parsed: Quality = serde_json::from_str("480").unwrap();
        assert_eq!(parsed, Quality::Q480);
    }

    #[test]
    fn cpu_queue_names_match_broker_queues() {
        assert_eq!(CpuQueue::Default.as_str(), "default");
        assert_eq!(CpuQueue::HighPriority.as_str(), "high_priority");
    }

    #[test]
    fn job_data_requires_ascending_refs() {
        let ok = sample_data(vec![MessageRef::new(1, 5001), MessageRef::new(1, 5002)]);
        assert!(ok.validate().is_ok());

        let empty = sample_data(vec![]);
        assert!(empty.validate().is_err());

        let unordered = sample_data(vec![MessageRef::new(1, 5002), MessageRef::new(1, 5001)]);
        assert!(unordered.validate().is_err());

        let duplicate = sample_data(vec![MessageRef::new(1, 5001), MessageRef::new(1, 5001)]);
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn acceleration_window_closes_at_encoding() {
        let mut job = Job {
            task_id: "t".to_string(),
            user_id: 7,
            filename: "a.mkv".to_string(),
            status: JobStatus::Analyzing,
            status_message: StatusMessageRef::new(7, 99),
            broker_message_id: None,
            job_data: sample_data(vec![MessageRef::new(7, 1)]),
        };
        assert!(!job.past_analysis());
        job.status = JobStatus::Encoding;
        assert!(job.past_analysis());
    }
}
