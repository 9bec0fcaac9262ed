//! Job status enumeration and the allowed-transition table.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a transcoding job.
///
/// The happy path is linear:
/// `Queued → Downloading → Analyzing → Encoding → Uploading → Completed`.
/// Any non-terminal status may transition to `Failed` or `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted by intake, waiting for an I/O worker.
    Queued,
    /// I/O worker is streaming source attachments into the workspace.
    Downloading,
    /// Probing the merged artifact and preparing the thumbnail.
    Analyzing,
    /// Encoder subprocess is running.
    Encoding,
    /// Encoded output is being uploaded back to the user.
    Uploading,
    /// Result delivered; workspace and status message removed.
    Completed,
    /// Terminal failure; the user-visible message carries the cause.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl JobStatus {
    /// String representation used for database storage and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Downloading => "DOWNLOADING",
            Self::Analyzing => "ANALYZING",
            Self::Encoding => "ENCODING",
            Self::Uploading => "UPLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "DOWNLOADING" => Some(Self::Downloading),
            "ANALYZING" => Some(Self::Analyzing),
            "ENCODING" => Some(Self::Encoding),
            "UPLOADING" => Some(Self::Uploading),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status is terminal (no further transitions allowed).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The next status on the happy path, if any.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Downloading),
            Self::Downloading => Some(Self::Analyzing),
            Self::Analyzing => Some(Self::Encoding),
            Self::Encoding => Some(Self::Uploading),
            Self::Uploading => Some(Self::Completed),
            Self::Completed | Self::Failed | Self::Cancelled => None,
        }
    }

    /// Whether the transition `from → to` is allowed.
    ///
    /// Allowed transitions are the single forward step on the happy
    /// path, plus `Failed`/`Cancelled` from any non-terminal status.
    #[must_use]
    pub fn can_transition(from: Self, to: Self) -> bool {
        if from.is_terminal() {
            return false;
        }
        match to {
            Self::Failed | Self::Cancelled => true,
            _ => from.next() == Some(to),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
