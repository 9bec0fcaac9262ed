//! References to chat-platform objects and probe results.

use serde::{Deserialize, Serialize};

/// A message in a chat, identified by `(chat_id, message_id)`.
///
/// Message ids are ascending within a chat, so ordering a multipart
/// job's refs by `message_id` reproduces upload order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Chat the message lives in.
    pub chat_id: i64,
    /// Platform message id, ascending within the chat.
    pub message_id: i64,
}

impl MessageRef {
    /// Create a new message reference.
    #[must_use]
    pub const fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// A status message the service owns and edits in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessageRef {
    /// Chat the status message was sent to.
    pub chat_id: i64,
    /// Message id of the status message.
    pub message_id: i64,
}

impl StatusMessageRef {
    /// Create a new status message reference.
    #[must_use]
    pub const fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// Opaque handle to an attachment or thumbnail on the chat platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef(pub String);

impl AttachmentRef {
    /// Create a new attachment reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The underlying platform identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a media-bearing message, as returned by `fetch_message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Original file name, if the platform knows one.
    pub file_name: Option<String>,
    /// Attachment size in bytes, if known.
    pub file_size: Option<u64>,
    /// MIME type, if known.
    pub mime_type: Option<String>,
    /// Handle for streaming the attachment bytes.
    pub attachment: AttachmentRef,
    /// Handle for the source's own thumbnail, if it has one.
    pub thumbnail: Option<AttachmentRef>,
}

/// Probe results for a merged input artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaAnalysis {
    /// Total duration in seconds.
    pub duration_seconds: f64,
    /// Native vertical resolution.
    pub height: u32,
    /// Whether the source uses a 10-bit pixel format.
    pub is_10bit: bool,
    /// Audio channel count (0 when the source has no audio stream).
    pub audio_channels: u32,
}

impl MediaAnalysis {
    /// Whether the probe results describe playable media.
    ///
    /// A zero or negative duration, or a zero height, means the
    /// artifact is corrupt or empty and must not reach the encoder.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.duration_seconds > 0.0 && self.height > 0
    }
}
