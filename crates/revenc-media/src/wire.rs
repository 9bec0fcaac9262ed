//! Wire DTOs for the bot HTTP API.

use serde::Deserialize;

use revenc_core::domain::{AttachmentRef, MessageMeta};
use revenc_core::ports::MediaError;

/// Standard response envelope: every call returns `ok` plus either a
/// result or a description, with optional rate-limit parameters.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the envelope into a result or a classified error.
    pub fn into_result(self) -> Result<T, MediaError> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| MediaError::api("ok response without result"));
        }
        if let Some(retry_after) = self.parameters.and_then(|p| p.retry_after) {
            return Err(MediaError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        let description = self
            .description
            .unwrap_or_else(|| "unknown platform error".to_string());
        if description.to_ascii_lowercase().contains("not found") {
            return Err(MediaError::not_found(description));
        }
        Err(MediaError::api(description))
    }
}

/// A message as returned by the platform; only the attachment-bearing
/// fields the pipeline cares about.
#[derive(Debug, Deserialize)]
pub struct MessageDto {
    pub message_id: i64,
    pub video: Option<AttachmentDto>,
    pub document: Option<AttachmentDto>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentDto {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub thumbnail: Option<ThumbnailDto>,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailDto {
    pub file_id: String,
}

impl MessageDto {
    /// The message's media attachment, videos preferred.
    pub fn into_meta(self) -> Result<MessageMeta, MediaError> {
        let attachment = self.video.or(self.document).ok_or_else(|| {
            MediaError::not_found(format!("message {} has no attachment", self.message_id))
        })?;
        Ok(MessageMeta {
            file_name: attachment.file_name,
            file_size: attachment.file_size,
            mime_type: attachment.mime_type,
            attachment: AttachmentRef::new(attachment.file_id),
            thumbnail: attachment
                .thumbnail
                .map(|t| AttachmentRef::new(t.file_id)),
        })
    }
}

/// Result of `getFile`: the server-relative download path.
#[derive(Debug, Deserialize)]
pub struct FileDto {
    pub file_path: String,
}

/// Result of `sendMessage`: enough to address later edits.
#[derive(Debug, Deserialize)]
pub struct SentMessageDto {
    pub message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_unwraps_result() {
        let envelope: ApiEnvelope<SentMessageDto> =
            serde_json::from_str(r#"{"ok":true,"result":{"message_id":7}}"#).unwrap();
        assert_eq!(envelope.into_result().unwrap().message_id, 7);
    }

    #[test]
    fn envelope_surfaces_retry_after() {
        let envelope: ApiEnvelope<SentMessageDto> = serde_json::from_str(
            r#"{"ok":false,"description":"Too Many Requests: retry after 17","parameters":{"retry_after":17}}"#,
        )
        .unwrap();
        match envelope.into_result() {
            Err(MediaError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 17),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn envelope_classifies_not_found() {
        let envelope: ApiEnvelope<SentMessageDto> =
            serde_json::from_str(r#"{"ok":false,"description":"Bad Request: message not found"}"#)
                .unwrap();
        assert!(matches!(
            envelope.into_result(),
            Err(MediaError::NotFound { .. })
        ));
    }

    #[test]
    fn message_prefers_video_attachment() {
        let msg: MessageDto = serde_json::from_str(
            r#"{
                "message_id": 1001,
                "video": {"file_id": "vid", "file_name": "a.mp4", "file_size": 100,
                          "mime_type": "video/mp4", "thumbnail": {"file_id": "th"}},
                "document": {"file_id": "doc"}
            }"#,
        )
        .unwrap();
        let meta = msg.into_meta().unwrap();
        assert_eq!(meta.attachment.as_str(), "vid");
        assert_eq!(meta.thumbnail.unwrap().as_str(), "th");
    }

    #[test]
    fn message_without_media_is_not_found() {
        let msg: MessageDto =
            serde_json::from_str(r#"{"message_id": 5, "video": null, "document": null}"#).unwrap();
        assert!(matches!(
            msg.into_meta(),
            Err(MediaError::NotFound { .. })
        ));
    }
}
