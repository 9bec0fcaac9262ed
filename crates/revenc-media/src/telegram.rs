//! `MediaClient` implementation over a Telegram-style bot HTTP API.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use revenc_core::domain::{AttachmentRef, MessageMeta, StatusMessageRef};
use revenc_core::ports::{ByteStream, MediaClient, MediaError, ProgressFn};

use crate::wire::{ApiEnvelope, FileDto, MessageDto, SentMessageDto};

/// How many rate-limit waits a status operation absorbs before the
/// error is surfaced to the caller.
const MAX_FLOOD_WAITS: u32 = 3;

/// Media client over the bot HTTP API.
///
/// The base URL is configurable so tests and self-hosted API servers
/// can point it elsewhere.
pub struct TelegramMediaClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramMediaClient {
    /// Create a client for the public API endpoint.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base("https://api.telegram.org", token)
    }

    /// Create a client against a specific API server.
    pub fn with_api_base(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token)
    }

    /// One API call, envelope unwrapped.
    async fn call<T, P>(&self, method: &str, params: &P) -> Result<T, MediaError>
    where
        T: DeserializeOwned,
        P: Serialize + Sync,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            .map_err(|e| MediaError::network(e.to_string()))?;

        let status = response.status();
        let envelope: ApiEnvelope<T> = response.json().await.map_err(|e| {
            MediaError::network_with_status(format!("malformed response: {e}"), status.as_u16())
        })?;
        envelope.into_result()
    }

    /// An API call that sleeps through rate-limit hints.
    ///
    /// Used for the small status operations, which the port contract
    /// says must absorb upstream rate limits internally.
    async fn call_absorbing_flood_wait<T, P>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<T, MediaError>
    where
        T: DeserializeOwned,
        P: Serialize + Sync,
    {
        let mut waits = 0;
        loop {
            match self.call(method, params).await {
                Err(MediaError::RateLimited { retry_after_secs }) if waits < MAX_FLOOD_WAITS => {
                    waits += 1;
                    warn!(method, retry_after_secs, "rate limited, sleeping");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                other => return other,
            }
        }
    }
}

#[derive(Serialize)]
struct GetMessageParams {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct GetFileParams<'a> {
    file_id: &'a str,
}

#[derive(Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct EditMessageParams<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct DeleteMessageParams {
    chat_id: i64,
    message_id: i64,
}

#[async_trait]
impl MediaClient for TelegramMediaClient {
    async fn fetch_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<MessageMeta, MediaError> {
        let message: MessageDto = self
            .call(
                "getMessage",
                &GetMessageParams {
                    chat_id,
                    message_id,
                },
            )
            .await?;
        message.into_meta()
    }

    async fn stream_attachment(
        &self,
        attachment: &AttachmentRef,
    ) -> Result<ByteStream, MediaError> {
        let file: FileDto = self
            .call(
                "getFile",
                &GetFileParams {
                    file_id: attachment.as_str(),
                },
            )
            .await?;

        let response = self
            .http
            .get(self.file_url(&file.file_path))
            .send()
            .await
            .map_err(|e| MediaError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::network_with_status(
                format!("attachment download failed for {attachment}"),
                status.as_u16(),
            ));
        }

        debug!(attachment = %attachment, "streaming attachment");
        let stream = response
            .bytes_stream()
            .map_err(|e| MediaError::network(e.to_string()));
        Ok(Box::pin(stream))
    }

    async fn send_status(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<StatusMessageRef, MediaError> {
        let sent: SentMessageDto = self
            .call_absorbing_flood_wait("sendMessage", &SendMessageParams { chat_id, text })
            .await?;
        Ok(StatusMessageRef::new(chat_id, sent.message_id))
    }

    async fn edit_status(&self, status: &StatusMessageRef, text: &str) -> Result<(), MediaError> {
        let _: serde_json::Value = self
            .call_absorbing_flood_wait(
                "editMessageText",
                &EditMessageParams {
                    chat_id: status.chat_id,
                    message_id: status.message_id,
                    text,
                },
            )
            .await?;
        Ok(())
    }

    async fn delete_status(&self, status: &StatusMessageRef) -> Result<(), MediaError> {
        let _: serde_json::Value = self
            .call_absorbing_flood_wait(
                "deleteMessage",
                &DeleteMessageParams {
                    chat_id: status.chat_id,
                    message_id: status.message_id,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file: &Path,
        thumbnail: Option<std::path::PathBuf>,
        caption: &str,
        progress: Option<ProgressFn>,
    ) -> Result<(), MediaError> {
        let total = tokio::fs::metadata(file)
            .await
            .map_err(|e| MediaError::from_io_error(&e))?
            .len();
        let document = tokio::fs::File::open(file)
            .await
            .map_err(|e| MediaError::from_io_error(&e))?;

        // Count bytes through the stream so the caller sees upload
        // progress without the file ever being buffered whole.
        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let stream = ReaderStream::new(document).inspect_ok(move |chunk| {
            let current =
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
            if let Some(ref cb) = progress {
                cb(current, total);
            }
        });

        let file_name = file
            .file_name()
            .map_or_else(|| "output.mkv".to_string(), |n| n.to_string_lossy().into_owned());
        let document_part =
            reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
                .file_name(file_name);

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", document_part);

        if let Some(thumb_path) = thumbnail {
            let bytes = tokio::fs::read(thumb_path)
                .await
                .map_err(|e| MediaError::from_io_error(&e))?;
            form = form.part(
                "thumbnail",
                reqwest::multipart::Part::bytes(bytes).file_name("thumb.jpg"),
            );
        }

        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediaError::network(e.to_string()))?;

        let status = response.status();
        let envelope: ApiEnvelope<serde_json::Value> = response.json().await.map_err(|e| {
            MediaError::network_with_status(format!("malformed response: {e}"), status.as_u16())
        })?;
        envelope.into_result().map(|_| ())
    }
}
