//! Chat platform media client adapter for revenc.
//!
//! Implements the `MediaClient` port against a Telegram-style bot
//! HTTP API. All byte movement is streamed; status operations absorb
//! the platform's rate-limit hints internally.

mod telegram;
mod wire;

pub use telegram::TelegramMediaClient;
