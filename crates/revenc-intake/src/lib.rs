//! Job intake controller for revenc.
//!
//! The orchestration layer between the chat-handler surface and the
//! pipeline: validates submissions, persists the initial job record,
//! enqueues the I/O stage, coalesces multipart uploads, and services
//! cancellation and acceleration requests.

mod controller;
mod error;
mod pending;

pub use controller::IntakeController;
pub use error::IntakeError;
pub use pending::{CollectOutcome, PartsReady, is_split_part};
