//! Core domain types and port definitions for revenc.
//!
//! This crate holds everything the pipeline stages share: the job
//! state machine, the submission and settings types, the error
//! taxonomy, and the port traits the adapters implement. It contains
//! no infrastructure code.

pub mod config;
pub mod domain;
pub mod errors;
pub mod filename;
pub mod ports;
pub mod progress;

// Re-export commonly used types for convenience
pub use config::{BrandingDefaults, Config, ConfigError};
pub use domain::{
    AttachmentRef, CpuQueue, Job, JobData, JobRequest, JobStatus, MediaAnalysis, MessageMeta,
    MessageRef, Preset, Quality, StatusMessageRef, SubmitReceipt, UserSettings, UserSettingsPatch,
};
pub use errors::{JobError, JobResult};
pub use filename::standardize_filename;
pub use ports::{
    BrokerError, ByteStream, Delivery, JobStore, MediaClient, MediaError, ProgressFn, QueueBroker,
    QueueName, StoreError, TaskKind, TaskMessage, UserStore,
};
pub use progress::ProgressThrottle;
