//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the pipeline expects from
//! infrastructure. They contain no implementation details and use
//! only domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` or `reqwest` types in any signature
//! - Status writes go through compare-and-set only
//! - Byte movement is always streamed, never buffered whole

pub mod broker;
pub mod job_store;
pub mod media_client;
pub mod user_store;

pub use broker::{BrokerError, Delivery, QueueBroker, QueueName, TaskKind, TaskMessage};
pub use job_store::{JobStore, StoreError};
pub use media_client::{ByteStream, MediaClient, MediaError, ProgressFn};
pub use user_store::UserStore;

#[cfg(any(test, feature = "test-utils"))]
pub use broker::MockQueueBroker;
#[cfg(any(test, feature = "test-utils"))]
pub use job_store::MockJobStore;
#[cfg(any(test, feature = "test-utils"))]
pub use media_client::MockMediaClient;
#[cfg(any(test, feature = "test-utils"))]
pub use user_store::MockUserStore;
