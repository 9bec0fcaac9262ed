//! Durable queue broker for the revenc pipeline stages.
//!
//! Messages live in a SQLite table so unacked work survives process
//! restarts; termination signals for running stages are in-process
//! `CancellationToken`s keyed by task id.

mod sqlite_broker;

pub use sqlite_broker::{SqliteQueueBroker, ensure_broker_schema};
