//! Shared worker dependencies.

use std::sync::Arc;

use revenc_core::Config;
use revenc_core::ports::{JobStore, MediaClient, QueueBroker};

/// Dependencies for the stage workers.
///
/// Cloned `Arc` references to the ports, allowing stage tasks to run
/// independently of the pool that spawned them.
#[derive(Clone)]
pub struct WorkerDeps {
    /// Durable job bookkeeping.
    pub store: Arc<dyn JobStore>,
    /// Queue fabric between the stages.
    pub broker: Arc<dyn QueueBroker>,
    /// Chat platform capability.
    pub media: Arc<dyn MediaClient>,
    /// Process configuration.
    pub config: Arc<Config>,
}
