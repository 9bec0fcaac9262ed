//! Worker pools: claim loops with bounded concurrency.
//!
//! The I/O pool interleaves many pipelines on cooperative tasks; the
//! CPU pool is bounded to the encoder slot count. Both drain their
//! in-flight work on shutdown before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use revenc_core::ports::{QueueName, TaskKind};

use crate::cpu_stage::handle_encode_delivery;
use crate::deps::WorkerDeps;
use crate::io_stage::handle_io_delivery;

/// How long an idle pool waits before polling its queues again.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run the I/O worker pool until shutdown.
///
/// Claims from `io_queue` with cooperative concurrency up to the
/// configured limit (dozens of jobs per process).
pub async fn run_io_pool(deps: WorkerDeps, shutdown: CancellationToken) {
    let limit = deps.config.io_worker_concurrency;
    let worker_id = format!("io-{}", std::process::id());
    info!(worker_id, limit, "io pool starting");
    claim_loop(deps, &[QueueName::Io], limit, worker_id, shutdown).await;
}

/// Run the CPU worker pool until shutdown.
///
/// Claims the high-priority queue strictly before the default queue;
/// at most one encoder subprocess per slot.
pub async fn run_cpu_pool(deps: WorkerDeps, shutdown: CancellationToken) {
    let slots = deps.config.cpu_worker_slots;
    let worker_id = format!("cpu-{}", std::process::id());
    info!(worker_id, slots, "cpu pool starting");
    claim_loop(
        deps,
        &[QueueName::HighPriority, QueueName::Default],
        slots,
        worker_id,
        shutdown,
    )
    .await;
}

async fn claim_loop(
    deps: WorkerDeps,
    queues: &[QueueName],
    limit: usize,
    worker_id: String,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(limit));

    loop {
        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.expect("pool semaphore closed")
            }
        };

        let claimed = tokio::select! {
            () = shutdown.cancelled() => break,
            claimed = deps.broker.claim(queues, &worker_id) => claimed,
        };

        match claimed {
            Ok(Some(delivery)) => {
                let deps = deps.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    match delivery.task.kind {
                        TaskKind::Io => handle_io_delivery(&deps, &delivery).await,
                        TaskKind::Encode => {
                            handle_encode_delivery(&deps, &delivery, &shutdown).await;
                        }
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            Err(e) => {
                drop(permit);
                warn!(error = %e, "claim failed, backing off");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }
    }

    // Drain: wait until every in-flight stage has returned its permit.
    #[allow(clippy::cast_possible_truncation)]
    let _ = semaphore.acquire_many(limit as u32).await;
    info!(limit, "pool drained");
}
