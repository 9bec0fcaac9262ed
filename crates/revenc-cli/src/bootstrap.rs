//! Service wiring and lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use revenc_broker::{SqliteQueueBroker, ensure_broker_schema};
use revenc_core::Config;
use revenc_core::ports::QueueBroker;
use revenc_db::{StoreFactory, setup_database};
use revenc_intake::IntakeController;
use revenc_media::TelegramMediaClient;
use revenc_worker::{WorkerDeps, run_cpu_pool, run_io_pool};

use crate::{EXIT_BROKER, EXIT_STORE};

/// How often terminal job records are swept out of the store.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Pause before restarting a crashed worker pool.
const RESTART_DELAY: Duration = Duration::from_secs(2);

type BoxedPoolFuture = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// Keep a worker pool alive: a clean return ends it, a panic
/// restarts it after a short pause.
fn supervise_pool<F>(
    name: &'static str,
    shutdown: CancellationToken,
    make: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> BoxedPoolFuture + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(make()).await {
                Ok(()) => break,
                Err(e) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    error!(pool = name, error = %e, "worker pool crashed, restarting");
                    tokio::time::sleep(RESTART_DELAY).await;
                }
            }
        }
    })
}

/// Wire everything and run until ctrl-c.
pub async fn run(config: Config) -> Result<(), i32> {
    let config = Arc::new(config);

    let pool = match setup_database(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, path = %config.database_path.display(), "store unreachable");
            return Err(EXIT_STORE);
        }
    };

    if let Err(e) = ensure_broker_schema(&pool).await {
        error!(error = %e, "broker unreachable");
        return Err(EXIT_BROKER);
    }
    let broker = Arc::new(SqliteQueueBroker::new(pool.clone()));
    if let Err(e) = broker.recover_claims().await {
        error!(error = %e, "broker recovery failed");
        return Err(EXIT_BROKER);
    }

    let store = StoreFactory::build_job_store(pool.clone());
    let users = StoreFactory::build_user_store(pool, config.branding.clone());
    let media = Arc::new(TelegramMediaClient::new(config.bot_token.clone()));

    let deps = WorkerDeps {
        store: Arc::clone(&store),
        broker: Arc::clone(&broker) as Arc<dyn QueueBroker>,
        media: media.clone(),
        config: Arc::clone(&config),
    };

    let shutdown = CancellationToken::new();
    let io_pool = supervise_pool("io", shutdown.clone(), {
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        move || Box::pin(run_io_pool(deps.clone(), shutdown.clone())) as BoxedPoolFuture
    });
    let cpu_pool = supervise_pool("cpu", shutdown.clone(), {
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        move || Box::pin(run_cpu_pool(deps.clone(), shutdown.clone())) as BoxedPoolFuture
    });

    // The intake controller is driven by the chat-handler surface;
    // here we own its lifecycle and drain its announcements.
    let (_intake, mut parts_rx) = IntakeController::new(
        store,
        users,
        Arc::clone(&broker) as Arc<dyn QueueBroker>,
        media,
        Arc::clone(&config),
    );
    let announcer_shutdown = shutdown.clone();
    let announcer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = announcer_shutdown.cancelled() => break,
                ready = parts_rx.recv() => match ready {
                    Some(ready) => info!(
                        user_id = ready.user_id,
                        parts = ready.message_refs.len(),
                        "part set ready for confirmation"
                    ),
                    None => break,
                },
            }
        }
    });

    let cleanup_deps = deps.clone();
    let cleanup_shutdown = shutdown.clone();
    let cleanup = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cleanup_shutdown.cancelled() => break,
                () = tokio::time::sleep(CLEANUP_INTERVAL) => {
                    match cleanup_deps.store.cleanup_terminal_jobs().await {
                        Ok(removed) if removed > 0 => {
                            info!(removed, "swept terminal jobs");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "terminal job sweep failed"),
                    }
                }
            }
        }
    });

    info!(
        io_concurrency = config.io_worker_concurrency,
        cpu_slots = config.cpu_worker_slots,
        "revencd running, ctrl-c to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }
    info!("shutting down, draining in-flight work");
    shutdown.cancel();

    let _ = io_pool.await;
    let _ = cpu_pool.await;
    announcer.abort();
    cleanup.abort();

    info!("shutdown complete");
    Ok(())
}
