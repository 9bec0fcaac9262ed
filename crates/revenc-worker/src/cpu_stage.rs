//! The CPU stage: supervised encode, then upload.
//!
//! Slot-bounded: one encoder subprocess per slot. The stage owns the
//! job from the `Analyzing -> Encoding` CAS until a terminal status,
//! and must clean up the workspace on every exit path.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revenc_core::domain::{Job, JobStatus, MediaAnalysis};
use revenc_core::ports::{Delivery, ProgressFn};
use revenc_core::{JobError, ProgressThrottle};

use crate::classify;
use crate::deps::WorkerDeps;
use crate::encoder::{EncodeOutcome, EncodeSpec, run_encoder};
use crate::finalize::finalize_failure;
use crate::io_stage::{ack, requeue};
use crate::progress::format_position;
use crate::retry::backoff_delay;
use crate::workspace::Workspace;

/// Handle one delivery from the CPU queues to completion.
pub async fn handle_encode_delivery(
    deps: &WorkerDeps,
    delivery: &Delivery,
    shutdown: &CancellationToken,
) {
    let task_id = &delivery.task.task_id;

    let job = match deps.store.get_job(task_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(task_id, "encode task for unknown job, dropping");
            ack(deps, delivery).await;
            return;
        }
        Err(e) => {
            warn!(task_id, error = %e, "store unavailable, requeueing encode task");
            requeue(deps, delivery).await;
            return;
        }
    };

    let workspace = Workspace::new(&deps.config.cache_dir, task_id);

    let analysis: MediaAnalysis = match serde_json::from_value(delivery.task.payload.clone()) {
        Ok(analysis) => analysis,
        Err(e) => {
            let err = JobError::internal(format!("malformed encode payload: {e}"));
            finalize_failure(deps, &job, &workspace, &err).await;
            ack(deps, delivery).await;
            return;
        }
    };

    let cancel = deps.broker.termination_token(task_id);

    match run_encode_pipeline(deps, &job, delivery, &analysis, &workspace, &cancel, shutdown).await
    {
        Ok(CpuOutcome::Completed) => {
            info!(task_id, "encode complete, result delivered");
            deps.broker.release_termination_token(task_id);
            ack(deps, delivery).await;
        }
        Ok(CpuOutcome::Shutdown) => {
            debug!(task_id, "encode interrupted by shutdown, requeueing");
            deps.broker.release_termination_token(task_id);
            requeue(deps, delivery).await;
        }
        Ok(CpuOutcome::Dropped) => {
            debug!(task_id, "encode task dropped, stage ownership lost");
            workspace.remove().await;
            deps.broker.release_termination_token(task_id);
            ack(deps, delivery).await;
        }
        Err(err) => {
            finalize_failure(deps, &job, &workspace, &err).await;
            ack(deps, delivery).await;
        }
    }
}

enum CpuOutcome {
    /// Output uploaded, job completed, workspace removed.
    Completed,
    /// Service shutdown; the job stays as-is for redelivery.
    Shutdown,
    /// Someone else owns the job now (usually cancellation).
    Dropped,
}

async fn run_encode_pipeline(
    deps: &WorkerDeps,
    job: &Job,
    delivery: &Delivery,
    analysis: &MediaAnalysis,
    workspace: &Workspace,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
) -> Result<CpuOutcome, JobError> {
    // Take stage ownership. A rejected CAS is normally cancellation,
    // but a crashed worker also leaves Encoding/Uploading behind;
    // those are resumable only by the delivery the job record still
    // points at, so a stale duplicate message never races a live one.
    let mut resume_upload = false;
    match deps
        .store
        .update_status(&job.task_id, JobStatus::Analyzing, JobStatus::Encoding)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_cas_rejected() => {
            let current = deps
                .store
                .get_job(&job.task_id)
                .await
                .map_err(|e| classify::store_error(&e))?;
            let owns_delivery = current.as_ref().is_some_and(|j| {
                j.broker_message_id.as_deref() == Some(delivery.broker_message_id.as_str())
            });
            match current.map(|j| j.status) {
                Some(JobStatus::Encoding) if owns_delivery => {
                    info!(task_id = %job.task_id, "restarting interrupted encode");
                }
                Some(JobStatus::Uploading) if owns_delivery => {
                    info!(task_id = %job.task_id, "resuming interrupted upload");
                    resume_upload = true;
                }
                _ => return Ok(CpuOutcome::Dropped),
            }
        }
        Err(e) => return Err(classify::store_error(&e)),
    }

    if resume_upload {
        upload_with_retries(deps, job, workspace, cancel).await?;
        return complete_job(deps, job, workspace).await;
    }

    let data = &job.job_data;
    let spec = EncodeSpec {
        input: workspace.merged_input(),
        output: workspace.output(&data.final_filename),
        target_height: data.quality.effective_height(analysis.height),
        crf: deps.config.encode_crf,
        preset: data.preset,
        audio_bitrate: deps.config.audio_bitrate.clone(),
        audio_channels: analysis.audio_channels,
    };
    debug!(
        task_id = %job.task_id,
        requested = %data.quality,
        source_height = analysis.height,
        target_height = spec.target_height,
        "encode parameters resolved"
    );

    let (progress_tx, bridge) =
        spawn_encode_bridge(deps, job, analysis.duration_seconds, cancel.clone());
    let outcome = run_encoder(
        &spec,
        analysis.duration_seconds,
        cancel,
        shutdown,
        &progress_tx,
    )
    .await;
    drop(progress_tx);
    bridge.abort();

    match outcome? {
        EncodeOutcome::Shutdown => return Ok(CpuOutcome::Shutdown),
        EncodeOutcome::Completed => {}
    }

    match deps
        .store
        .update_status(&job.task_id, JobStatus::Encoding, JobStatus::Uploading)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_cas_rejected() => return Err(JobError::Cancelled),
        Err(e) => return Err(classify::store_error(&e)),
    }

    upload_with_retries(deps, job, workspace, cancel).await?;
    complete_job(deps, job, workspace).await
}

/// Final transition and cleanup after a successful upload.
async fn complete_job(
    deps: &WorkerDeps,
    job: &Job,
    workspace: &Workspace,
) -> Result<CpuOutcome, JobError> {
    match deps
        .store
        .update_status(&job.task_id, JobStatus::Uploading, JobStatus::Completed)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_cas_rejected() => return Err(JobError::Cancelled),
        Err(e) => return Err(classify::store_error(&e)),
    }

    // Success: the status message goes away entirely.
    if let Err(e) = deps.media.delete_status(&job.status_message).await {
        warn!(task_id = %job.task_id, error = %e, "status message delete failed");
    }
    workspace.remove().await;
    Ok(CpuOutcome::Completed)
}

/// Upload the encoded output, retrying transient failures.
async fn upload_with_retries(
    deps: &WorkerDeps,
    job: &Job,
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let max_attempts = deps.config.retry_max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match upload_output(deps, job, workspace).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                attempt += 1;
                let delay = backoff_delay(deps.config.retry_base_delay, attempt);
                warn!(
                    task_id = %job.task_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "upload failed, backing off"
                );
                let _ = deps
                    .media
                    .edit_status(
                        &job.status_message,
                        &format!("Upload failed, retry attempt {attempt} of {max_attempts}…"),
                    )
                    .await;
                tokio::select! {
                    () = cancel.cancelled() => return Err(JobError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn upload_output(
    deps: &WorkerDeps,
    job: &Job,
    workspace: &Workspace,
) -> Result<(), JobError> {
    let data = &job.job_data;
    let output = workspace.output(&data.final_filename);
    let thumbnail = workspace.thumbnail();
    let thumbnail = thumbnail.is_file().then_some(thumbnail);

    let caption = format!("Encode Complete\n{}", data.final_filename);

    let (progress_tx, progress_rx) = watch::channel((0_u64, 0_u64));
    let bridge = spawn_upload_bridge(deps, job, progress_rx);
    let progress: ProgressFn = Arc::new(move |current, total| {
        progress_tx.send_replace((current, total));
    });

    let result = deps
        .media
        .send_document(
            job.status_message.chat_id,
            &output,
            thumbnail,
            &caption,
            Some(progress),
        )
        .await;
    bridge.abort();

    result.map_err(|e| classify::media_error_upload(&e))
}

/// Bridge encoder progress into throttled status edits.
///
/// Also the belt-and-braces cancellation probe: between edits the
/// job status is re-read, and a stored `CANCELLED` fires the
/// termination token even if the broker signal was missed.
fn spawn_encode_bridge(
    deps: &WorkerDeps,
    job: &Job,
    duration_seconds: f64,
    cancel: CancellationToken,
) -> (watch::Sender<f64>, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel(0.0_f64);
    let store = Arc::clone(&deps.store);
    let media = Arc::clone(&deps.media);
    let status_ref = job.status_message;
    let task_id = job.task_id.clone();
    let filename = job.job_data.final_filename.clone();

    let handle = tokio::spawn(async move {
        let mut throttle = ProgressThrottle::status_edit();
        let mut last_percent = 0.0_f64;
        while rx.changed().await.is_ok() {
            let seconds = *rx.borrow_and_update();
            if !throttle.should_emit() {
                continue;
            }

            match store.get_job(&task_id).await {
                Ok(Some(j)) if j.status == JobStatus::Cancelled => {
                    cancel.cancel();
                    break;
                }
                _ => {}
            }

            let percent = if duration_seconds > 0.0 {
                (seconds / duration_seconds * 100.0).clamp(0.0, 100.0)
            } else {
                0.0
            };
            // Keep the displayed percentage monotonic
            if percent > last_percent {
                last_percent = percent;
            }
            let text = format!(
                "Encoding {filename}\n{} / {} ({last_percent:.0}%)",
                format_position(seconds),
                format_position(duration_seconds),
            );
            let _ = media.edit_status(&status_ref, &text).await;
        }
    });
    (tx, handle)
}

/// Bridge upload byte counts into throttled status edits.
fn spawn_upload_bridge(
    deps: &WorkerDeps,
    job: &Job,
    mut rx: watch::Receiver<(u64, u64)>,
) -> JoinHandle<()> {
    let media = Arc::clone(&deps.media);
    let status_ref = job.status_message;

    tokio::spawn(async move {
        let mut throttle = ProgressThrottle::status_edit();
        while rx.changed().await.is_ok() {
            let (current, total) = *rx.borrow_and_update();
            if !throttle.should_emit() {
                continue;
            }
            let text = if total > 0 {
                #[allow(clippy::cast_precision_loss)]
                let percent = (current as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                format!("Uploading… {percent:.0}%")
            } else {
                "Uploading…".to_string()
            };
            let _ = media.edit_status(&status_ref, &text).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use revenc_core::ports::{MockJobStore, MockMediaClient, MockQueueBroker, QueueName, TaskKind, TaskMessage};
    use revenc_core::ports::StoreError;
    use tokio_util::sync::CancellationToken;

    use crate::io_stage::tests::{sample_job, test_deps};

    fn encode_delivery(task_id: &str, payload: serde_json::Value) -> Delivery {
        Delivery {
            broker_message_id: "bm-1".to_string(),
            queue: QueueName::Default,
            task: TaskMessage::new(TaskKind::Encode, task_id).with_payload(payload),
        }
    }

    #[tokio::test]
    async fn malformed_payload_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockJobStore::new();
        let mut broker = MockQueueBroker::new();
        let mut media = MockMediaClient::new();

        store
            .expect_get_job()
            .returning(|id| Ok(Some(sample_job(id, JobStatus::Analyzing))));
        store
            .expect_update_status()
            .withf(|_, from, to| *from == JobStatus::Analyzing && *to == JobStatus::Failed)
            .times(1)
            .returning(|_, _, _| Ok(()));
        // Internal failures are generic to the user
        media
            .expect_edit_status()
            .withf(|_, text| text.contains("Something went wrong"))
            .times(1)
            .returning(|_, _| Ok(()));
        broker
            .expect_release_termination_token()
            .times(1)
            .return_const(());
        broker
            .expect_ack()
            .withf(|id| id == "bm-1")
            .times(1)
            .returning(|_| Ok(()));

        let deps = test_deps(store, broker, media, dir.path().to_path_buf());
        let delivery = encode_delivery("t1", serde_json::json!("not an analysis"));
        let shutdown = CancellationToken::new();
        handle_encode_delivery(&deps, &delivery, &shutdown).await;
    }

    #[tokio::test]
    async fn cancellation_winning_the_cas_drops_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockJobStore::new();
        let mut broker = MockQueueBroker::new();

        store
            .expect_get_job()
            .returning(|id| Ok(Some(sample_job(id, JobStatus::Cancelled))));
        store
            .expect_update_status()
            .times(1)
            .returning(|task_id, from, to| {
                Err(StoreError::CasRejected {
                    task_id: task_id.to_string(),
                    from,
                    to,
                })
            });
        broker
            .expect_termination_token()
            .times(1)
            .returning(|_| CancellationToken::new());
        broker
            .expect_release_termination_token()
            .times(1)
            .return_const(());
        broker.expect_ack().times(1).returning(|_| Ok(()));

        let deps = test_deps(
            store,
            broker,
            MockMediaClient::new(),
            dir.path().to_path_buf(),
        );
        let analysis = MediaAnalysis {
            duration_seconds: 120.0,
            height: 1080,
            is_10bit: false,
            audio_channels: 2,
        };
        let delivery = encode_delivery("t1", serde_json::to_value(&analysis).unwrap());
        handle_encode_delivery(&deps, &delivery, &CancellationToken::new()).await;
    }
}
