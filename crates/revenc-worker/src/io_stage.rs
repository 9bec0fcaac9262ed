//! The I/O stage: download, probe, thumbnail, hand-off.
//!
//! Cooperative concurrency; every byte-moving operation is a
//! suspension point, so one worker process interleaves dozens of
//! these pipelines.

use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revenc_core::domain::{Job, JobStatus, MessageMeta};
use revenc_core::ports::{Delivery, MediaError, QueueName, StoreError, TaskKind, TaskMessage};
use revenc_core::{JobError, ProgressThrottle};

use crate::analysis::probe_media;
use crate::classify;
use crate::deps::WorkerDeps;
use crate::finalize::finalize_failure;
use crate::retry::backoff_delay;
use crate::workspace::Workspace;

/// Handle one delivery from `io_queue` to completion.
///
/// Every exit path acks or requeues the delivery; transient errors
/// are retried in place up to the configured attempt cap.
pub async fn handle_io_delivery(deps: &WorkerDeps, delivery: &Delivery) {
    let task_id = &delivery.task.task_id;

    let job = match deps.store.get_job(task_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(task_id, "io task for unknown job, dropping");
            ack(deps, delivery).await;
            return;
        }
        Err(e) => {
            warn!(task_id, error = %e, "store unavailable, requeueing io task");
            requeue(deps, delivery).await;
            return;
        }
    };

    let cancel = deps.broker.termination_token(task_id);
    let workspace = Workspace::new(&deps.config.cache_dir, task_id);

    match run_io_pipeline(deps, &job, &workspace, &cancel).await {
        Ok(IoOutcome::HandedOff) => {
            info!(task_id, "io stage complete, encode enqueued");
        }
        Ok(IoOutcome::Dropped) => {
            debug!(task_id, "io task dropped, stage ownership lost");
            workspace.remove().await;
            deps.broker.release_termination_token(task_id);
        }
        Err(err) => {
            finalize_failure(deps, &job, &workspace, &err).await;
        }
    }
    ack(deps, delivery).await;
}

enum IoOutcome {
    /// Download and analysis done, encode task enqueued.
    HandedOff,
    /// Someone else owns the job now (usually cancellation).
    Dropped,
}

async fn run_io_pipeline(
    deps: &WorkerDeps,
    job: &Job,
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<IoOutcome, JobError> {
    // Take stage ownership. A rejected CAS normally means
    // cancellation won; Downloading/Analyzing mean a previous worker
    // died mid-stage and this is a resume.
    match deps
        .store
        .update_status(&job.task_id, JobStatus::Queued, JobStatus::Downloading)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_cas_rejected() => match current_status(deps, &job.task_id).await? {
            Some(JobStatus::Downloading | JobStatus::Analyzing) => {
                info!(task_id = %job.task_id, "resuming interrupted io stage");
            }
            _ => return Ok(IoOutcome::Dropped),
        },
        Err(e) => return Err(classify::store_error(&e)),
    }

    workspace
        .ensure()
        .await
        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;

    let max_attempts = deps.config.retry_max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match io_work(deps, job, workspace, cancel).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                attempt += 1;
                let delay = backoff_delay(deps.config.retry_base_delay, attempt);
                warn!(
                    task_id = %job.task_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "transient io failure, backing off"
                );
                let _ = deps
                    .media
                    .edit_status(
                        &job.status_message,
                        &format!(
                            "Temporary failure, retry attempt {attempt} of {max_attempts}\n{}",
                            err.user_message()
                        ),
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

/// One attempt of the stage body: download (unless resumable), probe,
/// thumbnail, enqueue the encode task.
async fn io_work(
    deps: &WorkerDeps,
    job: &Job,
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<IoOutcome, JobError> {
    if workspace.has_merged_input() {
        info!(task_id = %job.task_id, "merged input present, skipping download");
    } else {
        download_sources(deps, job, workspace, cancel).await?;
    }

    // Downloading -> Analyzing; an already-Analyzing job is a resume.
    match deps
        .store
        .update_status(&job.task_id, JobStatus::Downloading, JobStatus::Analyzing)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_cas_rejected() => match current_status(deps, &job.task_id).await? {
            Some(JobStatus::Analyzing) => {}
            Some(JobStatus::Cancelled) => return Err(JobError::Cancelled),
            _ => return Ok(IoOutcome::Dropped),
        },
        Err(e) => return Err(classify::store_error(&e)),
    }

    let _ = deps
        .media
        .edit_status(&job.status_message, "Download complete. Analyzing…")
        .await;

    let analysis = probe_media(&workspace.merged_input()).await?;

    // Effective thumbnail: the user's custom one wins over the
    // source's own; a thumbnail failure never fails the job.
    let thumb_ref = job
        .job_data
        .user_settings
        .custom_thumbnail_ref
        .clone()
        .or_else(|| job.job_data.thumbnail_ref.clone());
    if let Some(ref attachment) = thumb_ref {
        if let Err(e) = download_thumbnail(deps, attachment, workspace).await {
            warn!(task_id = %job.task_id, error = %e, "thumbnail download failed, continuing");
        }
    }

    // Re-read the job before the hand-off: acceleration may have
    // rewritten cpu_queue while the download was running.
    let current = deps
        .store
        .get_job(&job.task_id)
        .await
        .map_err(|e| classify::store_error(&e))?
        .ok_or_else(|| JobError::internal("job vanished during io stage"))?;
    if current.status == JobStatus::Cancelled {
        return Err(JobError::Cancelled);
    }
    let cpu_queue: QueueName = current.job_data.cpu_queue.into();

    let payload = serde_json::to_value(&analysis)
        .map_err(|e| JobError::internal(format!("analysis payload: {e}")))?;
    let message = TaskMessage::new(TaskKind::Encode, job.task_id.clone()).with_payload(payload);

    // Token registration is handed over to the CPU stage; release
    // before the enqueue so a cancel in between sees the queued
    // message instead of a stale registration.
    deps.broker.release_termination_token(&job.task_id);

    // A resumed hand-off may have left an encode message from the
    // previous run in the queue; drop it so exactly one exists.
    deps.broker
        .revoke(&job.task_id, false)
        .await
        .map_err(|e| classify::broker_error(&e))?;

    let broker_message_id = deps
        .broker
        .enqueue(cpu_queue, message)
        .await
        .map_err(|e| classify::broker_error(&e))?;
    deps.store
        .set_broker_message_id(&job.task_id, Some(broker_message_id))
        .await
        .map_err(|e| classify::store_error(&e))?;

    let _ = deps
        .media
        .edit_status(
            &job.status_message,
            &format!("Analysis complete. Waiting for an encoder slot ({cpu_queue})…"),
        )
        .await;

    Ok(IoOutcome::HandedOff)
}

/// Stream every source part into the merged input artifact.
async fn download_sources(
    deps: &WorkerDeps,
    job: &Job,
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let refs = &job.job_data.source_message_refs;

    // Fetch all metadata up front for the byte total.
    let mut metas: Vec<MessageMeta> = Vec::with_capacity(refs.len());
    for message_ref in refs {
        let meta = deps
            .media
            .fetch_message(message_ref.chat_id, message_ref.message_id)
            .await
            .map_err(|e| classify::media_error_download(&e))?;
        metas.push(meta);
    }
    let total: u64 = metas.iter().filter_map(|m| m.file_size).sum();

    let partial = workspace.merged_input_partial();
    let mut file = tokio::fs::File::create(&partial)
        .await
        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;

    let mut written: u64 = 0;
    let mut throttle = ProgressThrottle::status_edit();
    for (index, meta) in metas.iter().enumerate() {
        debug!(
            task_id = %job.task_id,
            part = index + 1,
            parts = metas.len(),
            "downloading source part"
        );
        let mut stream = deps
            .media
            .stream_attachment(&meta.attachment)
            .await
            .map_err(|e| classify::media_error_download(&e))?;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(JobError::Cancelled),
                chunk = stream.try_next() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    file.write_all(&bytes)
                        .await
                        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;
                    written += bytes.len() as u64;
                    if throttle.should_emit() {
                        if cancelled_in_store(deps, &job.task_id).await {
                            return Err(JobError::Cancelled);
                        }
                        // A rate-limit hint that escapes the adapter's own
                        // waits pushes the next edit out; the download
                        // itself keeps going.
                        if let Err(MediaError::RateLimited { retry_after_secs }) = deps
                            .media
                            .edit_status(
                                &job.status_message,
                                &download_progress_text(written, total),
                            )
                            .await
                        {
                            throttle.hold_for(std::time::Duration::from_secs(retry_after_secs));
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(classify::media_error_download(&e)),
            }
        }
    }

    file.flush()
        .await
        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;
    drop(file);
    workspace
        .commit_merged_input()
        .await
        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;

    info!(task_id = %job.task_id, bytes = written, "download complete");
    Ok(())
}

async fn download_thumbnail(
    deps: &WorkerDeps,
    attachment: &revenc_core::domain::AttachmentRef,
    workspace: &Workspace,
) -> Result<(), JobError> {
    let mut stream = deps
        .media
        .stream_attachment(attachment)
        .await
        .map_err(|e| classify::media_error_download(&e))?;

    let mut file = tokio::fs::File::create(workspace.thumbnail())
        .await
        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;
    while let Some(bytes) = stream
        .try_next()
        .await
        .map_err(|e| classify::media_error_download(&e))?
    {
        file.write_all(&bytes)
            .await
            .map_err(|e| JobError::transient(format!("workspace: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| JobError::transient(format!("workspace: {e}")))?;
    Ok(())
}

fn download_progress_text(written: u64, total: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let written_mb = written as f64 / 1_000_000.0;
    if total > 0 {
        #[allow(clippy::cast_precision_loss)]
        let percent = (written as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        #[allow(clippy::cast_precision_loss)]
        let total_mb = total as f64 / 1_000_000.0;
        format!("Downloading…\n{written_mb:.1} / {total_mb:.1} MB ({percent:.0}%)")
    } else {
        format!("Downloading…\n{written_mb:.1} MB")
    }
}

/// Belt-and-braces cancellation probe between progress updates.
async fn cancelled_in_store(deps: &WorkerDeps, task_id: &str) -> bool {
    matches!(
        deps.store.get_job(task_id).await,
        Ok(Some(Job {
            status: JobStatus::Cancelled,
            ..
        }))
    )
}

async fn current_status(deps: &WorkerDeps, task_id: &str) -> Result<Option<JobStatus>, JobError> {
    match deps.store.get_job(task_id).await {
        Ok(job) => Ok(job.map(|j| j.status)),
        Err(StoreError::Storage(message)) => Err(JobError::transient(message)),
        Err(e) => Err(JobError::internal(e.to_string())),
    }
}

pub(crate) async fn ack(deps: &WorkerDeps, delivery: &Delivery) {
    if let Err(e) = deps.broker.ack(&delivery.broker_message_id).await {
        warn!(message_id = %delivery.broker_message_id, error = %e, "ack failed");
    }
}

pub(crate) async fn requeue(deps: &WorkerDeps, delivery: &Delivery) {
    if let Err(e) = deps.broker.requeue(&delivery.broker_message_id).await {
        warn!(message_id = %delivery.broker_message_id, error = %e, "requeue failed");
    }
}
