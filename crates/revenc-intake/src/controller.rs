//! The intake controller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use revenc_core::domain::{
    CpuQueue, Job, JobData, JobRequest, JobStatus, MessageRef, SubmitReceipt,
};
use revenc_core::ports::{
    JobStore, MediaClient, QueueBroker, QueueName, TaskKind, TaskMessage, UserStore,
};
use revenc_core::{Config, JobError, standardize_filename};

use crate::error::IntakeError;
use crate::pending::{CollectOutcome, PartsReady, PendingBucket, is_split_part};

/// Quiescence window for multipart coalescing.
const COALESCE_WINDOW: Duration = Duration::from_secs(30);

/// Orchestrates job submission, multipart coalescing, cancellation,
/// and acceleration.
///
/// Per-user pending buckets are the only process-wide mutable state;
/// distinct users touch disjoint keys, and same-user operations
/// serialize on the bucket map lock.
pub struct IntakeController {
    store: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    broker: Arc<dyn QueueBroker>,
    media: Arc<dyn MediaClient>,
    config: Arc<Config>,
    pending: Arc<Mutex<HashMap<i64, PendingBucket>>>,
    parts_tx: mpsc::UnboundedSender<PartsReady>,
    coalesce_window: Duration,
}

impl IntakeController {
    /// Create a controller and the receiver for parts-ready
    /// announcements (consumed by the chat surface).
    pub fn new(
        store: Arc<dyn JobStore>,
        users: Arc<dyn UserStore>,
        broker: Arc<dyn QueueBroker>,
        media: Arc<dyn MediaClient>,
        config: Arc<Config>,
    ) -> (Self, mpsc::UnboundedReceiver<PartsReady>) {
        let (parts_tx, parts_rx) = mpsc::unbounded_channel();
        let controller = Self {
            store,
            users,
            broker,
            media,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            parts_tx,
            coalesce_window: COALESCE_WINDOW,
        };
        (controller, parts_rx)
    }

    /// Override the coalesce window (tests).
    #[must_use]
    pub const fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    /// Whether this user may use the service at all.
    #[must_use]
    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.config.admin_user_ids.contains(&user_id)
    }

    /// Submit a validated job request.
    ///
    /// Allocates the task id, snapshots settings, standardizes the
    /// output filename, persists the `QUEUED` record, and enqueues
    /// the I/O stage with the task id as the broker correlation id.
    pub async fn submit(&self, mut request: JobRequest) -> Result<SubmitReceipt, IntakeError> {
        if !self.is_authorized(request.user_id) {
            return Err(IntakeError::PermissionDenied);
        }
        validate_sorted(&mut request)?;

        // Every source must be fetchable now; the first one also
        // donates the thumbnail and the display filename.
        let mut first_meta = None;
        for message_ref in &request.source_message_refs {
            let meta = self
                .media
                .fetch_message(message_ref.chat_id, message_ref.message_id)
                .await
                .map_err(|e| {
                    JobError::source_unavailable(format!(
                        "message {}: {e}",
                        message_ref.message_id
                    ))
                })?;
            if first_meta.is_none() {
                first_meta = Some(meta);
            }
        }
        let first_meta = first_meta.expect("validated request has at least one ref");

        // Snapshot: the stored settings are authoritative, with any
        // values the confirmation surface carried layered on top.
        let mut settings = self.users.get_settings(request.user_id).await?;
        if !request.user_settings.brand_name.is_empty() {
            settings.brand_name.clone_from(&request.user_settings.brand_name);
        }
        if !request.user_settings.website.is_empty() {
            settings.website.clone_from(&request.user_settings.website);
        }
        if request.user_settings.custom_thumbnail_ref.is_some() {
            settings
                .custom_thumbnail_ref
                .clone_from(&request.user_settings.custom_thumbnail_ref);
        }
        let settings = settings.with_defaults(
            &self.config.branding.brand_name,
            &self.config.branding.website,
        );
        let display_filename = first_meta
            .file_name
            .clone()
            .unwrap_or_else(|| request.proposed_filename.clone());
        let final_filename = standardize_filename(
            &request.proposed_filename,
            request.quality,
            &settings.brand_name,
        );

        let task_id = Uuid::new_v4().to_string();
        let status_message = self
            .media
            .send_status(request.user_id, "Job accepted. Waiting for a download slot…")
            .await?;

        let thumbnail_ref = settings
            .custom_thumbnail_ref
            .clone()
            .or(first_meta.thumbnail);
        let job = Job {
            task_id: task_id.clone(),
            user_id: request.user_id,
            filename: display_filename,
            status: JobStatus::Queued,
            status_message,
            broker_message_id: None,
            job_data: JobData {
                source_message_refs: request.source_message_refs.clone(),
                quality: request.quality,
                preset: request.preset,
                final_filename,
                cpu_queue: CpuQueue::Default,
                thumbnail_ref,
                user_settings: settings,
            },
        };
        self.store.put_job(&job).await?;

        let broker_message_id = self
            .broker
            .enqueue(QueueName::Io, TaskMessage::new(TaskKind::Io, task_id.as_str()))
            .await?;
        self.store
            .set_broker_message_id(&task_id, Some(broker_message_id))
            .await?;

        info!(
            task_id,
            user_id = request.user_id,
            parts = request.source_message_refs.len(),
            quality = %request.quality,
            "job submitted"
        );
        Ok(SubmitReceipt {
            task_id,
            status_message,
        })
    }

    /// Cancel a job.
    ///
    /// Idempotent: cancelling an already-terminal job succeeds
    /// without doing anything.
    pub async fn cancel(&self, task_id: &str, user_id: i64) -> Result<(), IntakeError> {
        let job = self
            .store
            .get_job(task_id)
            .await?
            .ok_or_else(|| IntakeError::NotFound(task_id.to_string()))?;
        if !job.is_owned_by(user_id) {
            return Err(IntakeError::PermissionDenied);
        }
        if job.status.is_terminal() {
            debug!(task_id, "cancel of terminal job is a no-op");
            return Ok(());
        }

        // The status flips first so every worker CAS from here on
        // loses; the revoke then removes queued work and kills a
        // running encode.
        let mut current = job.status;
        for _ in 0..3 {
            match self
                .store
                .update_status(task_id, current, JobStatus::Cancelled)
                .await
            {
                Ok(()) => break,
                Err(e) if e.is_cas_rejected() => {
                    match self.store.get_job(task_id).await?.map(|j| j.status) {
                        Some(status) if !status.is_terminal() => current = status,
                        _ => return Ok(()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.broker.revoke(task_id, true).await?;

        if let Err(e) = self
            .media
            .edit_status(&job.status_message, "Cancelled by user")
            .await
        {
            warn!(task_id, error = %e, "cancel status edit failed");
        }
        info!(task_id, user_id, "job cancelled");
        Ok(())
    }

    /// Accelerate a job onto the high-priority CPU queue.
    ///
    /// Only queued work moves: anything already past `ANALYZING`
    /// returns `NotAccelerable`. The external task id never changes;
    /// only the broker message is re-issued.
    pub async fn accelerate(&self, task_id: &str, user_id: i64) -> Result<(), IntakeError> {
        let job = self
            .store
            .get_job(task_id)
            .await?
            .ok_or_else(|| IntakeError::NotFound(task_id.to_string()))?;
        if !job.is_owned_by(user_id) {
            return Err(IntakeError::PermissionDenied);
        }
        if job.past_analysis() {
            return Err(IntakeError::NotAccelerable);
        }
        if job.job_data.cpu_queue == CpuQueue::HighPriority {
            debug!(task_id, "job already high priority");
            return Ok(());
        }

        // From here on, an I/O worker doing the hand-off will target
        // the high-priority queue by itself.
        self.store
            .set_cpu_queue(task_id, CpuQueue::HighPriority)
            .await?;

        // If the encode task is already sitting on the default queue,
        // move it. A claimed or missing message means the hand-off is
        // in flight; the queue rewrite above is then sufficient or
        // moot, respectively.
        if job.status != JobStatus::Queued {
            if let Some(ref broker_message_id) = job.broker_message_id {
                if let Some(message) = self.broker.take_queued(broker_message_id).await? {
                    if message.kind == TaskKind::Encode {
                        let new_id = self
                            .broker
                            .enqueue(QueueName::HighPriority, message)
                            .await?;
                        self.store
                            .set_broker_message_id(task_id, Some(new_id))
                            .await?;
                    } else {
                        // Raced the I/O stage start; put it back.
                        let restored = self.broker.enqueue(QueueName::Io, message).await?;
                        self.store
                            .set_broker_message_id(task_id, Some(restored))
                            .await?;
                    }
                }
            }
        }

        if let Err(e) = self
            .media
            .edit_status(&job.status_message, "Accelerated: moved to the high-priority queue")
            .await
        {
            warn!(task_id, error = %e, "accelerate status edit failed");
        }
        info!(task_id, user_id, "job accelerated");
        Ok(())
    }

    /// Collect an incoming media message into the multipart flow.
    ///
    /// Non-split files pass through for direct picker presentation;
    /// split parts land in the user's bucket and reset its timer.
    pub fn collect_part(
        &self,
        user_id: i64,
        message_ref: MessageRef,
        file_name: &str,
    ) -> CollectOutcome {
        if !is_split_part(file_name) {
            return CollectOutcome::NotSplitPart;
        }

        let mut pending = self.pending.lock().expect("pending buckets poisoned");
        let bucket = pending.entry(user_id).or_default();
        bucket.refs.push(message_ref);
        let parts = bucket.refs.len();

        if let Some(timer) = bucket.timer.take() {
            timer.abort();
        }
        let pending_map = Arc::clone(&self.pending);
        let parts_tx = self.parts_tx.clone();
        let window = self.coalesce_window;
        bucket.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let refs = {
                let pending = pending_map.lock().expect("pending buckets poisoned");
                pending.get(&user_id).map(PendingBucket::sorted_refs)
            };
            if let Some(message_refs) = refs {
                if !message_refs.is_empty() {
                    debug!(user_id, parts = message_refs.len(), "part set went quiet");
                    let _ = parts_tx.send(PartsReady {
                        user_id,
                        message_refs,
                    });
                }
            }
        }));

        debug!(user_id, parts, file_name, "split part collected");
        CollectOutcome::Collected { parts }
    }

    /// Consume a user's pending part set (on picker confirmation).
    ///
    /// Returns the refs in ascending message-id order; the bucket and
    /// its timer are gone afterwards.
    #[must_use]
    pub fn consume_pending(&self, user_id: i64) -> Option<Vec<MessageRef>> {
        let mut pending = self.pending.lock().expect("pending buckets poisoned");
        pending.remove(&user_id).map(|bucket| bucket.sorted_refs())
    }

    /// Format the user's active queue for display.
    pub async fn queue_view(&self, user_id: i64) -> Result<String, IntakeError> {
        let jobs = self.store.list_active_by_user(user_id).await?;
        if jobs.is_empty() {
            return Ok("Your queue is empty".to_string());
        }
        let mut view = String::from("Your active queue:\n");
        for (index, job) in jobs.iter().enumerate() {
            view.push_str(&format!(
                "{}. {} → {}\n",
                index + 1,
                job.filename,
                job.status
            ));
        }
        Ok(view)
    }
}

/// Sort the request's refs into ascending message-id order, then
/// validate the result.
fn validate_sorted(request: &mut JobRequest) -> Result<(), JobError> {
    request.source_message_refs.sort_by_key(|r| r.message_id);
    request.validate()
}
