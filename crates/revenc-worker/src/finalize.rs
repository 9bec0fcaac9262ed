//! Terminal cleanup shared by both stages.
//!
//! Whatever went wrong, the first exit from a stage must leave the
//! job in a terminal status, the status message edited to the
//! terminal line, and the workspace gone.

use tracing::{error, warn};

use revenc_core::JobError;
use revenc_core::domain::{Job, JobStatus};

use crate::deps::WorkerDeps;
use crate::workspace::Workspace;

/// Drive a failed or cancelled job to its terminal state.
///
/// Idempotent and racing-safe: if cancellation already moved the
/// status, the existing terminal state is kept.
pub async fn finalize_failure(deps: &WorkerDeps, job: &Job, workspace: &Workspace, err: &JobError) {
    let target = if err.is_cancelled() {
        JobStatus::Cancelled
    } else {
        error!(task_id = %job.task_id, error = %err, "job failed");
        JobStatus::Failed
    };

    // Walk to terminal; a concurrent cancellation winning the CAS is
    // fine, the job is terminal either way.
    for _ in 0..3 {
        match deps.store.get_job(&job.task_id).await {
            Ok(Some(current)) if !current.status.is_terminal() => {
                match deps
                    .store
                    .update_status(&job.task_id, current.status, target)
                    .await
                {
                    Ok(()) => break,
                    Err(e) if e.is_cas_rejected() => {}
                    Err(e) => {
                        warn!(task_id = %job.task_id, error = %e, "terminal status write failed");
                        break;
                    }
                }
            }
            Ok(_) => break,
            Err(e) => {
                warn!(task_id = %job.task_id, error = %e, "terminal status read failed");
                break;
            }
        }
    }

    let text = err.user_message();
    if let Err(e) = deps.media.edit_status(&job.status_message, &text).await {
        warn!(task_id = %job.task_id, error = %e, "terminal status edit failed");
    }

    workspace.remove().await;
    deps.broker.release_termination_token(&job.task_id);
}
