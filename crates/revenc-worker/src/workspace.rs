//! Per-job filesystem workspace.
//!
//! Each job owns a directory under the cache root for the job's
//! lifetime: the merged input, the optional thumbnail, and the
//! encoded output live here. The directory must be gone once the job
//! reaches a terminal status.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Name of the fully-downloaded merged input artifact.
const MERGED_INPUT: &str = "merged_input.mkv";

/// Name used while the download is still in flight.
const MERGED_INPUT_PARTIAL: &str = "merged_input.partial";

/// Name of the downloaded thumbnail.
const THUMBNAIL: &str = "thumb.jpg";

/// A job's workspace directory.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace for a task under the cache root.
    #[must_use]
    pub fn new(cache_dir: &Path, task_id: &str) -> Self {
        Self {
            root: cache_dir.join(task_id),
        }
    }

    /// Create the directory if it does not exist yet.
    pub async fn ensure(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// The workspace directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Path of the completed merged input.
    #[must_use]
    pub fn merged_input(&self) -> PathBuf {
        self.root.join(MERGED_INPUT)
    }

    /// Path the download writes to before completion.
    ///
    /// Renamed to [`Self::merged_input`] once every source part has
    /// been appended, so a crash mid-download never leaves a partial
    /// file that looks complete.
    #[must_use]
    pub fn merged_input_partial(&self) -> PathBuf {
        self.root.join(MERGED_INPUT_PARTIAL)
    }

    /// Path of the downloaded thumbnail.
    #[must_use]
    pub fn thumbnail(&self) -> PathBuf {
        self.root.join(THUMBNAIL)
    }

    /// Path of the encoded output for a given final filename.
    #[must_use]
    pub fn output(&self, final_filename: &str) -> PathBuf {
        self.root.join(final_filename)
    }

    /// Whether a completed merged input from a previous run exists.
    ///
    /// When it does, the I/O stage skips the download and jumps
    /// straight to analysis (resume after crash).
    #[must_use]
    pub fn has_merged_input(&self) -> bool {
        self.merged_input().is_file()
    }

    /// Promote the partial download to the completed merged input.
    pub async fn commit_merged_input(&self) -> io::Result<()> {
        tokio::fs::rename(self.merged_input_partial(), self.merged_input()).await
    }

    /// Remove the workspace and everything in it.
    ///
    /// Safe to call multiple times; failures are logged, not
    /// propagated, because cleanup runs on paths that already carry
    /// an error.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(dir = %self.root.display(), "workspace removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.root.display(), error = %e, "workspace removal failed"),
        }
    }
}
