//! Per-job staging directories.
//!
//! Each job gets a private subtree under the worker's work root. The
//! directory is removed when the `StagingArea` is dropped, so cleanup
//! happens on success, failure, and unwinds alike; the orchestrator also
//! calls [`StagingArea::cleanup`] explicitly on the orderly path.

use std::path::{Path, PathBuf};

use crate::error::CoreResult;
use crate::job::JobId;

/// Private working directory for one job.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    cleaned: bool,
}

impl StagingArea {
    /// Create `{work_root}/staging/{job_id}` with a `source` subtree.
    pub fn create(work_root: &Path, job_id: JobId) -> CoreResult<Self> {
        let root = work_root.join("staging").join(job_id.to_string());
        std::fs::create_dir_all(root.join("source"))?;
        Ok(Self {
            root,
            cleaned: false,
        })
    }

    /// The staging root itself.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the uploaded archive is extracted.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("source")
    }

    /// Remove the whole subtree now instead of waiting for drop.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.root.display(), error = %err, "Failed to remove staging area");
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.remove();
    }
}
