//! Per-job scratch directories.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use eyetest_models::JobId;

use crate::error::MediaResult;

/// A scratch directory owned by one job.
///
/// Dropping it removes the directory and everything in it, unless
/// [`retain`](Self::retain) was called first.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under `root` (created if missing).
    pub fn create(root: &Path, job_id: &JobId) -> MediaResult<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("eyetest-{}-", job_id))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!(job_id = %job_id, path = %path.display(), "Created scratch directory");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Keep the directory on disk for diagnostics; returns its path.
    pub fn retain(mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            let path = dir.keep();
            info!(path = %path.display(), "Retaining scratch directory for diagnostics");
            return path;
        }
        self.path.clone()
    }

    /// Remove the directory now, reporting failures.
    pub fn cleanup(mut self) -> MediaResult<()> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), "Failed to remove scratch directory: {}", e);
            }
        }
    }
}
