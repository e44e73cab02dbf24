//! Scratch directory management for conversion jobs.
//!
//! A [`ScratchDir`] owns a uniquely named temporary directory for one job:
//!
//! ```text
//! <root>/job-XXXXXX/
//!     input.<ext>     uploaded bytes
//!     profile/        engine user profile, private to this job
//!     out/            engine output directory
//! ```
//!
//! None of the names come from client input. The directory is removed when
//! the value is dropped.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PROFILE_DIR: &str = "profile";
const OUTPUT_DIR: &str = "out";

/// Per-job temporary directory.
///
/// # Example
///
/// ```no_run
/// use lc_engine::ScratchDir;
///
/// let job = ScratchDir::new(std::path::Path::new("/tmp/libre-convert"), "docx").unwrap();
/// std::fs::write(job.input(), b"...").unwrap();
/// // ... run the engine against job.input(), writing into job.output_dir() ...
/// drop(job); // directory and contents are gone
/// ```
#[derive(Debug)]
pub struct ScratchDir {
    temp_dir: TempDir,
    input_path: PathBuf,
}

impl ScratchDir {
    /// Create a new scratch directory under `root` for an input of the given
    /// (already validated) extension.
    ///
    /// `root` is created if missing. The profile and output subdirectories
    /// are created up front.
    ///
    /// This touches the filesystem synchronously; async callers use
    /// [`ScratchDir::create`].
    pub fn new(root: &Path, input_ext: &str) -> lc_core::Result<Self> {
        std::fs::create_dir_all(root)?;

        let temp_dir = tempfile::Builder::new().prefix("job-").tempdir_in(root)?;

        std::fs::create_dir(temp_dir.path().join(PROFILE_DIR))?;
        std::fs::create_dir(temp_dir.path().join(OUTPUT_DIR))?;

        let input_path = temp_dir.path().join(format!("input.{input_ext}"));

        Ok(Self {
            temp_dir,
            input_path,
        })
    }

    /// [`ScratchDir::new`] on the blocking thread pool.
    pub async fn create(root: &Path, input_ext: &str) -> lc_core::Result<Self> {
        let root = root.to_path_buf();
        let input_ext = input_ext.to_string();
        tokio::task::spawn_blocking(move || Self::new(&root, &input_ext))
            .await
            .map_err(|e| lc_core::Error::Internal(format!("scratch dir task failed: {e}")))?
    }

    /// Path to the scratch directory itself.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where the uploaded bytes are staged.
    pub fn input(&self) -> &Path {
        &self.input_path
    }

    /// Engine profile directory, private to this job.
    pub fn profile_dir(&self) -> PathBuf {
        self.temp_dir.path().join(PROFILE_DIR)
    }

    /// Directory the engine writes its output into.
    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join(OUTPUT_DIR)
    }
}
