use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{BatchError, Result};

/// Random characters appended to staged names. tempfile draws them from
/// `[A-Za-z0-9]`, so a letter-led prefix keeps the name a valid identifier.
const NAME_RAND_LEN: usize = 12;

/// One submitted payload on disk: a private directory holding a single
/// uniquely named source file. The directory is the child's working directory.
///
/// Dropping the unit releases it, so every exit path cleans up.
#[derive(Debug)]
pub struct StagedUnit {
    dir: Option<TempDir>,
    workdir: PathBuf,
    path: PathBuf,
    name: String,
    file_name: String,
}

impl StagedUnit {
    /// Write `code` into a fresh private directory under `root`.
    ///
    /// `extension` is given without the dot; an empty extension produces a
    /// bare file name.
    pub fn stage(root: &Path, prefix: &str, extension: &str, code: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("batch-mcp-")
            .tempdir_in(root)
            .map_err(|e| {
                BatchError::StagingFailed(format!(
                    "cannot create staging directory in {}: {}",
                    root.display(),
                    e
                ))
            })?;

        let suffix = if extension.is_empty() {
            String::new()
        } else {
            format!(".{}", extension)
        };

        // On any error below `dir` drops and takes the partial unit with it.
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&suffix)
            .rand_bytes(NAME_RAND_LEN)
            .tempfile_in(dir.path())
            .map_err(|e| BatchError::StagingFailed(format!("cannot create code file: {}", e)))?;

        file.write_all(code.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| BatchError::StagingFailed(format!("cannot write code file: {}", e)))?;

        // The directory owns cleanup from here on.
        let (_, path) = file
            .keep()
            .map_err(|e| BatchError::StagingFailed(format!("cannot persist code file: {}", e)))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let workdir = dir.path().to_path_buf();

        debug!(name = %name, dir = %workdir.display(), bytes = code.len(), "Staged code");

        Ok(Self {
            dir: Some(dir),
            workdir,
            path,
            name,
            file_name,
        })
    }

    /// Identifier without extension, e.g. `matlab_code_Xa81kQ0pLm3Z`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the staged directory. Safe to call more than once; failures are
    /// logged, never returned.
    pub fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(name = %self.name, "Released staged code"),
                Err(e) => warn!(
                    name = %self.name,
                    dir = %self.workdir.display(),
                    error = %e,
                    "Failed to remove staging directory"
                ),
            }
        }
    }
}

impl Drop for StagedUnit {
    fn drop(&mut self) {
        self.release();
    }
}
