//! PID marker file written at startup and removed best-effort at teardown.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, DaemonError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| io_err(format!("create {}", parent.display()), e))?;
        }
        fs::write(path, format!("{}\n", std::process::id()))
            .map_err(|e| io_err(format!("write {}", path.display()), e))?;
        tracing::debug!(path = %path.display(), "pid file written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now. Same as dropping the guard.
    pub fn remove(self) {
        drop(self);
    }
}

/// Best-effort removal, also on unwind. Failures are logged and ignored.
impl Drop for PidFile {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "removing pid file");
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "pid file removal failed");
            }
        }
    }
}
