//! PID file used by `reset` and `stop` to find the running instance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("failed to access pid file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pid file {} does not contain a process id: `{content}`", .path.display())]
    Invalid { path: PathBuf, content: String },
}

/// A PID file written by this process.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`.
    pub fn create(path: &Path) -> Result<Self, PidFileError> {
        fs::write(path, std::process::id().to_string()).map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "PID file written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Read the process id recorded at `path`.
    pub fn read(path: &Path) -> Result<i32, PidFileError> {
        let content = fs::read_to_string(path).map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        content.trim().parse().map_err(|_| PidFileError::Invalid {
            path: path.to_path_buf(),
            content: content.trim().to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> Result<(), PidFileError> {
        fs::remove_file(&self.path).map_err(|source| PidFileError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
