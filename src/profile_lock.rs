use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("profile {profile} is already driven by another process ({path})")]
    Held { profile: String, path: PathBuf },

    #[error("failed to create lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive per-profile lock file, removed on drop.
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    pub fn acquire(dir: &Path, profile: &str) -> Result<Self, LockError> {
        let path = dir.join(format!("{profile}.lock"));
        std::fs::create_dir_all(dir).map_err(|source| LockError::Io { path: path.clone(), source })?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Held { profile: profile.to_string(), path });
            }
            Err(source) => return Err(LockError::Io { path, source }),
        };
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            tracing::warn!("failed to write pid to {}: {e}", path.display());
        }

        tracing::info!("acquired profile lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("failed to remove profile lock {}: {e}", self.path.display());
        }
    }
}
