//
// transfer.rs
// dicom-deid
//
// Transfer collaborator: moves an anonymized artifact to its remote destination and
// removes the local copy once the destination holds it.
//
// dicom-deid contributors - October 2026

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("association with {addr} failed: {message}")]
    Association { addr: String, message: String },

    #[error("remote store rejected the object with status {status:#06X}")]
    Rejected { status: u16 },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },
}

impl TransferError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Moves one local artifact to the destination. On `Ok` the local file is gone.
pub trait Transfer: Send + Sync {
    fn send(&self, artifact: &Path) -> Result<(), TransferError>;

    /// Human-readable destination, for logs.
    fn destination(&self) -> String;
}

impl<T: Transfer + ?Sized> Transfer for Box<T> {
    fn send(&self, artifact: &Path) -> Result<(), TransferError> {
        (**self).send(artifact)
    }

    fn destination(&self) -> String {
        (**self).destination()
    }
}

/// Transfer into a directory, typically a mounted remote share.
#[derive(Debug, Clone)]
pub struct DirectoryTransfer {
    root: PathBuf,
}

impl DirectoryTransfer {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, TransferError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| TransferError::io(format!("creating {}", root.display()), e))?;
        Ok(Self { root })
    }
}

impl Transfer for DirectoryTransfer {
    fn send(&self, artifact: &Path) -> Result<(), TransferError> {
        let name = artifact.file_name().ok_or_else(|| {
            TransferError::io(
                format!("{} has no file name", artifact.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "missing file name"),
            )
        })?;
        let target = self.root.join(name);
        let mut staging_name = name.to_os_string();
        staging_name.push(".partial");
        let staging = self.root.join(staging_name);

        // Copy under a staging name and rename so the destination never exposes a torn file.
        fs::copy(artifact, &staging)
            .map_err(|e| TransferError::io(format!("copying to {}", staging.display()), e))?;
        File::open(&staging)
            .and_then(|f| f.sync_all())
            .map_err(|e| TransferError::io(format!("syncing {}", staging.display()), e))?;
        fs::rename(&staging, &target)
            .map_err(|e| TransferError::io(format!("publishing {}", target.display()), e))?;
        fs::remove_file(artifact)
            .map_err(|e| TransferError::io(format!("removing {}", artifact.display()), e))
    }

    fn destination(&self) -> String {
        self.root.display().to_string()
    }
}

/// Retries the wrapped transfer with exponential backoff.
pub struct RetryingTransfer<T> {
    inner: T,
    attempts: u32,
    initial_delay: Duration,
}

impl<T: Transfer> RetryingTransfer<T> {
    pub fn new(inner: T, attempts: u32, initial_delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            initial_delay,
        }
    }
}

impl<T: Transfer> Transfer for RetryingTransfer<T> {
    fn send(&self, artifact: &Path) -> Result<(), TransferError> {
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match self.inner.send(artifact) {
                Ok(()) => {
                    if attempt > 1 {
                        info!(attempt, artifact = %artifact.display(), "transfer succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) if attempt >= self.attempts => {
                    return Err(TransferError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        artifact = %artifact.display(),
                        error = %e,
                        "transfer failed, retrying"
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    fn destination(&self) -> String {
        self.inner.destination()
    }
}
