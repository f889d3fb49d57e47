//
// checkpoint.rs
// dicom-deid
//
// Durable record of completed units: one source key per line, loaded into a set at startup.
//
// dicom-deid contributors - October 2026

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{DeidError, Result};

/// Append-only set of completed unit keys.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    file: File,
    done: HashSet<String>,
}

impl Checkpoint {
    /// Opens (or creates) the checkpoint file and loads every completed key.
    ///
    /// A trailing line without a newline is a torn write from an interrupted run;
    /// it is truncated away so the unit counts as not done and later appends start cleanly.
    pub fn open(path: &Path) -> Result<Self> {
        let context = || format!("opening checkpoint {}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DeidError::io(context(), e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| DeidError::io(context(), e))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| DeidError::io(context(), e))?;

        let complete_len = complete_prefix_len(&contents);
        if complete_len < contents.len() {
            warn!(checkpoint = %path.display(), "discarding incomplete trailing checkpoint entry");
            file.set_len(complete_len as u64)
                .and_then(|_| file.sync_data())
                .map_err(|e| DeidError::io(context(), e))?;
        }
        let done = completed_keys(&contents[..complete_len]);
        info!(checkpoint = %path.display(), completed = done.len(), "loaded checkpoint");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            done,
        })
    }

    /// Number of completed keys already recorded at `path`, without creating or repairing it.
    pub fn count_completed(path: &Path) -> Result<usize> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(completed_keys(&contents[..complete_prefix_len(&contents)]).len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(DeidError::io(format!("reading checkpoint {}", path.display()), e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Durably marks `key` as done. Recording an already-present key is a no-op.
    pub fn record(&mut self, key: &str) -> Result<()> {
        if key.is_empty() || key.contains(['\n', '\r']) {
            return Err(DeidError::InvalidInput(format!(
                "checkpoint key {key:?} cannot be stored on one line"
            )));
        }
        if self.done.contains(key) {
            return Ok(());
        }

        let context = || format!("appending to checkpoint {}", self.path.display());
        self.file
            .write_all(format!("{key}\n").as_bytes())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| DeidError::io(context(), e))?;
        self.done.insert(key.to_string());
        Ok(())
    }
}

/// Length of the newline-terminated part of `contents`.
fn complete_prefix_len(contents: &str) -> usize {
    contents.rfind('\n').map_or(0, |end| end + 1)
}

fn completed_keys(complete: &str) -> HashSet<String> {
    complete
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
