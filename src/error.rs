//
// error.rs
// dicom-deid
//
// Error taxonomy shared by the substitution engine, the batch pipeline and its collaborators.
//
// dicom-deid contributors - October 2026

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::transfer::TransferError;

pub type Result<T, E = DeidError> = std::result::Result<T, E>;

/// Everything the engine and the batch pipeline can fail with.
///
/// Only [`DeidError::NotApplicable`] is recoverable per file; the batch runner
/// aborts the whole run on every other variant.
#[derive(Debug, Error)]
pub enum DeidError {
    #[error("{path:?} is not a DICOM file: {reason}")]
    NotApplicable { path: PathBuf, reason: String },

    #[error("burned-in annotation detected in {path:?}")]
    GuardViolation { path: PathBuf },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transfer of {artifact:?} failed")]
    TransferFailure {
        artifact: PathBuf,
        #[source]
        source: TransferError,
    },

    #[error("refusing to overwrite existing map file {path:?}; rename it or choose another path")]
    LedgerConflict { path: PathBuf },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("error while processing {path:?}: {message}")]
    Processing { path: PathBuf, message: String },
}

impl DeidError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        DeidError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wraps a failure from the DICOM stack, keeping its message.
    pub fn processing(path: &Path, context: &str, cause: impl fmt::Display) -> Self {
        DeidError::Processing {
            path: path.to_path_buf(),
            message: format!("{context}: {cause}"),
        }
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, DeidError::NotApplicable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_applicable_is_recoverable() {
        let skip = DeidError::NotApplicable {
            path: PathBuf::from("notes.txt"),
            reason: "missing DICM magic".into(),
        };
        assert!(skip.is_not_applicable());

        let conflict = DeidError::LedgerConflict {
            path: PathBuf::from("map.csv"),
        };
        assert!(!conflict.is_not_applicable());
        assert!(conflict.to_string().contains("map.csv"));
    }
}
