//
// batch.rs
// dicom-deid
//
// Batch orchestration: walks the discovered files, anonymizes, writes, optionally transfers,
// and checkpoints each unit; already-checkpointed units are skipped on resume.
//
// dicom-deid contributors - October 2026

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::checkpoint::Checkpoint;
use crate::codec;
use crate::dicom_access::ElementAccess;
use crate::discovery::discover;
use crate::engine::Engine;
use crate::error::{DeidError, Result};
use crate::models::{RunSummary, UnitOutcome};
use crate::transfer::Transfer;

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Output directory; files are rewritten in place when absent.
    pub output_directory: Option<PathBuf>,
    /// Checkpoint file enabling resume.
    pub checkpoint: Option<PathBuf>,
    /// Worker threads; 0 and 1 both mean sequential, in discovery order.
    pub jobs: usize,
}

impl RunConfig {
    /// Checks the run layout before anything is created on disk.
    ///
    /// Transfer and checkpointing both need a separate output directory: in place, a
    /// crash between writing and recording would leave an anonymized source that a resume
    /// anonymizes again. Resuming a non-empty checkpoint needs the seed of the earlier run.
    pub fn validate(&self, with_transfer: bool, explicit_seed: bool) -> Result<()> {
        if self.output_directory.is_none() {
            if with_transfer {
                return Err(DeidError::InvalidArgument(
                    "transfer requires an output directory; in-place anonymization would send and delete the sources".into(),
                ));
            }
            if self.checkpoint.is_some() {
                return Err(DeidError::InvalidArgument(
                    "a checkpoint requires an output directory; in-place output cannot be resumed safely".into(),
                ));
            }
        }

        if let Some(checkpoint) = &self.checkpoint {
            if !explicit_seed && Checkpoint::count_completed(checkpoint)? > 0 {
                return Err(DeidError::InvalidArgument(format!(
                    "{} already lists completed files; resume with the seed of that run",
                    checkpoint.display()
                )));
            }
        }
        Ok(())
    }
}

pub struct BatchRunner<'a> {
    engine: &'a Engine,
    transfer: Option<&'a dyn Transfer>,
    output_directory: Option<PathBuf>,
    checkpoint: Option<Mutex<Checkpoint>>,
    jobs: usize,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: &'a Engine, config: RunConfig, transfer: Option<&'a dyn Transfer>) -> Result<Self> {
        config.validate(transfer.is_some(), engine.has_explicit_seed())?;
        if let Some(dir) = &config.output_directory {
            fs::create_dir_all(dir)
                .map_err(|e| DeidError::io(format!("creating {}", dir.display()), e))?;
        }
        let checkpoint = config
            .checkpoint
            .as_deref()
            .map(Checkpoint::open)
            .transpose()?
            .map(Mutex::new);

        Ok(Self {
            engine,
            transfer,
            output_directory: config.output_directory,
            checkpoint,
            jobs: config.jobs.max(1),
        })
    }

    /// Processes every file reachable from `sources`. The first fatal error aborts the run.
    pub fn run(&self, sources: &[String]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if self.jobs == 1 {
            for path in discover(sources) {
                let outcome = self.process_unit(&path?)?;
                summary.tally(&outcome);
            }
        } else {
            let paths = discover(sources).collect::<Result<Vec<_>>>()?;
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.jobs)
                .build()
                .map_err(|e| DeidError::InvalidArgument(format!("cannot start {} workers: {e}", self.jobs)))?;
            let outcomes = pool.install(|| {
                paths
                    .par_iter()
                    .map(|path| self.process_unit(path))
                    .collect::<Result<Vec<_>>>()
            })?;
            outcomes.iter().for_each(|outcome| summary.tally(outcome));
        }

        summary.new_identifiers = self.engine.registry().recorded()?;
        info!(
            discovered = summary.discovered,
            completed = summary.completed,
            resumed = summary.resumed,
            not_applicable = summary.not_applicable,
            transferred = summary.transferred,
            "batch finished"
        );
        Ok(summary)
    }

    /// Runs one unit to completion or returns the error that must abort the run.
    pub fn process_unit(&self, path: &Path) -> Result<UnitOutcome> {
        self.try_process_unit(path).map_err(|e| {
            error!(file = %path.display(), error = %e, "error while converting file; aborting");
            e
        })
    }

    fn try_process_unit(&self, path: &Path) -> Result<UnitOutcome> {
        let key = unit_key(path)?;
        if self.is_done(&key)? {
            debug!(file = %path.display(), "already completed, skipping");
            return Ok(UnitOutcome::AlreadyDone);
        }

        let mut obj = match codec::read_record(path) {
            Ok(obj) => obj,
            Err(e) if e.is_not_applicable() => {
                info!(file = %path.display(), "file appears not to be DICOM; skipping");
                return Ok(UnitOutcome::NotApplicable);
            }
            Err(e) => return Err(e),
        };

        self.engine.process_record(&mut obj, path)?;

        let output = self.output_path(path, &key, &obj);
        codec::write_record(&obj, &output)?;

        // Only the freshly written, anonymized artifact is ever handed to the transfer.
        let transferred = match self.transfer {
            Some(transfer) => {
                transfer
                    .send(&output)
                    .map_err(|source| DeidError::TransferFailure {
                        artifact: output.clone(),
                        source,
                    })?;
                debug!(output = %output.display(), destination = %transfer.destination(), "transferred");
                true
            }
            None => false,
        };

        self.mark_done(&key)?;
        info!(file = %path.display(), output = %output.display(), transferred, "anonymized");
        Ok(UnitOutcome::Completed {
            output,
            transferred,
        })
    }

    /// `<anonymized SOPInstanceUID>.dcm` in the output directory, or the source itself.
    fn output_path(&self, source: &Path, key: &str, obj: &dicom::object::DefaultDicomObject) -> PathBuf {
        let Some(dir) = &self.output_directory else {
            return source.to_path_buf();
        };
        let stem = obj
            .sop_instance_uid()
            .unwrap_or_else(|| self.engine.randomizer().derive_text(key).to_hex());
        dir.join(format!("{stem}.dcm"))
    }

    fn is_done(&self, key: &str) -> Result<bool> {
        match &self.checkpoint {
            Some(checkpoint) => Ok(lock(checkpoint)?.contains(key)),
            None => Ok(false),
        }
    }

    fn mark_done(&self, key: &str) -> Result<()> {
        match &self.checkpoint {
            Some(checkpoint) => lock(checkpoint)?.record(key),
            None => Ok(()),
        }
    }
}

/// Stable checkpoint key: the canonical absolute path of the source, which must be UTF-8.
fn unit_key(path: &Path) -> Result<String> {
    let canonical = fs::canonicalize(path)
        .map_err(|e| DeidError::io(format!("resolving {}", path.display()), e))?;
    canonical.into_os_string().into_string().map_err(|raw| {
        DeidError::InvalidInput(format!(
            "{} is not valid UTF-8 and cannot be checkpointed",
            Path::new(&raw).display()
        ))
    })
}

fn lock(checkpoint: &Mutex<Checkpoint>) -> Result<std::sync::MutexGuard<'_, Checkpoint>> {
    checkpoint.lock().map_err(|_| {
        DeidError::io(
            "checkpoint lock poisoned",
            std::io::Error::new(std::io::ErrorKind::Other, "a worker panicked while holding the lock"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::transfer::DirectoryTransfer;
    use tempfile::tempdir;

    fn engine() -> Engine {
        Engine::new(EngineConfig {
            seed: Some("test123".into()),
            ..EngineConfig::default()
        })
        .expect("engine")
    }

    #[test]
    fn transfer_without_output_directory_is_rejected() {
        let dir = tempdir().expect("tmpdir");
        let engine = engine();
        let transfer = DirectoryTransfer::new(dir.path().join("remote")).expect("transfer");
        let result = BatchRunner::new(&engine, RunConfig::default(), Some(&transfer));
        assert!(matches!(result, Err(DeidError::InvalidArgument(_))));
    }

    #[test]
    fn checkpoint_without_output_directory_is_rejected() {
        let dir = tempdir().expect("tmpdir");
        let engine = engine();
        let config = RunConfig {
            checkpoint: Some(dir.path().join("checkpoint.txt")),
            ..RunConfig::default()
        };
        let result = BatchRunner::new(&engine, config, None);
        assert!(matches!(result, Err(DeidError::InvalidArgument(_))));
        assert!(!dir.path().join("checkpoint.txt").exists());
    }

    #[test]
    fn seedless_resume_of_a_started_checkpoint_is_rejected() {
        let dir = tempdir().expect("tmpdir");
        let checkpoint = dir.path().join("checkpoint.txt");
        fs::write(&checkpoint, "/data/a.dcm\n").expect("write");
        let config = RunConfig {
            output_directory: Some(dir.path().join("out")),
            checkpoint: Some(checkpoint.clone()),
            jobs: 1,
        };

        assert!(matches!(config.validate(false, false), Err(DeidError::InvalidArgument(_))));
        assert!(config.validate(false, true).is_ok());
        assert_eq!(fs::read_to_string(&checkpoint).expect("read"), "/data/a.dcm\n");
    }

    #[test]
    fn unit_keys_are_canonical() {
        let dir = tempdir().expect("tmpdir");
        let file = dir.path().join("a.dcm");
        fs::write(&file, b"x").expect("write");

        let dotted = dir.path().join(".").join("a.dcm");
        assert_eq!(unit_key(&file).expect("key"), unit_key(&dotted).expect("key"));
    }

    #[test]
    fn non_dicom_files_are_skipped_and_not_checkpointed() {
        let dir = tempdir().expect("tmpdir");
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "not an image").expect("write");

        let engine = engine();
        let runner = BatchRunner::new(
            &engine,
            RunConfig {
                output_directory: Some(dir.path().join("out")),
                checkpoint: Some(dir.path().join("checkpoint.txt")),
                jobs: 1,
            },
            None,
        )
        .expect("runner");

        assert_eq!(runner.process_unit(&notes).expect("skip"), UnitOutcome::NotApplicable);
        assert_eq!(
            fs::read_to_string(dir.path().join("checkpoint.txt")).expect("read"),
            ""
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_paths_cannot_be_keyed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().expect("tmpdir");
        let file = dir.path().join(OsStr::from_bytes(b"scan\xff.dcm"));
        fs::write(&file, b"x").expect("write");

        assert!(matches!(unit_key(&file), Err(DeidError::InvalidInput(_))));
    }
}
