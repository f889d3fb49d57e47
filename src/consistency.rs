//
// consistency.rs
// dicom-deid
//
// Process-scoped original -> substitute identifier map and the append-only CSV ledger
// that records each first-seen pair for audit.
//
// dicom-deid contributors - October 2026

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{DeidError, Result};

const LEDGER_COLUMNS: [&str; 2] = ["original patient ID", "anonymized patient ID"];
pub const LEDGER_HEADER: &str = "original patient ID,anonymized patient ID";

/// In-memory map of assigned substitutes, in first-seen order.
#[derive(Debug, Default)]
pub struct ConsistencyMap {
    assigned: HashMap<String, String>,
    order: Vec<String>,
}

impl ConsistencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn substitute_for(&self, original: &str) -> Option<&str> {
        self.assigned.get(original).map(String::as_str)
    }

    /// Stores the pair unless `original` already has a substitute. Returns whether it was new.
    pub fn record_if_new(&mut self, original: &str, substitute: &str) -> bool {
        if self.assigned.contains_key(original) {
            return false;
        }
        self.assigned
            .insert(original.to_string(), substitute.to_string());
        self.order.push(original.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(|original| (original.as_str(), self.assigned[original].as_str()))
    }
}

/// Append-only CSV of first-seen identifier pairs. Never opened over an existing file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl Ledger {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| DeidError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(DeidError::LedgerConflict {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(DeidError::io(format!("creating map {}", path.display()), e)),
        };

        let writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        let mut ledger = Self {
            path: path.to_path_buf(),
            writer,
        };
        ledger.write_row(LEDGER_COLUMNS)?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, original: &str, substitute: &str) -> Result<()> {
        self.write_row([original, substitute])
    }

    /// Each row is flushed and synced before returning.
    fn write_row(&mut self, row: [&str; 2]) -> Result<()> {
        let context = || format!("appending to map {}", self.path.display());
        self.writer
            .write_record(row)
            .map_err(|e| DeidError::io(context(), e.into()))?;
        self.writer.flush().map_err(|e| DeidError::io(context(), e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| DeidError::io(context(), e))
    }

    /// Reads the pairs of an earlier run's ledger without modifying it.
    pub fn load(path: &Path) -> Result<Vec<(String, String)>> {
        let file = File::open(path)
            .map_err(|e| DeidError::io(format!("reading map {}", path.display()), e))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        reader
            .deserialize::<(String, String)>()
            .map(|row| {
                row.map_err(|e| {
                    let line = e.position().map_or(0, |pos| pos.line());
                    DeidError::InvalidInput(format!("{} line {line}: {e}", path.display()))
                })
            })
            .collect()
    }
}

struct RegistryState {
    map: ConsistencyMap,
    ledger: Option<Ledger>,
    recorded: usize,
}

/// Consistency map plus ledger behind one lock, so lookup, assignment and the
/// ledger append happen atomically per original identifier.
pub struct IdRegistry {
    state: Mutex<RegistryState>,
}

impl IdRegistry {
    pub fn new(ledger: Option<Ledger>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                map: ConsistencyMap::new(),
                ledger,
                recorded: 0,
            }),
        }
    }

    /// Seeds the map with pairs from a previous run. They are not re-written to the ledger.
    pub fn preload(&self, entries: impl IntoIterator<Item = (String, String)>) -> Result<usize> {
        let mut state = self.lock()?;
        let mut loaded = 0;
        for (original, substitute) in entries {
            if state.map.record_if_new(&original, &substitute) {
                loaded += 1;
            }
        }
        info!(loaded, "preloaded identifier mappings");
        Ok(loaded)
    }

    /// Returns the substitute for `original`, computing and recording it on first sight.
    pub fn assign<F>(&self, original: &str, compute: F) -> Result<String>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let mut state = self.lock()?;
        if let Some(existing) = state.map.substitute_for(original) {
            return Ok(existing.to_string());
        }

        let substitute = compute(original)?;
        if let Some(ledger) = state.ledger.as_mut() {
            ledger.append(original, &substitute)?;
        }
        state.map.record_if_new(original, &substitute);
        state.recorded += 1;
        debug!(known = state.map.len(), "recorded new identifier mapping");
        Ok(substitute)
    }

    pub fn substitute_for(&self, original: &str) -> Result<Option<String>> {
        Ok(self.lock()?.map.substitute_for(original).map(str::to_string))
    }

    /// Identifiers first seen (and recorded) during this run.
    pub fn recorded(&self) -> Result<usize> {
        Ok(self.lock()?.recorded)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RegistryState>> {
        self.state.lock().map_err(|_| {
            DeidError::io(
                "identifier registry lock poisoned",
                io::Error::new(ErrorKind::Other, "a worker panicked while holding the lock"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_if_new_never_replaces() {
        let mut map = ConsistencyMap::new();
        assert!(map.record_if_new("PT001", "AAA"));
        assert!(!map.record_if_new("PT001", "BBB"));
        assert_eq!(map.substitute_for("PT001"), Some("AAA"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn entries_follow_first_seen_order() {
        let mut map = ConsistencyMap::new();
        map.record_if_new("b", "2");
        map.record_if_new("a", "1");
        map.record_if_new("b", "3");
        let entries: Vec<_> = map.entries().collect();
        assert_eq!(entries, vec![("b", "2"), ("a", "1")]);
    }

    #[test]
    fn assign_is_idempotent_and_logs_once() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("map.csv");
        let registry = IdRegistry::new(Some(Ledger::create(&path).expect("ledger")));

        let mut calls = 0;
        let first = registry
            .assign("PT001", |_| {
                calls += 1;
                Ok("SUB1".into())
            })
            .expect("first");
        let second = registry
            .assign("PT001", |_| Ok("SUB2".into()))
            .expect("second");

        assert_eq!(first, "SUB1");
        assert_eq!(second, "SUB1");
        assert_eq!(calls, 1);
        assert_eq!(registry.recorded().expect("count"), 1);

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, format!("{LEDGER_HEADER}\nPT001,SUB1\n"));
    }

    #[test]
    fn failed_computation_records_nothing() {
        let registry = IdRegistry::new(None);
        let err = registry.assign("PT001", |_| Err(DeidError::InvalidInput("nope".into())));
        assert!(err.is_err());
        assert_eq!(registry.substitute_for("PT001").expect("lookup"), None);
    }

    #[test]
    fn ledger_refuses_existing_file_without_touching_it() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("map.csv");
        fs::write(&path, "earlier run\n").expect("seed file");

        let err = Ledger::create(&path).expect_err("must refuse");
        assert!(matches!(err, DeidError::LedgerConflict { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "earlier run\n");
    }

    #[test]
    fn load_reads_back_quoted_values() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("map.csv");
        {
            let mut ledger = Ledger::create(&path).expect("ledger");
            ledger.append("DOE, \"J\"", "ABC").expect("append");
            ledger.append("", "EMPTY").expect("append");
        }

        let entries = Ledger::load(&path).expect("load");
        assert_eq!(
            entries,
            vec![
                ("DOE, \"J\"".to_string(), "ABC".to_string()),
                (String::new(), "EMPTY".to_string()),
            ]
        );
    }

    #[test]
    fn load_reads_back_values_spanning_lines() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("map.csv");
        {
            let mut ledger = Ledger::create(&path).expect("ledger");
            ledger.append("PT\n001", "SUB").expect("append");
            ledger.append("PT002", "SUB2").expect("append");
        }

        let entries = Ledger::load(&path).expect("load");
        assert_eq!(
            entries,
            vec![
                ("PT\n001".to_string(), "SUB".to_string()),
                ("PT002".to_string(), "SUB2".to_string()),
            ]
        );
    }

    #[test]
    fn load_rejects_rows_with_the_wrong_shape() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("map.csv");
        fs::write(&path, format!("{LEDGER_HEADER}\nPT001,A,B\n")).expect("write");

        let err = Ledger::load(&path).expect_err("three columns");
        assert!(matches!(err, DeidError::InvalidInput(_)));
    }

    #[test]
    fn preloaded_pairs_are_reused_but_not_rewritten() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("map.csv");
        let registry = IdRegistry::new(Some(Ledger::create(&path).expect("ledger")));
        registry
            .preload(vec![("PT001".to_string(), "OLD".to_string())])
            .expect("preload");

        let sub = registry
            .assign("PT001", |_| Ok("NEW".into()))
            .expect("assign");
        assert_eq!(sub, "OLD");
        assert_eq!(fs::read_to_string(&path).expect("read"), format!("{LEDGER_HEADER}\n"));
    }
}
