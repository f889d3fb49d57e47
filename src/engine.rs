//
// engine.rs
// dicom-deid
//
// The per-run substitution engine: seed, anonymization policy, guard and identifier registry,
// built once and shared by reference with every worker.
//
// dicom-deid contributors - October 2026

use std::path::{Path, PathBuf};

use dicom::object::DefaultDicomObject;

use crate::anonymize::{Anonymized, Anonymizer, AnonymizerOptions};
use crate::consistency::{IdRegistry, Ledger};
use crate::error::Result;
use crate::guard::BurnedInAnnotationGuard;
use crate::randomizer::{Randomizer, Seed};

#[derive(Clone, Default)]
pub struct EngineConfig {
    /// Fixed seed for reproducible output; a random one is generated when absent.
    pub seed: Option<String>,
    pub anonymizer: AnonymizerOptions,
    pub guard: BurnedInAnnotationGuard,
    /// Where to write the original -> anonymized PatientID map. Must not exist yet.
    pub map_path: Option<PathBuf>,
    /// Map of an earlier run whose substitutes should be reused.
    pub prior_map: Option<PathBuf>,
}

pub struct Engine {
    anonymizer: Anonymizer,
    explicit_seed: bool,
    guard: BurnedInAnnotationGuard,
    registry: IdRegistry,
}

impl Engine {
    /// Validates the configuration and opens the ledger last, so a rejected
    /// configuration never leaves a fresh map file behind.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let explicit_seed = config.seed.is_some();
        let seed = match config.seed {
            Some(seed) => Seed::new(seed)?,
            None => Seed::generate(),
        };
        let anonymizer = Anonymizer::new(Randomizer::new(seed), config.anonymizer)?;
        let prior = config
            .prior_map
            .as_deref()
            .map(Ledger::load)
            .transpose()?;

        let ledger = config.map_path.as_deref().map(Ledger::create).transpose()?;
        let registry = IdRegistry::new(ledger);
        if let Some(entries) = prior {
            registry.preload(entries)?;
        }

        Ok(Self {
            anonymizer,
            explicit_seed,
            guard: config.guard,
            registry,
        })
    }

    /// False when the seed was generated for this run and cannot be reproduced.
    pub fn has_explicit_seed(&self) -> bool {
        self.explicit_seed
    }

    pub fn randomizer(&self) -> &Randomizer {
        self.anonymizer.randomizer()
    }

    pub fn registry(&self) -> &IdRegistry {
        &self.registry
    }

    /// Guard, then anonymize one record in place.
    pub fn process_record(&self, obj: &mut DefaultDicomObject, source: &Path) -> Result<Anonymized> {
        self.guard.guard(&*obj, source)?;
        self.anonymizer.anonymize(obj, &self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::LEDGER_HEADER;
    use crate::error::DeidError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn existing_map_aborts_before_anything_runs() {
        let dir = tempdir().expect("tmpdir");
        let map = dir.path().join("map.csv");
        fs::write(&map, "keep me\n").expect("write");

        let result = Engine::new(EngineConfig {
            seed: Some("test123".into()),
            map_path: Some(map.clone()),
            ..EngineConfig::default()
        });
        assert!(matches!(result, Err(DeidError::LedgerConflict { .. })));
        assert_eq!(fs::read_to_string(&map).expect("read"), "keep me\n");
    }

    #[test]
    fn invalid_options_leave_no_map_behind() {
        let dir = tempdir().expect("tmpdir");
        let map = dir.path().join("map.csv");

        let result = Engine::new(EngineConfig {
            seed: Some(String::new()),
            map_path: Some(map.clone()),
            ..EngineConfig::default()
        });
        assert!(matches!(result, Err(DeidError::InvalidArgument(_))));
        assert!(!map.exists());
    }

    #[test]
    fn new_map_starts_with_header() {
        let dir = tempdir().expect("tmpdir");
        let map = dir.path().join("nested").join("map.csv");

        Engine::new(EngineConfig {
            map_path: Some(map.clone()),
            ..EngineConfig::default()
        })
        .expect("engine");
        assert_eq!(
            fs::read_to_string(&map).expect("read"),
            format!("{LEDGER_HEADER}\n")
        );
    }
}
