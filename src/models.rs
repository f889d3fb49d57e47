//
// models.rs
// dicom-deid
//
// Serializable results of a batch run: per-unit outcomes and the run summary.
//
// dicom-deid contributors - October 2026

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How one discovered unit ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Listed in the checkpoint by an earlier run; not read again.
    AlreadyDone,
    /// Not a DICOM file.
    NotApplicable,
    Completed { output: PathBuf, transferred: bool },
}

/// Aggregate counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub completed: usize,
    pub resumed: usize,
    pub not_applicable: usize,
    pub transferred: usize,
    pub new_identifiers: usize,
}

impl RunSummary {
    pub fn tally(&mut self, outcome: &UnitOutcome) {
        self.discovered += 1;
        match outcome {
            UnitOutcome::AlreadyDone => self.resumed += 1,
            UnitOutcome::NotApplicable => self.not_applicable += 1,
            UnitOutcome::Completed { transferred, .. } => {
                self.completed += 1;
                if *transferred {
                    self.transferred += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_outcome() {
        let mut summary = RunSummary::default();
        summary.tally(&UnitOutcome::AlreadyDone);
        summary.tally(&UnitOutcome::NotApplicable);
        summary.tally(&UnitOutcome::Completed {
            output: PathBuf::from("out/1.dcm"),
            transferred: true,
        });
        summary.tally(&UnitOutcome::Completed {
            output: PathBuf::from("out/2.dcm"),
            transferred: false,
        });

        assert_eq!(
            summary,
            RunSummary {
                discovered: 4,
                completed: 2,
                resumed: 1,
                not_applicable: 1,
                transferred: 1,
                new_identifiers: 0,
            }
        );
    }

    #[test]
    fn summary_serializes_to_flat_json() {
        let json = serde_json::to_value(RunSummary::default()).expect("json");
        assert_eq!(json["completed"], 0);
        assert_eq!(json["new_identifiers"], 0);
    }
}
