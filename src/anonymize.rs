//
// anonymize.rs
// dicom-deid
//
// Attribute policy: decides which elements are identifying and rewrites them with
// seed-derived substitutes (IDs, UIDs, names, institutions, shifted dates).
//
// dicom-deid contributors - October 2026

use chrono::{Days, NaiveDate};
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::object::{DefaultDicomObject, InMemDicomObject};
use tracing::debug;

use crate::consistency::IdRegistry;
use crate::dicom_access::ElementAccess;
use crate::error::{DeidError, Result};
use crate::randomizer::{decompose, Randomizer};

const ID_LENGTH: usize = 12;
const ID_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_DATE_OFFSET_DAYS: u64 = 3650;

const FAMILY_NAMES: &[&str] = &[
    "SMITH", "JOHNSON", "WILLIAMS", "BROWN", "JONES", "GARCIA", "MILLER", "DAVIS", "RODRIGUEZ",
    "MARTINEZ", "HERNANDEZ", "LOPEZ", "GONZALEZ", "WILSON", "ANDERSON", "THOMAS", "TAYLOR",
    "MOORE", "JACKSON", "MARTIN", "LEE", "PEREZ", "THOMPSON", "WHITE", "HARRIS", "SANCHEZ",
    "CLARK", "RAMIREZ", "LEWIS", "ROBINSON",
];

const GIVEN_NAMES: &[&str] = &[
    "JAMES", "MARY", "ROBERT", "PATRICIA", "JOHN", "JENNIFER", "MICHAEL", "LINDA", "DAVID",
    "ELIZABETH", "WILLIAM", "BARBARA", "RICHARD", "SUSAN", "JOSEPH", "JESSICA", "CHARLES",
    "KAREN", "ALEX", "SAM", "JORDAN", "TAYLOR", "ROBIN", "CASEY",
];

const CITIES: &[&str] = &[
    "SPRINGFIELD", "RIVERSIDE", "FAIRVIEW", "MADISON", "GEORGETOWN", "ARLINGTON", "SALEM",
    "CLINTON", "FRANKLIN", "GREENVILLE", "BRISTOL", "DOVER", "ASHLAND", "OXFORD", "MILFORD",
    "AUBURN",
];

const FACILITY_KINDS: &[&str] = &["HOSPITAL", "MEDICAL CENTER", "CLINIC", "IMAGING CENTER"];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Action {
    PatientId,
    Id,
    Uid,
    PersonName,
    Institution,
    Date,
    DateTime,
    Remove,
}

const POLICY: &[(Tag, Action)] = &[
    (Tag(0x0010, 0x0020), Action::PatientId),   // PatientID
    (Tag(0x0008, 0x0050), Action::Id),          // AccessionNumber
    (Tag(0x0020, 0x0010), Action::Id),          // StudyID
    (Tag(0x0010, 0x1000), Action::Id),          // OtherPatientIDs
    (Tag(0x0040, 0x1001), Action::Id),          // RequestedProcedureID
    (Tag(0x0040, 0x0253), Action::Id),          // PerformedProcedureStepID
    (Tag(0x0008, 0x0018), Action::Uid),         // SOPInstanceUID
    (Tag(0x0020, 0x000D), Action::Uid),         // StudyInstanceUID
    (Tag(0x0020, 0x000E), Action::Uid),         // SeriesInstanceUID
    (Tag(0x0020, 0x0052), Action::Uid),         // FrameOfReferenceUID
    (Tag(0x0008, 0x1155), Action::Uid),         // ReferencedSOPInstanceUID
    (Tag(0x0010, 0x0010), Action::PersonName),  // PatientName
    (Tag(0x0008, 0x0090), Action::PersonName),  // ReferringPhysicianName
    (Tag(0x0008, 0x1050), Action::PersonName),  // PerformingPhysicianName
    (Tag(0x0008, 0x1070), Action::PersonName),  // OperatorsName
    (Tag(0x0008, 0x1048), Action::PersonName),  // PhysiciansOfRecord
    (Tag(0x0008, 0x1060), Action::PersonName),  // NameOfPhysiciansReadingStudy
    (Tag(0x0008, 0x0080), Action::Institution), // InstitutionName
    (Tag(0x0008, 0x0020), Action::Date),        // StudyDate
    (Tag(0x0008, 0x0021), Action::Date),        // SeriesDate
    (Tag(0x0008, 0x0022), Action::Date),        // AcquisitionDate
    (Tag(0x0008, 0x0023), Action::Date),        // ContentDate
    (Tag(0x0008, 0x0012), Action::Date),        // InstanceCreationDate
    (Tag(0x0010, 0x0030), Action::Date),        // PatientBirthDate
    (Tag(0x0008, 0x002A), Action::DateTime),    // AcquisitionDateTime
    (Tag(0x0010, 0x1040), Action::Remove),      // PatientAddress
    (Tag(0x0010, 0x2154), Action::Remove),      // PatientTelephoneNumbers
    (Tag(0x0010, 0x1001), Action::Remove),      // OtherPatientNames
    (Tag(0x0010, 0x1060), Action::Remove),      // PatientMotherBirthName
    (Tag(0x0008, 0x0081), Action::Remove),      // InstitutionAddress
    (Tag(0x0010, 0x1080), Action::Remove),      // MilitaryRank
];

fn action_for(tag: Tag) -> Option<Action> {
    POLICY
        .iter()
        .find(|(candidate, _)| *candidate == tag)
        .map(|(_, action)| *action)
}

#[derive(Debug, Clone, Default)]
pub struct AnonymizerOptions {
    pub id_prefix: String,
    pub id_suffix: String,
}

/// Identifiers captured around one record's anonymization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anonymized {
    pub original_patient_id: Option<String>,
    pub patient_id: Option<String>,
}

/// Per-record state: the patient's date shift and the shared identifier registry.
struct RecordContext<'a> {
    date_offset_days: u64,
    registry: &'a IdRegistry,
}

#[derive(Debug, Clone)]
pub struct Anonymizer {
    randomizer: Randomizer,
    id_prefix: String,
    id_suffix: String,
    id_root_length: usize,
}

impl Anonymizer {
    pub fn new(randomizer: Randomizer, options: AnonymizerOptions) -> Result<Self> {
        let fixed = options.id_prefix.len() + options.id_suffix.len();
        if fixed >= ID_LENGTH {
            return Err(DeidError::InvalidArgument(format!(
                "ID prefix and suffix leave no room for a {ID_LENGTH}-character identifier"
            )));
        }

        Ok(Self {
            randomizer,
            id_prefix: options.id_prefix,
            id_suffix: options.id_suffix,
            id_root_length: ID_LENGTH - fixed,
        })
    }

    pub fn randomizer(&self) -> &Randomizer {
        &self.randomizer
    }

    /// Rewrites every identifying element of `obj` in place.
    ///
    /// The PatientID goes through `registry`, so it is assigned once per run and
    /// recorded in the ledger; everything else is derived directly from the seed.
    pub fn anonymize(&self, obj: &mut DefaultDicomObject, registry: &IdRegistry) -> Result<Anonymized> {
        let original_patient_id = obj.patient_id();
        let ctx = RecordContext {
            date_offset_days: self.date_offset_days(original_patient_id.as_deref().unwrap_or(""))?,
            registry,
        };

        self.anonymize_dataset(obj, &ctx)?;

        if let Some(uid) = obj.sop_instance_uid() {
            let meta = obj.meta_mut();
            meta.media_storage_sop_instance_uid = uid;
            meta.update_information_group_length();
        }

        Ok(Anonymized {
            original_patient_id,
            patient_id: obj.patient_id(),
        })
    }

    fn anonymize_dataset(&self, ds: &mut InMemDicomObject, ctx: &RecordContext<'_>) -> Result<()> {
        let present: Vec<(Tag, VR)> = ds
            .iter()
            .map(|e| (e.header().tag, e.header().vr))
            .collect();

        for (tag, vr) in present {
            if vr == VR::SQ {
                self.anonymize_sequence(ds, tag, ctx)?;
                continue;
            }

            let Some(action) = action_for(tag) else {
                continue;
            };
            let replacement = match (action, ds.element_str(tag)) {
                (Action::Remove, _) => {
                    ds.remove_element(tag);
                    continue;
                }
                (_, None) => continue,
                (Action::PatientId, Some(original)) => {
                    ctx.registry.assign(&original, |value| self.id(value))?
                }
                (Action::Id, Some(original)) => self.map_values(&original, |v| self.id(v))?,
                (Action::Uid, Some(original)) => self.map_values(&original, |v| Ok(self.uid(v)))?,
                (Action::PersonName, Some(original)) => {
                    self.map_values(&original, |v| self.person_name(v))?
                }
                (Action::Institution, Some(original)) => {
                    self.map_values(&original, |v| self.institution(v))?
                }
                (Action::Date, Some(original)) => {
                    self.map_values(&original, |v| Ok(shift_date(v, ctx.date_offset_days)))?
                }
                (Action::DateTime, Some(original)) => {
                    self.map_values(&original, |v| Ok(shift_date_time(v, ctx.date_offset_days)))?
                }
            };
            ds.put(DataElement::new(tag, vr, PrimitiveValue::from(replacement)));
        }
        Ok(())
    }

    fn anonymize_sequence(&self, ds: &mut InMemDicomObject, tag: Tag, ctx: &RecordContext<'_>) -> Result<()> {
        let Some(mut items) = ds
            .element(tag)
            .ok()
            .and_then(|e| e.items())
            .map(|items| items.to_vec())
        else {
            return Ok(());
        };

        for item in items.iter_mut() {
            self.anonymize_dataset(item, ctx)?;
        }
        ds.put(DataElement::new(
            tag,
            VR::SQ,
            Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
        ));
        Ok(())
    }

    /// Applies `f` to each backslash-separated value; empty values stay empty.
    fn map_values<F>(&self, original: &str, f: F) -> Result<String>
    where
        F: Fn(&str) -> Result<String>,
    {
        original
            .split('\\')
            .map(|value| {
                let value = value.trim();
                if value.is_empty() {
                    Ok(String::new())
                } else {
                    f(value)
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(|values| values.join("\\"))
    }

    fn id(&self, original: &str) -> Result<String> {
        let bounds = vec![ID_ALPHABET.len() as u64; self.id_root_length];
        let root: String = self
            .randomizer
            .ints_from_ranges(original, &bounds)?
            .into_iter()
            .map(|i| char::from(ID_ALPHABET[i as usize]))
            .collect();
        Ok(format!("{}{}{}", self.id_prefix, root, self.id_suffix))
    }

    fn uid(&self, original: &str) -> String {
        format!("2.25.{}", self.randomizer.derive_text(original).low_u128())
    }

    fn person_name(&self, original: &str) -> Result<String> {
        let parts = self.randomizer.ints_from_ranges(
            original,
            &[FAMILY_NAMES.len() as u64, GIVEN_NAMES.len() as u64, 26],
        )?;
        let initial = char::from(b'A' + parts[2] as u8);
        Ok(format!(
            "{}^{}^{}",
            FAMILY_NAMES[parts[0] as usize], GIVEN_NAMES[parts[1] as usize], initial
        ))
    }

    fn institution(&self, original: &str) -> Result<String> {
        let parts = self
            .randomizer
            .ints_from_ranges(original, &[CITIES.len() as u64, FACILITY_KINDS.len() as u64])?;
        Ok(format!(
            "{} {}",
            CITIES[parts[0] as usize], FACILITY_KINDS[parts[1] as usize]
        ))
    }

    /// Days (1..=3650) every date of this patient is moved back by.
    fn date_offset_days(&self, patient_id: &str) -> Result<u64> {
        let derived = self.randomizer.derive_text(&format!("date-offset:{patient_id}"));
        Ok(1 + decompose(&derived, &[MAX_DATE_OFFSET_DAYS])?[0])
    }
}

fn shift_date(value: &str, offset_days: u64) -> String {
    match NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .and_then(|date| date.checked_sub_days(Days::new(offset_days)))
    {
        Some(shifted) => shifted.format("%Y%m%d").to_string(),
        None => {
            debug!("blanking unparseable date value");
            String::new()
        }
    }
}

fn shift_date_time(value: &str, offset_days: u64) -> String {
    match (value.get(..8), value.get(8..)) {
        (Some(date), Some(rest)) => {
            let shifted = shift_date(date, offset_days);
            if shifted.is_empty() {
                shifted
            } else {
                format!("{shifted}{rest}")
            }
        }
        _ => {
            debug!("blanking unparseable date-time value");
            String::new()
        }
    }
}
