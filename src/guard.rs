//
// guard.rs
// dicom-deid
//
// Refuses (or warns about) records whose pixel data may carry burned-in identifying text.
//
// dicom-deid contributors - October 2026

use std::path::Path;

use tracing::warn;

use crate::dicom_access::ElementAccess;
use crate::error::{DeidError, Result};

/// When a record is assumed to contain burned-in annotation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AssumeBurnedIn {
    /// Only when BurnedInAnnotation is explicitly YES.
    #[default]
    IfYes,
    /// Unless BurnedInAnnotation is explicitly NO (a missing value counts as burned in).
    UnlessNo,
    Never,
}

/// What to do once a record is considered to contain burned-in annotation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OnBurnedIn {
    Warn,
    #[default]
    Fail,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct BurnedInAnnotationGuard {
    assume: AssumeBurnedIn,
    on_detection: OnBurnedIn,
}

impl BurnedInAnnotationGuard {
    pub fn new(assume: AssumeBurnedIn, on_detection: OnBurnedIn) -> Self {
        Self {
            assume,
            on_detection,
        }
    }

    pub fn guard<T: ElementAccess>(&self, obj: &T, source: &Path) -> Result<()> {
        if !self.is_burned_in(obj) {
            return Ok(());
        }

        match self.on_detection {
            OnBurnedIn::Warn => {
                warn!(file = %source.display(), "burned-in annotation detected");
                Ok(())
            }
            OnBurnedIn::Fail => Err(DeidError::GuardViolation {
                path: source.to_path_buf(),
            }),
        }
    }

    fn is_burned_in<T: ElementAccess>(&self, obj: &T) -> bool {
        let value = obj.burned_in_annotation();

        match self.assume {
            AssumeBurnedIn::IfYes => value.as_deref() == Some("YES"),
            AssumeBurnedIn::UnlessNo => value.as_deref() != Some("NO"),
            AssumeBurnedIn::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::InMemDicomObject;
    use dicom_dictionary_std::tags;

    fn record(burned_in: Option<&str>) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        if let Some(value) = burned_in {
            obj.put(DataElement::new(
                tags::BURNED_IN_ANNOTATION,
                VR::CS,
                PrimitiveValue::from(value),
            ));
        }
        obj
    }

    fn trips(assume: AssumeBurnedIn, burned_in: Option<&str>) -> bool {
        BurnedInAnnotationGuard::new(assume, OnBurnedIn::Fail)
            .guard(&record(burned_in), Path::new("x.dcm"))
            .is_err()
    }

    #[test]
    fn assume_policies() {
        assert!(trips(AssumeBurnedIn::IfYes, Some("YES")));
        assert!(!trips(AssumeBurnedIn::IfYes, Some("NO")));
        assert!(!trips(AssumeBurnedIn::IfYes, None));

        assert!(trips(AssumeBurnedIn::UnlessNo, None));
        assert!(trips(AssumeBurnedIn::UnlessNo, Some("YES")));
        assert!(!trips(AssumeBurnedIn::UnlessNo, Some("NO")));

        assert!(!trips(AssumeBurnedIn::Never, Some("YES")));
    }

    #[test]
    fn warn_lets_the_record_through() {
        let guard = BurnedInAnnotationGuard::new(AssumeBurnedIn::IfYes, OnBurnedIn::Warn);
        assert!(guard.guard(&record(Some("YES")), Path::new("x.dcm")).is_ok());
    }

    #[test]
    fn fail_reports_the_source() {
        let guard = BurnedInAnnotationGuard::default();
        match guard.guard(&record(Some("YES")), Path::new("scan.dcm")) {
            Err(DeidError::GuardViolation { path }) => assert_eq!(path, Path::new("scan.dcm")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
