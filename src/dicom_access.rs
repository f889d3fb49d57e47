//
// dicom_access.rs
// dicom-deid
//
// Read-side view over DICOM records: trimmed string values and the few attributes the
// pipeline keys on, for both file objects and nested sequence items.
//
// dicom-deid contributors - October 2026

use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{DefaultDicomObject, InMemDicomObject};
use dicom_dictionary_std::tags;

/// Small helper trait to pull string values from different DICOM object shapes.
pub trait ElementAccess {
    /// Value as text with DICOM padding (`\0` or trailing space) removed.
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn has_element(&self, tag: Tag) -> bool;
    /// Transfer syntax UID; only file objects carry one.
    fn transfer_syntax(&self) -> Option<String>;

    fn patient_id(&self) -> Option<String> {
        self.element_str(tags::PATIENT_ID)
    }

    fn sop_class_uid(&self) -> Option<String> {
        self.element_str(tags::SOP_CLASS_UID)
            .filter(|uid| !uid.is_empty())
    }

    fn sop_instance_uid(&self) -> Option<String> {
        self.element_str(tags::SOP_INSTANCE_UID)
            .filter(|uid| !uid.is_empty())
    }

    /// BurnedInAnnotation (0028,0301), upper-cased.
    fn burned_in_annotation(&self) -> Option<String> {
        self.element_str(tags::BURNED_IN_ANNOTATION)
            .map(|v| v.trim().to_ascii_uppercase())
    }
}

fn trimmed_text(ds: &InMemDicomObject<StandardDataDictionary>, tag: Tag) -> Option<String> {
    let element = ds.element(tag).ok()?;
    let text = element.to_str().ok()?;
    Some(text.trim_end_matches(['\0', ' ']).to_string())
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        trimmed_text(self, tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn transfer_syntax(&self) -> Option<String> {
        let uid = self.meta().transfer_syntax().trim_end_matches('\0');
        (!uid.is_empty()).then(|| uid.to_string())
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        trimmed_text(self, tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn transfer_syntax(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};

    #[test]
    fn values_are_unpadded_and_empty_uids_are_absent() {
        let mut ds = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("PT001 ")));
        ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("")));
        ds.put(DataElement::new(
            tags::BURNED_IN_ANNOTATION,
            VR::CS,
            PrimitiveValue::from("yes"),
        ));

        assert_eq!(ds.patient_id().as_deref(), Some("PT001"));
        assert_eq!(ds.sop_instance_uid(), None);
        assert_eq!(ds.burned_in_annotation().as_deref(), Some("YES"));
        assert!(!ds.has_element(tags::STUDY_DATE));
    }
}
