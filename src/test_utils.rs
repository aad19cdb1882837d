use dicom_core::{PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::mem::InMemElement;
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{DefaultDicomObject, FileMetaTable, InMemDicomObject};

pub(crate) const SOP_CLASS_UID: &str = uids::CT_IMAGE_STORAGE;

pub(crate) fn make_file_meta(sop_instance_uid: &str) -> FileMetaTable {
    FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(SOP_CLASS_UID)
        .media_storage_sop_instance_uid(sop_instance_uid)
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .build()
        .unwrap()
}

pub(crate) fn make_dataset_with_ids(
    patient_id: &str,
    study_uid: &str,
    series_uid: &str,
    sop_uid: &str,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        InMemElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(SOP_CLASS_UID)),
        InMemElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid)),
        InMemElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20010102")),
        InMemElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        InMemElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("DOE^JOHN")),
        InMemElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)),
        InMemElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_uid)),
        InMemElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)),
    ])
}

/// A small CT dataset with ids `P1`, `S1`, `SE1` and `O1`.
pub(crate) fn make_dataset() -> InMemDicomObject {
    make_dataset_with_ids("P1", "S1", "SE1", "O1")
}

pub(crate) fn make_instance(dataset: InMemDicomObject) -> DefaultDicomObject {
    let sop_uid = dataset
        .element(tags::SOP_INSTANCE_UID)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    dataset.with_exact_meta(make_file_meta(&sop_uid))
}
