use dcmstore::convert::{dataset_to_json, from_json, write_file, NAME_FIELD};
use dcmstore::datetime::{format_datetime, parse_date};
use dcmstore::tag_group::{parse_dir, ParseOptions, TagGroup};
use dcmstore::{on_instance_received, ReceivedInstance, StorageSortKey};
use dicom_core::{PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::mem::InMemElement;
use dicom_object::{open_file, InMemDicomObject};
use serde_json::json;
use std::fs;

fn dataset(patient_id: &str, sop_uid: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        InMemElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::MR_IMAGE_STORAGE)),
        InMemElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid)),
        InMemElement::new(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20200229")),
        InMemElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)),
        InMemElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("2.25.1")),
        InMemElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("2.25.1.1")),
    ])
}

#[test]
fn test_json_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let original = dir.path().join("original.dcm");
    write_file(&original, &dataset("P7", "2.25.1.1.1")).unwrap();

    let map = dataset_to_json(original.as_path(), false).unwrap();
    assert_eq!(map["00100020"][NAME_FIELD], "PatientId");
    assert_eq!(map["00080020"][NAME_FIELD], "StudyDate");

    let copy = dir.path().join("copy.dcm");
    write_file(&copy, &from_json(map).unwrap()).unwrap();

    let obj = open_file(&copy).unwrap();
    assert_eq!(obj.element(tags::PATIENT_ID).unwrap().to_str().unwrap(), "P7");
    let study_date = obj.element(tags::STUDY_DATE).unwrap().to_str().unwrap();
    let study_date = parse_date(&study_date).unwrap();
    assert_eq!(format_datetime(&study_date, false), "20200229");
}

#[test]
fn test_parse_received_instances() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");

    for (patient_id, sop_uid) in [("P1", "2.25.1.1.1"), ("P2", "2.25.1.1.2")] {
        let source = dir.path().join(format!("{sop_uid}.dcm"));
        write_file(&source, &dataset(patient_id, sop_uid)).unwrap();
        let instance = ReceivedInstance::new(open_file(&source).unwrap()).unwrap();
        on_instance_received(&storage, StorageSortKey::Patient, &instance).unwrap();
    }

    let tags_path = dir.path().join("tags.json");
    fs::write(
        &tags_path,
        r#"{
            "tags": [
                {"tag_name": ["AccessionNumber", "PatientID"], "tag_alias": "id"},
                {"tag_name": "StudyDate"},
                {"tag_name": "Modality", "default_val": "OT"}
            ]
        }"#,
    )
    .unwrap();
    let group = TagGroup::from_file(&tags_path).unwrap();

    let options = ParseOptions {
        recursive: true,
        strict: true,
    };
    let parsed = parse_dir(&storage, &group, options).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(
        parsed[0].path,
        storage.join("P1").join("2.25.1").join("2.25.1.1").join("2.25.1.1.1.dcm")
    );

    let values: Vec<_> = parsed
        .iter()
        .map(|file| serde_json::Value::Object(file.values.clone()))
        .collect();
    assert_eq!(
        values,
        [
            json!({"id": "P1", "StudyDate": "20200229", "Modality": "OT"}),
            json!({"id": "P2", "StudyDate": "20200229", "Modality": "OT"}),
        ]
    );
}
