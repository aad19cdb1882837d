use dcmstore::net::{run_server, DicomNode, ServerConfig};
use dcmstore::storage::StorageSortKey;
use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::mem::InMemElement;
use dicom_object::{open_file, InMemDicomObject};
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use dicom_ul::pdu::{PDataValue, PDataValueType};
use dicom_ul::{ClientAssociation, ClientAssociationOptions, Pdu};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const ECHO_CONTEXT_ID: u8 = 1;
const STORE_CONTEXT_ID: u8 = 3;

fn dataset(sop_uid: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        InMemElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
        InMemElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid)),
        InMemElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        InMemElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("P1")),
        InMemElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")),
        InMemElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4")),
    ])
}

fn start(dir: &Path, sort_by: StorageSortKey) -> (dcmstore::net::StoreScpServer, SocketAddr) {
    let config = ServerConfig::new(DicomNode::new("127.0.0.1", 0, "DCMSTORE"), dir, sort_by);
    let server = run_server(&config).unwrap();
    let addr = server.local_addr();
    (server, addr)
}

fn connect(addr: SocketAddr) -> ClientAssociation<TcpStream> {
    ClientAssociationOptions::new()
        .calling_ae_title("TESTSCU")
        .called_ae_title("DCMSTORE")
        .with_abstract_syntax(uids::VERIFICATION)
        .with_abstract_syntax(uids::CT_IMAGE_STORAGE)
        .establish(addr)
        .unwrap()
}

fn encode_command(command: &InMemDicomObject) -> Vec<u8> {
    let mut data = Vec::new();
    command
        .write_dataset_with_ts(&mut data, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .unwrap();
    data
}

fn receive_status(association: &mut ClientAssociation<TcpStream>) -> u16 {
    match association.receive().unwrap() {
        Pdu::PData { data } => {
            let response = InMemDicomObject::read_dataset_with_ts(
                &data[0].data[..],
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .unwrap();
            response.element(tags::STATUS).unwrap().to_int::<u16>().unwrap()
        }
        pdu => panic!("unexpected PDU {pdu:?}"),
    }
}

fn echo(association: &mut ClientAssociation<TcpStream>) -> u16 {
    let command = InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, uids::VERIFICATION)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0030])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [1])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0101])),
    ]);
    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: ECHO_CONTEXT_ID,
                value_type: PDataValueType::Command,
                is_last: true,
                data: encode_command(&command),
            }],
        })
        .unwrap();
    receive_status(association)
}

fn store(
    association: &mut ClientAssociation<TcpStream>,
    message_id: u16,
    obj: &InMemDicomObject,
) -> u16 {
    let pc = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == STORE_CONTEXT_ID)
        .unwrap();
    let ts = TransferSyntaxRegistry
        .get(pc.transfer_syntax.trim_end_matches('\0'))
        .unwrap();
    let mut data = Vec::new();
    obj.write_dataset_with_ts(&mut data, ts).unwrap();

    let sop_uid = obj.element(tags::SOP_INSTANCE_UID).unwrap().to_str().unwrap().to_string();
    let command = InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, uids::CT_IMAGE_STORAGE)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, sop_uid.as_str())),
    ]);

    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: STORE_CONTEXT_ID,
                value_type: PDataValueType::Command,
                is_last: true,
                data: encode_command(&command),
            }],
        })
        .unwrap();
    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: STORE_CONTEXT_ID,
                value_type: PDataValueType::Data,
                is_last: true,
                data,
            }],
        })
        .unwrap();
    receive_status(association)
}

#[test]
fn test_echo() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start(dir.path(), StorageSortKey::Patient);

    let mut association = connect(addr);
    assert_eq!(echo(&mut association), 0x0000);
    association.release().unwrap();

    server.shutdown();
}

#[test]
fn test_store_instances() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start(dir.path(), StorageSortKey::Patient);

    let mut association = connect(addr);
    assert_eq!(store(&mut association, 1, &dataset("1.2.3.4.5")), 0x0000);
    assert_eq!(store(&mut association, 2, &dataset("1.2.3.4.6")), 0x0000);
    association.release().unwrap();
    server.shutdown();

    let series_dir = dir.path().join("P1").join("1.2.3").join("1.2.3.4");
    for sop_uid in ["1.2.3.4.5", "1.2.3.4.6"] {
        let obj = open_file(series_dir.join(format!("{sop_uid}.dcm"))).unwrap();
        assert_eq!(obj.element(tags::MODALITY).unwrap().to_str().unwrap(), "CT");
        assert_eq!(
            obj.meta().media_storage_sop_class_uid.trim_end_matches('\0'),
            uids::CT_IMAGE_STORAGE
        );
    }
}

#[test]
fn test_store_without_patient_id() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start(dir.path(), StorageSortKey::Image);

    let mut obj = dataset("1.2.3.4.5");
    obj.remove_element(tags::PATIENT_ID);

    let mut association = connect(addr);
    assert_eq!(store(&mut association, 1, &obj), 0x0000);
    association.release().unwrap();
    server.shutdown();

    assert!(dir.path().join("1.2.3.4.5.dcm").is_file());
}

#[test]
fn test_store_without_patient_id_is_refused_by_patient() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start(dir.path(), StorageSortKey::Patient);

    let mut obj = dataset("1.2.3.4.5");
    obj.remove_element(tags::PATIENT_ID);

    let mut association = connect(addr);
    assert_eq!(store(&mut association, 1, &obj), 0xC000);
    association.release().unwrap();
    server.shutdown();

    assert!(!dir.path().join("1.2.3").exists());
}

#[test]
fn test_store_with_escaping_identifiers_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");
    let (server, addr) = start(&storage, StorageSortKey::Patient);

    let outside = dir.path().join("outside");
    let mut absolute = dataset("1.2.3.4.5");
    absolute.put(InMemElement::new(
        tags::PATIENT_ID,
        VR::LO,
        PrimitiveValue::from(outside.to_str().unwrap()),
    ));
    let mut parent = dataset("1.2.3.4.6");
    parent.put(InMemElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("..")));

    let mut association = connect(addr);
    assert_eq!(store(&mut association, 1, &absolute), 0xC000);
    assert_eq!(store(&mut association, 2, &parent), 0xC000);
    association.release().unwrap();
    server.shutdown();

    assert!(!outside.exists());
    assert!(!dir.path().join("1.2.3").exists());
    assert_eq!(std::fs::read_dir(&storage).unwrap().count(), 0);
}

#[test]
fn test_shutdown_with_open_association() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start(dir.path(), StorageSortKey::Patient);

    let mut association = connect(addr);
    assert_eq!(echo(&mut association), 0x0000);

    // the association stays open and idle while the server stops
    let (done_tx, done_rx) = mpsc::channel();
    let stopping = thread::spawn(move || {
        server.shutdown();
        done_tx.send(()).unwrap();
    });
    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    stopping.join().unwrap();

    assert!(association.receive().is_err());
}

#[test]
fn test_store_failure_status() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = start(dir.path(), StorageSortKey::Study);

    // a file where the study directory should go
    std::fs::write(dir.path().join("1.2.3"), "").unwrap();

    let mut association = connect(addr);
    assert_eq!(store(&mut association, 1, &dataset("1.2.3.4.5")), 0xA700);
    association.release().unwrap();
    server.shutdown();
}
