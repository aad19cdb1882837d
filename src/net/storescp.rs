use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use dicom_ul::pdu::{PDataValue, PDataValueType};
use dicom_ul::{Pdu, ServerAssociation, ServerAssociationOptions};
use garde::Validate;
use log::{debug, error, info, warn};
use std::fs;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Error, Result, ServerConfig};
use crate::receiver::{on_instance_received, ReceivedInstance, StorageCause};
use crate::storage::StorageSortKey;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const C_STORE_RQ: u16 = 0x0001;
const C_STORE_RSP: u16 = 0x8001;
const C_ECHO_RQ: u16 = 0x0030;
const C_ECHO_RSP: u16 = 0x8030;
const NO_DATA_SET: u16 = 0x0101;

const STATUS_SUCCESS: u16 = 0x0000;
const STATUS_OUT_OF_RESOURCES: u16 = 0xA700;
const STATUS_CANNOT_UNDERSTAND: u16 = 0xC000;

static ABSTRACT_SYNTAXES: &[&str] = &[
    uids::VERIFICATION,
    uids::CT_IMAGE_STORAGE,
    uids::ENHANCED_CT_IMAGE_STORAGE,
    uids::MR_IMAGE_STORAGE,
    uids::ENHANCED_MR_IMAGE_STORAGE,
    uids::COMPUTED_RADIOGRAPHY_IMAGE_STORAGE,
    uids::DIGITAL_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    uids::DIGITAL_MAMMOGRAPHY_X_RAY_IMAGE_STORAGE_FOR_PRESENTATION,
    uids::ULTRASOUND_IMAGE_STORAGE,
    uids::ULTRASOUND_MULTI_FRAME_IMAGE_STORAGE,
    uids::NUCLEAR_MEDICINE_IMAGE_STORAGE,
    uids::POSITRON_EMISSION_TOMOGRAPHY_IMAGE_STORAGE,
    uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
];

/// What every association needs to know to accept and store instances.
#[derive(Debug)]
struct ScpContext {
    ae_title: String,
    directory: PathBuf,
    sort_key: StorageSortKey,
    read_timeout: Duration,
    stop: Arc<AtomicBool>,
}

/// Handle to a running store SCP.
///
/// The server stops when [`StoreScpServer::shutdown`] is called or the handle is dropped.
#[derive(Debug)]
pub struct StoreScpServer {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl StoreScpServer {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting associations, closes the connections still open and waits until
    /// their threads have ended.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if acceptor.join().is_err() {
            error!("store SCP acceptor thread panicked");
        }
        info!("store SCP on {} stopped", self.local_addr);
    }
}

impl Drop for StoreScpServer {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Starts a store SCP as configured and returns a handle to it.
///
/// Every instance received is written below the configured storage directory, see
/// [`on_instance_received`].
pub fn run_server(config: &ServerConfig) -> Result<StoreScpServer> {
    config.validate()?;
    fs::create_dir_all(&config.storage.directory)?;

    let listener = TcpListener::bind(config.node.address())?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let stop = Arc::new(AtomicBool::new(false));
    let context = Arc::new(ScpContext {
        ae_title: config.node.ae_title.clone(),
        directory: config.storage.directory.clone(),
        sort_key: config.storage.sort_by,
        read_timeout: config.read_timeout(),
        stop: Arc::clone(&stop),
    });
    let max_associations = config.max_associations;

    let acceptor = thread::Builder::new()
        .name("storescp-acceptor".into())
        .spawn(move || accept_loop(listener, context, max_associations))?;

    info!(
        "store SCP {} listening on {local_addr}, storing in {} (sorted by {})",
        config.node.ae_title,
        config.storage.directory.display(),
        config.storage.sort_by
    );

    Ok(StoreScpServer {
        local_addr,
        stop,
        acceptor: Some(acceptor),
    })
}

/// An association thread and a handle on its connection, used to close it on shutdown.
struct RunningAssociation {
    handle: JoinHandle<()>,
    stream: TcpStream,
}

impl RunningAssociation {
    fn join(self) {
        if self.handle.join().is_err() {
            error!("association thread panicked");
        }
    }

    fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("failed to close association connection: {e}");
        }
    }
}

fn accept_loop(listener: TcpListener, context: Arc<ScpContext>, max_associations: usize) {
    let mut associations: Vec<RunningAssociation> = Vec::new();

    while !context.stop.load(Ordering::SeqCst) {
        let (finished, running): (Vec<_>, Vec<_>) = associations
            .into_iter()
            .partition(|association| association.handle.is_finished());
        finished.into_iter().for_each(RunningAssociation::join);
        associations = running;

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if associations.len() >= max_associations {
                    warn!("maximum number of associations reached, dropping connection from {peer_addr}");
                    continue;
                }
                let stream_handle = match stream.try_clone() {
                    Ok(stream_handle) => stream_handle,
                    Err(e) => {
                        error!("could not take a handle on the connection from {peer_addr}: {e}");
                        continue;
                    }
                };

                let context = Arc::clone(&context);
                let spawned = thread::Builder::new()
                    .name(format!("storescp-{peer_addr}"))
                    .spawn(move || {
                        if let Err(e) = handle_association(stream, peer_addr, &context) {
                            warn!("association with {peer_addr} failed: {e}");
                        }
                    });
                match spawned {
                    Ok(handle) => associations.push(RunningAssociation {
                        handle,
                        stream: stream_handle,
                    }),
                    Err(e) => error!("could not start association thread for {peer_addr}: {e}"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                error!("failed to accept connection: {e}");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    associations.iter().for_each(RunningAssociation::close);
    associations.into_iter().for_each(RunningAssociation::join);
}

fn handle_association(stream: TcpStream, peer_addr: SocketAddr, context: &ScpContext) -> Result<()> {
    stream.set_nonblocking(false)?;

    // establish applies the timeout as the socket read timeout
    let mut options = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(context.ae_title.as_str())
        .promiscuous(true)
        .timeout(context.read_timeout);
    for ts in TransferSyntaxRegistry.iter() {
        if !ts.is_unsupported() {
            options = options.with_transfer_syntax(ts.uid());
        }
    }
    for uid in ABSTRACT_SYNTAXES {
        options = options.with_abstract_syntax(*uid);
    }

    let mut association = options
        .establish(stream)
        .map_err(|e| Error::Association(format!("{e}")))?;
    info!("association with {} ({peer_addr}) established", association.client_ae_title());
    debug!("presentation contexts: {:?}", association.presentation_contexts());

    let mut request = StoreRequest::default();
    let mut instance_buffer: Vec<u8> = Vec::new();

    while !context.stop.load(Ordering::SeqCst) {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(_) if context.stop.load(Ordering::SeqCst) => break,
            Err(e) => {
                warn!("association with {peer_addr} ended unexpectedly: {e}");
                break;
            }
        };

        match pdu {
            Pdu::PData { data } => {
                for mut value in data {
                    match (&value.value_type, value.is_last) {
                        (PDataValueType::Command, true) => {
                            instance_buffer.clear();
                            let command = read_command(&value.data)?;
                            if let Some(response) = request.update(&command)? {
                                send_command(&mut association, value.presentation_context_id, &response)?;
                            }
                        }
                        (PDataValueType::Command, false) => {
                            return Err(Error::Association(
                                "fragmented command messages are not supported".into(),
                            ));
                        }
                        (PDataValueType::Data, is_last) => {
                            instance_buffer.append(&mut value.data);
                            if is_last {
                                let status = store_instance(
                                    &association,
                                    value.presentation_context_id,
                                    &request,
                                    &instance_buffer,
                                    context,
                                );
                                instance_buffer.clear();
                                let response = request.store_response(status);
                                send_command(&mut association, value.presentation_context_id, &response)?;
                            }
                        }
                    }
                }
            }
            Pdu::ReleaseRQ => {
                if let Err(e) = association.send(&Pdu::ReleaseRP) {
                    warn!("failed to send association release response to {peer_addr}: {e}");
                }
                info!("association with {} ({peer_addr}) released", association.client_ae_title());
                break;
            }
            Pdu::AbortRQ { source } => {
                warn!("association with {peer_addr} aborted: {source:?}");
                break;
            }
            other => debug!("ignoring PDU from {peer_addr}: {other:?}"),
        }
    }

    if context.stop.load(Ordering::SeqCst) {
        info!("association with {peer_addr} closed, server is shutting down");
    }
    Ok(())
}

/// The C-STORE request currently in progress on an association.
#[derive(Debug, Default)]
struct StoreRequest {
    message_id: u16,
    sop_class_uid: String,
    sop_instance_uid: String,
}

fn command_str(command: &InMemDicomObject, tag: dicom_core::Tag) -> Result<String> {
    command
        .element(tag)
        .map_err(|e| Error::Association(format!("{e}")))?
        .to_str()
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        .map_err(|e| Error::Association(format!("{e}")))
}

fn command_u16(command: &InMemDicomObject, tag: dicom_core::Tag) -> Result<u16> {
    command
        .element(tag)
        .map_err(|e| Error::Association(format!("{e}")))?
        .to_int::<u16>()
        .map_err(|e| Error::Association(format!("{e}")))
}

impl StoreRequest {
    /// Takes in a command message. Returns the response to send right away, if any.
    fn update(&mut self, command: &InMemDicomObject) -> Result<Option<InMemDicomObject>> {
        let command_field = command_u16(command, tags::COMMAND_FIELD)?;
        let message_id = command_u16(command, tags::MESSAGE_ID)?;

        match command_field {
            C_ECHO_RQ => {
                debug!("C-ECHO-RQ {message_id}");
                Ok(Some(echo_response(message_id)))
            }
            C_STORE_RQ => {
                *self = StoreRequest {
                    message_id,
                    sop_class_uid: command_str(command, tags::AFFECTED_SOP_CLASS_UID)?,
                    sop_instance_uid: command_str(command, tags::AFFECTED_SOP_INSTANCE_UID)?,
                };
                debug!("C-STORE-RQ {message_id} for {}", self.sop_instance_uid);
                Ok(None)
            }
            other => Err(Error::Association(format!(
                "unsupported command field {other:#06x}"
            ))),
        }
    }

    fn store_response(&self, status: u16) -> InMemDicomObject {
        InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::AFFECTED_SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, self.sop_class_uid.as_str()),
            ),
            DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_STORE_RSP])),
            DataElement::new(
                tags::MESSAGE_ID_BEING_RESPONDED_TO,
                VR::US,
                dicom_value!(U16, [self.message_id]),
            ),
            DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [NO_DATA_SET])),
            DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
            DataElement::new(
                tags::AFFECTED_SOP_INSTANCE_UID,
                VR::UI,
                dicom_value!(Str, self.sop_instance_uid.as_str()),
            ),
        ])
    }
}

fn echo_response(message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, uids::VERIFICATION)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_ECHO_RSP])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [NO_DATA_SET])),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [STATUS_SUCCESS])),
    ])
}

// command sets are always encoded in implicit VR little endian
fn read_command(data: &[u8]) -> Result<InMemDicomObject> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    InMemDicomObject::read_dataset_with_ts(data, &ts)
        .map_err(|e| Error::Association(format!("failed to read command: {e}")))
}

fn send_command(
    association: &mut ServerAssociation<TcpStream>,
    presentation_context_id: u8,
    command: &InMemDicomObject,
) -> Result<()> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut data = Vec::new();
    command
        .write_dataset_with_ts(&mut data, &ts)
        .map_err(|e| Error::Association(format!("failed to write command: {e}")))?;

    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data,
            }],
        })
        .map_err(|e| Error::Association(format!("failed to send response: {e}")))
}

/// Decodes and stores one received data set, returning the C-STORE status to report.
fn store_instance(
    association: &ServerAssociation<TcpStream>,
    presentation_context_id: u8,
    request: &StoreRequest,
    data: &[u8],
    context: &ScpContext,
) -> u16 {
    let Some(pc) = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.id == presentation_context_id)
    else {
        warn!("unknown presentation context {presentation_context_id}");
        return STATUS_CANNOT_UNDERSTAND;
    };
    let ts_uid = pc.transfer_syntax.trim_end_matches(['\0', ' ']);
    let Some(ts) = TransferSyntaxRegistry.get(ts_uid) else {
        warn!("unsupported transfer syntax {ts_uid}");
        return STATUS_CANNOT_UNDERSTAND;
    };

    let dataset = match InMemDicomObject::read_dataset_with_ts(data, ts) {
        Ok(dataset) => dataset,
        Err(e) => {
            warn!("failed to read data set of {}: {e}", request.sop_instance_uid);
            return STATUS_CANNOT_UNDERSTAND;
        }
    };

    let meta = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(request.sop_class_uid.as_str())
        .media_storage_sop_instance_uid(request.sop_instance_uid.as_str())
        .transfer_syntax(ts_uid)
        .build();
    let meta = match meta {
        Ok(meta) => meta,
        Err(e) => {
            warn!("failed to build file meta group for {}: {e}", request.sop_instance_uid);
            return STATUS_CANNOT_UNDERSTAND;
        }
    };

    let instance = match ReceivedInstance::new(dataset.with_exact_meta(meta)) {
        Ok(instance) => instance,
        Err(e) => {
            warn!("rejecting {}: {e}", request.sop_instance_uid);
            return STATUS_CANNOT_UNDERSTAND;
        }
    };

    match on_instance_received(&context.directory, context.sort_key, &instance) {
        Ok(_) => STATUS_SUCCESS,
        Err(e) => store_failure_status(&e.cause),
    }
}

fn store_failure_status(cause: &StorageCause) -> u16 {
    match cause {
        StorageCause::InvalidIdentifier(_) => STATUS_CANNOT_UNDERSTAND,
        StorageCause::Io(_) | StorageCause::Encode(_) => STATUS_OUT_OF_RESOURCES,
    }
}
