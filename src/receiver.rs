//! Persistence of instances received by the store SCP.

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;
use log::{error, info};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::storage::{self, checked_path_for, InstanceIds, StorageSortKey};

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("missing identifier: {0}")]
    MissingIdentifier(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why an instance could not be stored.
#[derive(Error, Debug)]
pub enum StorageCause {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encode(String),

    #[error(transparent)]
    InvalidIdentifier(#[from] storage::Error),
}

#[derive(Error, Debug)]
#[error("failed to store {}: {cause}", path.display())]
pub struct StorageFailure {
    pub path: PathBuf,
    #[source]
    pub cause: StorageCause,
}

impl StorageFailure {
    fn new(path: &Path, cause: impl Into<StorageCause>) -> Self {
        Self {
            path: path.to_path_buf(),
            cause: cause.into(),
        }
    }
}

/// A decoded instance together with the identifiers that place it in the storage tree.
#[derive(Debug, Clone)]
pub struct ReceivedInstance {
    object: DefaultDicomObject,
    ids: InstanceIds,
}

fn element_text(object: &DefaultDicomObject, tag: Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|elem| elem.to_str().ok())
        .map(|value| value.trim_end_matches(['\0', ' ']).to_string())
}

fn identifier(object: &DefaultDicomObject, tag: Tag, name: &str) -> Result<String> {
    element_text(object, tag)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::MissingIdentifier(name.into()))
}

impl ReceivedInstance {
    /// Reads the patient, study, series and SOP instance identifiers of a file object.
    ///
    /// The study, series and SOP instance UIDs are required. The patient ID may be empty
    /// or absent; it is only needed when storing by patient.
    pub fn new(object: DefaultDicomObject) -> Result<Self> {
        let ids = InstanceIds::new(
            element_text(&object, tags::PATIENT_ID).unwrap_or_default(),
            identifier(&object, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?,
            identifier(&object, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?,
            identifier(&object, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?,
        );
        Ok(Self { object, ids })
    }

    pub fn ids(&self) -> &InstanceIds {
        &self.ids
    }

    pub fn object(&self) -> &DefaultDicomObject {
        &self.object
    }

    pub fn into_object(self) -> DefaultDicomObject {
        self.object
    }
}

/// Stores a received instance under `base_dir`, at the location given by `sort_key`.
///
/// The file is written next to its destination first and then moved into place, so a
/// concurrent reader never sees a partially written file. An existing file for the same
/// instance is replaced.
///
/// Identifiers that would not stay a single path component below `base_dir`, such as
/// `..` or an absolute path, fail with [`StorageCause::InvalidIdentifier`].
pub fn on_instance_received(
    base_dir: &Path,
    sort_key: StorageSortKey,
    instance: &ReceivedInstance,
) -> Result<PathBuf, StorageFailure> {
    let result = checked_path_for(sort_key, &instance.ids)
        .map_err(|e| StorageFailure::new(base_dir, e))
        .and_then(|relative| {
            let path = base_dir.join(relative);
            write_instance(&path, &instance.object).map(|()| path)
        });

    match result {
        Ok(path) => {
            info!("stored {}", path.display());
            Ok(path)
        }
        Err(e) => {
            error!("{e}");
            Err(e)
        }
    }
}

fn write_instance(path: &Path, object: &DefaultDicomObject) -> Result<(), StorageFailure> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StorageFailure::new(path, e))?;

    let mut file = NamedTempFile::new_in(parent).map_err(|e| StorageFailure::new(path, e))?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        object
            .write_all(&mut writer)
            .map_err(|e| StorageFailure::new(path, StorageCause::Encode(format!("{e}"))))?;
        writer.flush().map_err(|e| StorageFailure::new(path, e))?;
    }

    file.persist(path)
        .map_err(|e| StorageFailure::new(path, e.error))?;
    Ok(())
}
