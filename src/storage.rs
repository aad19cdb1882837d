use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DICOM_FILE_EXTENSION: &str = "dcm";

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("unknown storage sort key: {0}")]
    UnknownSortKey(String),

    #[error("{name} '{value}' cannot be used as a path component")]
    InvalidIdentifier { name: &'static str, value: String },
}

/// Granularity of the directory hierarchy received instances are stored in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageSortKey {
    /// `{patient_id}/{study_uid}/{series_uid}/{sop_uid}.dcm`
    #[default]
    Patient,

    /// `{study_uid}/{series_uid}/{sop_uid}.dcm`
    Study,

    /// `{sop_uid}.dcm`
    Image,
}

impl FromStr for StorageSortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patient" => Ok(StorageSortKey::Patient),
            "study" => Ok(StorageSortKey::Study),
            "image" => Ok(StorageSortKey::Image),
            _ => Err(Error::UnknownSortKey(s.into())),
        }
    }
}

impl fmt::Display for StorageSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageSortKey::Patient => "patient",
            StorageSortKey::Study => "study",
            StorageSortKey::Image => "image",
        };
        f.write_str(name)
    }
}

/// The identifiers locating an instance within the patient/study/series hierarchy.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct InstanceIds {
    pub patient_id: String,
    pub study_uid: String,
    pub series_uid: String,
    pub sop_uid: String,
}

impl InstanceIds {
    pub fn new(
        patient_id: impl Into<String>,
        study_uid: impl Into<String>,
        series_uid: impl Into<String>,
        sop_uid: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            study_uid: study_uid.into(),
            series_uid: series_uid.into(),
            sop_uid: sop_uid.into(),
        }
    }
}

/// Returns the path, relative to the storage directory, of the file holding an instance.
///
/// This only computes the path, creating directories is up to the caller.
///
/// # Example
///
/// ```
/// use dcmstore::storage::{path_for, InstanceIds, StorageSortKey};
/// use std::path::PathBuf;
///
/// let ids = InstanceIds::new("P1", "S1", "SE1", "O1");
/// assert_eq!(path_for(StorageSortKey::Study, &ids), PathBuf::from("S1/SE1/O1.dcm"));
/// ```
pub fn path_for(sort_key: StorageSortKey, ids: &InstanceIds) -> PathBuf {
    let mut path = PathBuf::new();
    match sort_key {
        StorageSortKey::Patient => {
            path.push(&ids.patient_id);
            path.push(&ids.study_uid);
            path.push(&ids.series_uid);
        }
        StorageSortKey::Study => {
            path.push(&ids.study_uid);
            path.push(&ids.series_uid);
        }
        StorageSortKey::Image => {}
    }
    path.push(format!("{}.{DICOM_FILE_EXTENSION}", ids.sop_uid));
    path
}

/// Whether an identifier can be used as a single directory or file name.
///
/// Empty names, `.`, `..`, and anything holding a path separator, a root or a drive prefix
/// are rejected.
pub fn is_valid_component(value: &str) -> bool {
    if value.is_empty() || value.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn check_component(name: &'static str, value: &str) -> Result<(), Error> {
    if is_valid_component(value) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier {
            name,
            value: value.into(),
        })
    }
}

/// Same as [`path_for`], but fails when one of the identifiers `sort_key` uses would not
/// stay a single path component, so the result never leaves the storage directory.
pub fn checked_path_for(sort_key: StorageSortKey, ids: &InstanceIds) -> Result<PathBuf, Error> {
    if sort_key == StorageSortKey::Patient {
        check_component("PatientID", &ids.patient_id)?;
    }
    if sort_key != StorageSortKey::Image {
        check_component("StudyInstanceUID", &ids.study_uid)?;
        check_component("SeriesInstanceUID", &ids.series_uid)?;
    }
    check_component("SOPInstanceUID", &ids.sop_uid)?;
    Ok(path_for(sort_key, ids))
}
