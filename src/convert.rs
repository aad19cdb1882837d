//! Conversion between DICOM datasets and DICOM JSON documents.
//!
//! Documents produced by [`to_json`] follow the DICOM JSON model (PS3.18 F.2) as
//! implemented by `dicom-json`, with one addition: every top-level element descriptor
//! carries a `"Name"` field holding the normalized name of its tag, e.g.
//!
//! ```json
//! { "00100020": { "vr": "LO", "Value": ["12345"], "Name": "PatientId" } }
//! ```
//!
//! The name comes from the dictionary keyword, not from the display name of the
//! standard, so `(0010,0010)` is named `PatientName` rather than `Patient'sName`.
//!
//! [`from_json`] drops the `"Name"` fields again before rebuilding the dataset.

use dicom_core::{DataDictionary, Tag};
use dicom_dictionary_std::{tags, uids, StandardDataDictionary};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{InMemDicomObject, OpenFileOptions};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

pub const NAME_FIELD: &str = "Name";

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("DICOM JSON conversion error: {}", .0.to_lowercase())]
    Json(String),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Write error: {0}")]
    Write(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(format!("{err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where the dataset to convert comes from.
#[derive(Debug, Clone, Copy)]
pub enum DicomSource<'a> {
    Object(&'a InMemDicomObject),
    Path(&'a Path),
}

impl<'a> From<&'a InMemDicomObject> for DicomSource<'a> {
    fn from(obj: &'a InMemDicomObject) -> Self {
        DicomSource::Object(obj)
    }
}

impl<'a> From<&'a Path> for DicomSource<'a> {
    fn from(path: &'a Path) -> Self {
        DicomSource::Path(path)
    }
}

/// Converts a dataset, or the DICOM file at a path, to a DICOM JSON document.
pub fn dataset_to_json<'a>(
    source: impl Into<DicomSource<'a>>,
    include_pixels: bool,
) -> Result<Map<String, Value>> {
    match source.into() {
        DicomSource::Object(obj) => to_json(obj, include_pixels),
        DicomSource::Path(path) => file_to_json(path, include_pixels),
    }
}

/// Converts a dataset to a DICOM JSON document with `"Name"` fields.
///
/// Pixel data is left out unless `include_pixels` is set.
pub fn to_json(obj: &InMemDicomObject, include_pixels: bool) -> Result<Map<String, Value>> {
    let obj = if !include_pixels && obj.element(tags::PIXEL_DATA).is_ok() {
        let mut filtered = obj.clone();
        filtered.remove_element(tags::PIXEL_DATA);
        Cow::Owned(filtered)
    } else {
        Cow::Borrowed(obj)
    };

    let mut map = match dicom_json::to_value(obj.as_ref())? {
        Value::Object(map) => map,
        other => {
            return Err(Error::Json(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };

    for (key, descriptor) in map.iter_mut() {
        let tag = parse_json_key(key)?;
        if let Value::Object(fields) = descriptor {
            fields.insert(
                NAME_FIELD.into(),
                Value::String(normalize_tag_name(&human_name(tag))),
            );
        }
    }

    Ok(map)
}

/// Opens a DICOM file and converts it to a DICOM JSON document.
///
/// When `include_pixels` is not set, reading stops before the pixel data.
pub fn file_to_json(path: &Path, include_pixels: bool) -> Result<Map<String, Value>> {
    let options = OpenFileOptions::new();
    let options = if include_pixels {
        options
    } else {
        options.read_until(tags::PIXEL_DATA)
    };
    let obj = options
        .open_file(path)
        .map_err(|e| Error::Read(format!("{}: {e}", path.display())))?;
    to_json(&obj, include_pixels)
}

/// Rebuilds a dataset from a DICOM JSON document, ignoring `"Name"` fields.
pub fn from_json(mut map: Map<String, Value>) -> Result<InMemDicomObject> {
    for descriptor in map.values_mut() {
        if let Value::Object(fields) = descriptor {
            fields.remove(NAME_FIELD);
        }
    }
    let obj = dicom_json::from_value(Value::Object(map))?;
    Ok(obj)
}

/// Writes a dataset as a DICOM Part 10 file in Explicit VR Little Endian.
pub fn write_file(path: &Path, obj: &InMemDicomObject) -> Result<()> {
    let sop_class_uid = obj
        .element(tags::SOP_CLASS_UID)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.into());

    let mut meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(sop_class_uid.as_str());
    if let Some(sop_instance_uid) = obj
        .element(tags::SOP_INSTANCE_UID)
        .ok()
        .and_then(|e| e.to_str().ok())
    {
        meta = meta.media_storage_sop_instance_uid(sop_instance_uid.trim_end_matches(['\0', ' ']));
    }

    obj.clone()
        .with_meta(meta)
        .map_err(|e| Error::Write(e.to_string()))?
        .write_to_file(path)
        .map_err(|e| Error::Write(format!("{}: {e}", path.display())))
}

/// Returns a human-readable name for a tag, e.g. `Patient ID` for `(0010,0020)`.
///
/// Names are derived from the standard dictionary keyword by splitting it into words, so
/// they can differ from the display names of the standard (`Patient Name` for
/// `Patient's Name`).
pub fn human_name(tag: Tag) -> String {
    if let Some(entry) = StandardDataDictionary.by_tag(tag) {
        return split_keyword(entry.alias);
    }
    if tag.group() % 2 != 0 {
        if (0x0010..=0x00FF).contains(&tag.element()) {
            return "Private Creator".into();
        }
        return "Private tag data".into();
    }
    "[Unknown]".into()
}

/// Turns a human-readable tag name into a single capitalized word, e.g. `patient id`
/// becomes `PatientId`.
pub fn normalize_tag_name(name: &str) -> String {
    name.replace(['[', ']'], "")
        .split(' ')
        .map(capitalize)
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn split_keyword(keyword: &str) -> String {
    let chars: Vec<char> = keyword.chars().collect();
    let mut name = String::with_capacity(keyword.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                name.push(' ');
            }
        }
        name.push(c);
    }
    name
}

fn parse_json_key(key: &str) -> Result<Tag> {
    let parse = |s: &str| u16::from_str_radix(s, 16).ok();
    match (key.len(), key.get(..4).and_then(parse), key.get(4..).and_then(parse)) {
        (8, Some(group), Some(element)) => Ok(Tag(group, element)),
        _ => Err(Error::Json(format!("invalid element key {key}"))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
