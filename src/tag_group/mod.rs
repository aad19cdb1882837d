//! Declarative selection of DICOM tags.
//!
//! A [`TagGroup`] lists [`TagSpec`]s. Each spec names one or more candidate tags (tried in
//! order), the alias the value is reported under, and an optional default. Tag groups are
//! usually loaded from a JSON file of the following shape:
//!
//! ```json
//! {
//!     "tags": [
//!         {
//!             "tag_name": ["StudyInstanceUID", "SOPClassUID"],
//!             "tag_alias": "study_uid",
//!             "default_val": "NOT_SET"
//!         },
//!         { "tag_name": "StudyDate" }
//!     ]
//! }
//! ```

mod batch;
mod resolver;

pub use batch::{parse_dir, ParseOptions, ParsedFile};
pub use resolver::{resolve, resolve_spec, Resolution};

use dicom_core::{DataDictionary, Tag};
use dicom_dictionary_std::StandardDataDictionary;
use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid tag group configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Read error: {0}")]
    Read(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(format!("{err}"))
    }
}

impl From<garde::Report> for Error {
    fn from(err: garde::Report) -> Self {
        Error::Config(format!("{err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Resolves a tag name, either a dictionary keyword such as `StudyInstanceUID` or a tag
/// literal such as `(0020,000D)`, into a [`Tag`].
pub fn lookup_tag(name: &str) -> Option<Tag> {
    if let Ok(tag) = Tag::from_str(name) {
        return Some(tag);
    }
    StandardDataDictionary.by_name(name).map(|entry| entry.tag.inner())
}

fn is_known_tag_name(name: &String, _ctx: &()) -> garde::Result {
    match lookup_tag(name) {
        Some(_) => Ok(()),
        None => Err(garde::Error::new(format!("unknown tag name {name}"))),
    }
}

fn is_scalar(value: &Option<Value>, _ctx: &()) -> garde::Result {
    match value {
        Some(Value::Array(_)) | Some(Value::Object(_)) => {
            Err(garde::Error::new("default value must be a JSON scalar"))
        }
        _ => Ok(()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn deserialize_tag_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}

fn serialize_tag_names<S>(names: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match names {
        [name] => serializer.serialize_str(name),
        _ => names.serialize(serializer),
    }
}

/// One entry of a [`TagGroup`].
///
/// # Example
///
/// ```
/// use dcmstore::tag_group::TagSpec;
///
/// let spec = TagSpec::new(["StudyInstanceUID", "SOPClassUID"])
///     .with_alias("study_uid")
///     .with_default("NOT_SET");
/// assert_eq!(spec.alias(), "study_uid");
///
/// let spec = TagSpec::new(["StudyDate"]);
/// assert_eq!(spec.alias(), "StudyDate");
/// ```
#[derive(Serialize, Deserialize, Validate, Debug, Clone, PartialEq)]
pub struct TagSpec {
    #[serde(
        deserialize_with = "deserialize_tag_names",
        serialize_with = "serialize_tag_names"
    )]
    #[garde(length(min = 1), inner(custom(is_known_tag_name)))]
    tag_name: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(length(min = 1))]
    tag_alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(custom(is_scalar))]
    default_val: Option<Value>,
}

impl TagSpec {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag_name: names.into_iter().map(Into::into).collect(),
            tag_alias: None,
            default_val: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.tag_alias = Some(alias.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default_val = Some(default.into());
        self
    }

    /// Candidate tag names, in the order they are tried.
    pub fn names(&self) -> &[String] {
        &self.tag_name
    }

    /// The key under which the resolved value is reported: the configured alias, or the
    /// first candidate name.
    pub fn alias(&self) -> &str {
        match &self.tag_alias {
            Some(alias) => alias,
            None => self.tag_name.first().map(String::as_str).unwrap_or_default(),
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_val.as_ref()
    }
}

/// An ordered list of [`TagSpec`]s.
#[derive(Serialize, Deserialize, Validate, Debug, Clone, Default, PartialEq)]
pub struct TagGroup {
    #[garde(dive)]
    tags: Vec<TagSpec>,
}

impl TagGroup {
    pub fn specs(&self) -> &[TagSpec] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Parses and validates a tag group from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let group: TagGroup = serde_json::from_str(json)?;
        group.validate()?;
        Ok(group)
    }

    /// Loads and validates a tag group from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// A builder for [`TagGroup`]s.
///
/// # Example
///
/// ```
/// use dcmstore::tag_group::{TagGroupBuilder, TagSpec};
///
/// let group = TagGroupBuilder::new()
///     .tag(TagSpec::new(["PatientID"]).with_alias("patient_id"))
///     .tag(TagSpec::new(["StudyDate"]))
///     .build()
///     .unwrap();
/// assert_eq!(group.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagGroupBuilder(TagGroup);

impl TagGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, spec: TagSpec) -> Self {
        self.0.tags.push(spec);
        self
    }

    /// Validates and returns the [`TagGroup`].
    pub fn build(self) -> Result<TagGroup> {
        self.0.validate()?;
        Ok(self.0)
    }
}
