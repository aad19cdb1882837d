use dicom_core::value::Value as DicomValue;
use dicom_core::PrimitiveValue;
use dicom_object::mem::InMemElement;
use dicom_object::InMemDicomObject;
use serde_json::{Map, Value};

use super::{lookup_tag, Error, Result, TagGroup, TagSpec};

/// Outcome of resolving a single [`TagSpec`] against a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// One of the candidate tags is present in the dataset.
    Found(Value),

    /// None of the candidates is present; the configured default applies.
    Default(Value),

    /// None of the candidates is present and there is no default.
    Absent,
}

impl Resolution {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolution::Found(value) | Resolution::Default(value) => Some(value),
            Resolution::Absent => None,
        }
    }
}

fn find_element<'a>(obj: &'a InMemDicomObject, name: &str) -> Option<&'a InMemElement> {
    lookup_tag(name).and_then(|tag| obj.element(tag).ok())
}

/// Resolves one [`TagSpec`]: the first candidate present in the dataset wins, then the
/// default, if any.
pub fn resolve_spec(obj: &InMemDicomObject, spec: &TagSpec) -> Result<Resolution> {
    for name in spec.names() {
        if let Some(elem) = find_element(obj, name) {
            return Ok(Resolution::Found(element_to_json(elem)?));
        }
    }

    Ok(match spec.default_value() {
        Some(default) => Resolution::Default(default.clone()),
        None => Resolution::Absent,
    })
}

/// Resolves every [`TagSpec`] of a [`TagGroup`] against a dataset.
///
/// The result is keyed by alias, in declaration order. Specs that resolve to nothing are
/// left out. When several specs share an alias, the last one wins.
///
/// # Example
///
/// ```
/// use dcmstore::tag_group::{resolve, TagGroupBuilder, TagSpec};
/// use dicom_core::{PrimitiveValue, VR};
/// use dicom_dictionary_std::tags;
/// use dicom_object::mem::{InMemDicomObject, InMemElement};
///
/// let group = TagGroupBuilder::new()
///     .tag(
///         TagSpec::new(["StudyInstanceUID", "SOPClassUID"])
///             .with_alias("study_uid")
///             .with_default("NOT_SET"),
///     )
///     .build()
///     .unwrap();
///
/// let mut obj = InMemDicomObject::new_empty();
/// obj.put(InMemElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.3")));
///
/// let result = resolve(&obj, &group).unwrap();
/// assert_eq!(result["study_uid"], "1.2.3");
/// ```
pub fn resolve(obj: &InMemDicomObject, group: &TagGroup) -> Result<Map<String, Value>> {
    let mut result = Map::new();
    for spec in group.specs() {
        if let Some(value) = resolve_spec(obj, spec)?.into_value() {
            result.insert(spec.alias().to_string(), value);
        }
    }
    Ok(result)
}

/// Maps an element value to JSON: single values become scalars, multiple values arrays.
pub(crate) fn element_to_json(elem: &InMemElement) -> Result<Value> {
    match elem.value() {
        DicomValue::Primitive(value) => Ok(primitive_to_json(value)),
        DicomValue::Sequence(seq) => seq
            .items()
            .iter()
            .map(|item| dicom_json::to_value(item).map_err(|e| Error::Read(format!("{e}"))))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        DicomValue::PixelSequence(_) => Ok(Value::Null),
    }
}

fn primitive_to_json(value: &PrimitiveValue) -> Value {
    let values: Vec<Value> = match value {
        PrimitiveValue::Empty => return Value::String(String::new()),
        PrimitiveValue::U8(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::I16(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::U16(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::I32(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::U32(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::I64(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::U64(v) => v.iter().map(|&x| Value::from(x)).collect(),
        PrimitiveValue::F32(v) => v.iter().map(|&x| Value::from(f64::from(x))).collect(),
        PrimitiveValue::F64(v) => v.iter().map(|&x| Value::from(x)).collect(),
        other => other
            .to_multi_str()
            .iter()
            .map(|s| Value::String(s.trim_end_matches(['\0', ' ']).to_string()))
            .collect(),
    };

    match <[Value; 1]>::try_from(values) {
        Ok([single]) => single,
        Err(values) => Value::Array(values),
    }
}
