//! Specification snippets: one [`SpecRecord`] per described entity.
//!
//! A record serialises as a flat JSON object. Automatically managed keys
//! (`type`, `location`, `uid`, `dataset_id`, `dataset_refcommit`) hold raw
//! values; every other key holds a `{"value": .., "approved": ..}` pair.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::schema::{self, EntityType, IGNORE_CONVERTER, keys};

/// One snippet as read from a specification file, before any schema check.
pub type RawSnippet = serde_json::Map<String, Value>;

/// An editable value plus whether a human confirmed it.
///
/// Unapproved values are re-derived freely; approved ones are never
/// overwritten by derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub value: Option<Value>,
    #[serde(default)]
    pub approved: bool,
}

impl Field {
    /// A derived, unapproved value.
    pub fn derived(value: impl Into<Value>) -> Self {
        Self::from_value(value.into(), false)
    }

    /// A pre-approved value, e.g. from explicit properties.
    pub fn approved(value: impl Into<Value>) -> Self {
        Self::from_value(value.into(), true)
    }

    fn from_value(value: Value, approved: bool) -> Self {
        let value = if value.is_null() { None } else { Some(value) };
        Self { value, approved }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    /// `None`, `null` and `""` count as empty.
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().is_none_or(value_is_empty)
    }

    /// Render the value for command substitution.
    pub fn render(&self) -> Option<String> {
        self.value.as_ref().and_then(render_value)
    }
}

/// Whether a JSON value counts as "no value".
pub fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Render a scalar JSON value as plain text (strings without quotes).
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// How a record's `converter` resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter<'a> {
    /// Excluded from conversion, kept in the store.
    Ignore,
    /// Delegated to the shared batch DICOM converter.
    Batch,
    /// Explicit command template.
    Command(&'a str),
}

/// Specification snippet describing a single data entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawSnippet", into = "RawSnippet")]
pub struct SpecRecord {
    pub entity_type: EntityType,
    /// Path of the data relative to the specification file's directory.
    pub location: String,
    /// DICOM series instance UID; only series carry one.
    pub uid: Option<String>,
    pub dataset_id: String,
    pub dataset_refcommit: String,
    fields: BTreeMap<String, Field>,
}

impl SpecRecord {
    pub fn new(entity_type: EntityType, location: impl Into<String>) -> Self {
        Self {
            entity_type,
            location: location.into(),
            uid: None,
            dataset_id: String::new(),
            dataset_refcommit: String::new(),
            fields: BTreeMap::new(),
        }
    }

    /// A DICOM series record keyed by its series instance UID.
    pub fn dicom_series(uid: impl Into<String>, location: impl Into<String>) -> Self {
        let mut record = Self::new(EntityType::DicomSeries, location);
        record.uid = Some(uid.into());
        record
    }

    pub fn with_provenance(mut self, dataset_id: &str, refcommit: &str) -> Self {
        self.dataset_id = dataset_id.to_string();
        self.dataset_refcommit = refcommit.to_string();
        self
    }

    pub fn with_field(mut self, key: &str, field: Field) -> Self {
        self.set_field(key, field);
        self
    }

    /// Default identity: series UID for DICOM series, location otherwise.
    pub fn identity_key(&self) -> &str {
        match (&self.entity_type, &self.uid) {
            (EntityType::DicomSeries, Some(uid)) => uid,
            _ => &self.location,
        }
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// The field's value as a string, if it is one.
    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Field::as_str)
    }

    /// Set an editable field. Immutable keys are ignored.
    pub fn set_field(&mut self, key: &str, field: Field) {
        if schema::is_editable(key) {
            self.fields.insert(key.to_string(), field);
        } else {
            tracing::debug!(key, "ignoring attempt to set an immutable key as a field");
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, f)| (k.as_str(), f))
    }

    /// Resolve `converter`; `None` when absent or empty.
    pub fn converter(&self, batch_converter: &str) -> Option<Converter<'_>> {
        let value = self.value_str(keys::CONVERTER).filter(|v| !v.is_empty())?;
        Some(if value == IGNORE_CONVERTER {
            Converter::Ignore
        } else if value == batch_converter {
            Converter::Batch
        } else {
            Converter::Command(value)
        })
    }

    /// Same identity and same content, field by field.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type
            && self.location == other.location
            && self.uid == other.uid
            && self.dataset_id == other.dataset_id
            && self.dataset_refcommit == other.dataset_refcommit
            && self.fields == other.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut BTreeMap<String, Field> {
        &mut self.fields
    }
}

/// Records are the same entity when their identity keys match.
impl PartialEq for SpecRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }
}

impl Eq for SpecRecord {}

impl From<SpecRecord> for RawSnippet {
    fn from(record: SpecRecord) -> Self {
        let mut raw = RawSnippet::new();
        raw.insert(keys::TYPE.into(), Value::from(record.entity_type.as_str()));
        raw.insert(keys::LOCATION.into(), Value::from(record.location));
        if let Some(uid) = record.uid {
            raw.insert(keys::UID.into(), Value::from(uid));
        }
        raw.insert(keys::DATASET_ID.into(), Value::from(record.dataset_id));
        raw.insert(
            keys::DATASET_REFCOMMIT.into(),
            Value::from(record.dataset_refcommit),
        );

        let mut fields = record.fields;
        fields.entry(keys::CONVERTER.to_string()).or_default();
        for (key, field) in fields {
            let mut pair = serde_json::Map::new();
            pair.insert("approved".into(), Value::Bool(field.approved));
            pair.insert("value".into(), field.value.unwrap_or(Value::Null));
            raw.insert(key, Value::Object(pair));
        }
        raw
    }
}

impl TryFrom<RawSnippet> for SpecRecord {
    type Error = SchemaError;

    fn try_from(mut raw: RawSnippet) -> Result<Self, Self::Error> {
        if raw.is_empty() {
            return Err(SchemaError::Empty);
        }

        let type_name = take_string(&mut raw, keys::TYPE)?;
        let entity_type = EntityType::parse(&type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.clone()))?;
        let location = take_string(&mut raw, keys::LOCATION)?;
        let dataset_id = take_string(&mut raw, keys::DATASET_ID)?;
        let dataset_refcommit = take_string(&mut raw, keys::DATASET_REFCOMMIT)?;
        let uid = if entity_type.is_dicom_series() {
            Some(take_string(&mut raw, keys::UID)?)
        } else {
            match raw.remove(keys::UID) {
                Some(Value::String(s)) if !s.is_empty() => Some(s),
                Some(Value::String(_)) | Some(Value::Null) | None => None,
                Some(_) => {
                    return Err(SchemaError::Shape {
                        key: keys::UID.into(),
                        expected: "a string",
                    });
                }
            }
        };
        // Legacy process-state marker, not carried over.
        raw.remove(keys::STATUS);

        if !raw.contains_key(keys::CONVERTER) {
            return Err(SchemaError::MissingKey(keys::CONVERTER.into()));
        }

        let mut fields = BTreeMap::new();
        for (key, value) in raw {
            if !value.is_object() {
                return Err(SchemaError::Shape {
                    key,
                    expected: "a {value, approved} pair",
                });
            }
            let field: Field =
                serde_json::from_value(value).map_err(|_| SchemaError::Shape {
                    key: key.clone(),
                    expected: "a {value, approved} pair",
                })?;
            fields.insert(key, field);
        }

        Ok(Self {
            entity_type,
            location,
            uid,
            dataset_id,
            dataset_refcommit,
            fields,
        })
    }
}

fn take_string(raw: &mut RawSnippet, key: &str) -> Result<String, SchemaError> {
    match raw.remove(key) {
        None => Err(SchemaError::MissingKey(key.into())),
        Some(Value::String(s)) if s.is_empty() => Err(SchemaError::EmptyValue(key.into())),
        Some(Value::Null) => Err(SchemaError::EmptyValue(key.into())),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(SchemaError::Shape {
            key: key.into(),
            expected: "a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series() -> SpecRecord {
        SpecRecord::dicom_series("1.2.3", "dicoms")
            .with_provenance("ds-1", "abc123")
            .with_field(keys::SUBJECT, Field::derived("02"))
            .with_field(keys::CONVERTER, Field::derived("heudiconv"))
    }

    #[test]
    fn fresh_fields_default_to_unapproved_none() {
        let record = SpecRecord::new(EntityType::GenericFile, "events.tsv");
        assert!(record.field(keys::SUBJECT).is_none());
        assert_eq!(record.converter("heudiconv"), None);

        let raw = RawSnippet::from(record);
        assert_eq!(raw[keys::CONVERTER], json!({"value": null, "approved": false}));
    }

    #[test]
    fn serialises_flat_with_pairs() {
        let value = serde_json::to_value(series()).unwrap();
        assert_eq!(value["type"], "dicomseries");
        assert_eq!(value["uid"], "1.2.3");
        assert_eq!(value["subject"], json!({"value": "02", "approved": false}));
    }

    #[test]
    fn identity_is_uid_for_series_and_location_otherwise() {
        assert_eq!(series().identity_key(), "1.2.3");
        let generic = SpecRecord::new(EntityType::GenericFile, "beh/events.tsv");
        assert_eq!(generic.identity_key(), "beh/events.tsv");

        let mut moved = series();
        moved.location = "elsewhere".into();
        assert_eq!(moved, series());
        assert!(!moved.content_eq(&series()));
    }

    #[test]
    fn rejects_missing_required_keys() {
        let mut raw = RawSnippet::from(series());
        raw.remove("dataset_refcommit");
        let err = SpecRecord::try_from(raw).unwrap_err();
        assert_eq!(err, SchemaError::MissingKey("dataset_refcommit".into()));

        let mut raw = RawSnippet::from(series());
        raw.remove("converter");
        let err = SpecRecord::try_from(raw).unwrap_err();
        assert_eq!(err, SchemaError::MissingKey("converter".into()));

        let mut raw = RawSnippet::from(series());
        raw.insert("location".into(), json!(""));
        let err = SpecRecord::try_from(raw).unwrap_err();
        assert_eq!(err, SchemaError::EmptyValue("location".into()));
    }

    #[test]
    fn rejects_empty_and_misshapen_snippets() {
        assert_eq!(SpecRecord::try_from(RawSnippet::new()).unwrap_err(), SchemaError::Empty);

        let mut raw = RawSnippet::from(series());
        raw.insert("task".into(), json!("oneback"));
        assert!(matches!(
            SpecRecord::try_from(raw),
            Err(SchemaError::Shape { key, .. }) if key == "task"
        ));

        let mut raw = RawSnippet::from(series());
        raw.insert("type".into(), json!("nifti"));
        assert_eq!(
            SpecRecord::try_from(raw).unwrap_err(),
            SchemaError::UnknownType("nifti".into())
        );
    }

    #[test]
    fn generic_uid_is_kept_or_rejected_never_dropped() {
        let generic = || {
            SpecRecord::new(EntityType::GenericFile, "events.tsv")
                .with_provenance("ds-1", "abc123")
        };

        let mut raw = RawSnippet::from(generic());
        raw.insert("uid".into(), json!("1.2.3"));
        assert_eq!(SpecRecord::try_from(raw).unwrap().uid.as_deref(), Some("1.2.3"));

        let mut raw = RawSnippet::from(generic());
        raw.insert("uid".into(), json!(123));
        assert!(matches!(
            SpecRecord::try_from(raw),
            Err(SchemaError::Shape { key, .. }) if key == "uid"
        ));

        let mut raw = RawSnippet::from(generic());
        raw.insert("uid".into(), json!(null));
        assert_eq!(SpecRecord::try_from(raw).unwrap().uid, None);
    }

    #[test]
    fn parses_numeric_values_and_missing_approval() {
        let raw: RawSnippet = serde_json::from_value(json!({
            "type": "dicomseries",
            "location": "dicoms",
            "uid": "1.2.3",
            "dataset_id": "ds-1",
            "dataset_refcommit": "abc123",
            "converter": {"value": "ignore"},
            "id": {"value": 401, "approved": true},
        }))
        .unwrap();
        let record = SpecRecord::try_from(raw).unwrap();
        assert_eq!(record.converter("heudiconv"), Some(Converter::Ignore));
        assert!(!record.field("converter").unwrap().approved);
        assert_eq!(record.field("id").unwrap().render().as_deref(), Some("401"));
    }

    #[test]
    fn converter_resolution() {
        let mut record = series();
        assert_eq!(record.converter("heudiconv"), Some(Converter::Batch));
        record.set_field(keys::CONVERTER, Field::approved("bash convert.sh {location}"));
        assert_eq!(
            record.converter("heudiconv"),
            Some(Converter::Command("bash convert.sh {location}"))
        );
        record.set_field(keys::CONVERTER, Field::derived(""));
        assert_eq!(record.converter("heudiconv"), None);
    }

    #[test]
    fn immutable_keys_cannot_be_set_as_fields() {
        let mut record = series();
        record.set_field(keys::LOCATION, Field::approved("../escape"));
        assert_eq!(record.location, "dicoms");
        assert!(!record.has_field(keys::LOCATION));
    }
}
