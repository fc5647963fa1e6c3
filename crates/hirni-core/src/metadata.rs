//! Already-parsed dataset metadata as handed over by a metadata source.
//!
//! DICOM parsing happens elsewhere. This module only models the structure
//! rules read from: dataset identity, commit, and a list of per-series
//! attribute mappings keyed by DICOM attribute name.

use serde::Deserialize;
use serde_json::{Map, Value};

/// DICOM attribute names read by the built-in rules.
pub mod attrs {
    pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
    pub const SERIES_NUMBER: &str = "SeriesNumber";
    pub const SERIES_DESCRIPTION: &str = "SeriesDescription";
    pub const PROTOCOL_NAME: &str = "ProtocolName";
    pub const PATIENT_ID: &str = "PatientID";
    pub const IMAGE_TYPE: &str = "ImageType";
}

/// Metadata reported for one dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetMetadata {
    /// Dataset path, relative to the dataset the query ran in.
    pub path: String,
    pub dsid: String,
    pub refcommit: String,
    #[serde(default)]
    pub metadata: MetadataBlocks,
}

/// Per-extractor metadata blocks. Only `dicom` is interpreted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataBlocks {
    #[serde(default)]
    pub dicom: Option<DicomMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DicomMetadata {
    #[serde(default, rename = "Series")]
    pub series: Vec<SeriesMeta>,
}

/// Attribute mapping of one DICOM series.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SeriesMeta(Map<String, Value>);

impl SeriesMeta {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self(attributes)
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.0.get(attribute).filter(|v| !v.is_null())
    }

    /// A non-empty string attribute, trimmed.
    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// An integer attribute; numeric strings are accepted.
    pub fn get_i64(&self, attribute: &str) -> Option<i64> {
        match self.get(attribute)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// An attribute rendered as text, for pattern matching.
    pub fn get_text(&self, attribute: &str) -> Option<String> {
        match self.get(attribute)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                    .collect::<Vec<_>>()
                    .join("\\"),
            ),
            other => Some(other.to_string()),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.get_str(attrs::SERIES_INSTANCE_UID)
    }

    /// `ImageType` values, from a list or a backslash-separated string.
    pub fn image_type(&self) -> Vec<String> {
        match self.get(attrs::IMAGE_TYPE) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_uppercase())
                .collect(),
            Some(Value::String(s)) => s.split('\\').map(|p| p.trim().to_uppercase()).collect(),
            _ => Vec::new(),
        }
    }
}

impl DatasetMetadata {
    /// DICOM series, or `None` when the dataset carries no DICOM metadata.
    pub fn dicom_series(&self) -> Option<&[SeriesMeta]> {
        self.metadata.dicom.as_ref().map(|d| d.series.as_slice())
    }
}

/// Source of dataset-level metadata for a path.
pub trait MetadataSource {
    type Error;

    /// Metadata of every dataset at or below `path`.
    fn dataset_metadata(&self, path: &str) -> Result<Vec<DatasetMetadata>, Self::Error>;
}
