//! Key tables and entity types of the study specification.

use std::fmt;

/// Persisted key names of a specification snippet.
pub mod keys {
    // Automatically managed, stored as raw values.
    pub const TYPE: &str = "type";
    pub const LOCATION: &str = "location";
    pub const UID: &str = "uid";
    pub const DATASET_ID: &str = "dataset_id";
    pub const DATASET_REFCOMMIT: &str = "dataset_refcommit";
    pub const STATUS: &str = "status";

    // Editable, stored as `{value, approved}` pairs.
    pub const SUBJECT: &str = "subject";
    pub const ANON_SUBJECT: &str = "anon_subject";
    pub const SESSION: &str = "session";
    pub const TASK: &str = "task";
    pub const RUN: &str = "run";
    pub const MODALITY: &str = "modality";
    pub const DESCRIPTION: &str = "description";
    pub const COMMENT: &str = "comment";
    pub const CONVERTER: &str = "converter";
    pub const CONVERTER_CONTAINER: &str = "converter_container";
    pub const ID: &str = "id";
    pub const ACQUISITION: &str = "acquisition";
    pub const CONTRAST_ENHANCEMENT: &str = "contrast_enhancement";
    pub const RECONSTRUCTION_ALGORITHM: &str = "reconstruction_algorithm";
    pub const ECHO: &str = "echo";
    pub const DIRECTION: &str = "direction";

    /// Substitution variable standing for `subject` or `anon_subject`.
    pub const BIDS_SUBJECT: &str = "bids_subject";
}

use keys::*;

/// Keys holding raw values rather than `{value, approved}` pairs.
pub const IMMUTABLE_KEYS: &[&str] = &[TYPE, LOCATION, UID, DATASET_ID, DATASET_REFCOMMIT, STATUS];

/// Keys every snippet must carry with a non-empty value.
pub const BASE_REQUIRED: &[&str] = &[TYPE, LOCATION, DATASET_ID, DATASET_REFCOMMIT, CONVERTER];

/// Keys any snippet may carry; empty values only warn.
pub const BASE_OPTIONAL: &[&str] = &[
    DESCRIPTION,
    COMMENT,
    STATUS,
    SUBJECT,
    ANON_SUBJECT,
    SESSION,
    TASK,
    RUN,
    MODALITY,
    CONVERTER_CONTAINER,
];

/// Additional required keys of a DICOM series snippet.
pub const DICOM_REQUIRED: &[&str] = &[UID, SUBJECT];

/// Additional optional keys of a DICOM series snippet.
pub const DICOM_OPTIONAL: &[&str] = &[
    ID,
    ACQUISITION,
    CONTRAST_ENHANCEMENT,
    RECONSTRUCTION_ALGORITHM,
    ECHO,
    DIRECTION,
];

/// Converter value excluding a record from conversion.
pub const IGNORE_CONVERTER: &str = "ignore";

/// Default name of the batch DICOM converter.
pub const DEFAULT_BATCH_CONVERTER: &str = "heudiconv";

/// Default file name of an acquisition's specification.
pub const DEFAULT_SPEC_FILENAME: &str = "studyspec.json";

/// Kind of entity a snippet describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    DicomSeries,
    DicomSeriesAll,
    GenericFile,
    GenericDirectory,
    GenericDataset,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        Self::DicomSeries,
        Self::DicomSeriesAll,
        Self::GenericFile,
        Self::GenericDirectory,
        Self::GenericDataset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DicomSeries => "dicomseries",
            Self::DicomSeriesAll => "dicomseries:all",
            Self::GenericFile => "generic_file",
            Self::GenericDirectory => "generic_directory",
            Self::GenericDataset => "generic_dataset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether records of this type are keyed by series UID.
    pub fn is_dicom_series(&self) -> bool {
        matches!(self, Self::DicomSeries)
    }

    pub fn is_generic(&self) -> bool {
        matches!(
            self,
            Self::GenericFile | Self::GenericDirectory | Self::GenericDataset
        )
    }

    /// Whether snippets of this type may carry `key` at all.
    pub fn allows_key(&self, key: &str) -> bool {
        let dicom = matches!(self, Self::DicomSeries | Self::DicomSeriesAll);
        BASE_REQUIRED.contains(&key)
            || BASE_OPTIONAL.contains(&key)
            || (dicom && (DICOM_REQUIRED.contains(&key) || DICOM_OPTIONAL.contains(&key)))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `key` is stored as a `{value, approved}` pair.
pub fn is_editable(key: &str) -> bool {
    !IMMUTABLE_KEYS.contains(&key)
}
