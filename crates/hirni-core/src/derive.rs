//! Candidate records from metadata and explicit paths.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::metadata::DatasetMetadata;
use crate::record::{Field, SpecRecord};
use crate::rules::{RuleContext, RuleEngine};
use crate::schema::{EntityType, keys};

/// Explicit properties, applied pre-approved on top of derived values.
pub type Properties = BTreeMap<String, Field>;

/// What a dataset's metadata yields for the specification.
#[derive(Debug)]
pub enum DicomDerivation {
    /// The dataset carries no DICOM metadata.
    NoDicom,
    /// DICOM metadata without any image series.
    NoSeries,
    Candidates {
        records: Vec<SpecRecord>,
        /// Series skipped for lacking a series instance UID.
        missing_uid: usize,
    },
}

/// Derive one candidate record per DICOM series of a dataset.
///
/// `location` is the dataset path relative to the specification file's
/// directory.
pub fn dicom_candidates(
    meta: &DatasetMetadata,
    location: &str,
    engine: &RuleEngine,
    ctx: &RuleContext<'_>,
    properties: &Properties,
) -> DicomDerivation {
    let Some(series) = meta.dicom_series() else {
        return DicomDerivation::NoDicom;
    };
    if series.is_empty() {
        return DicomDerivation::NoSeries;
    }
    debug!(count = series.len(), path = %meta.path, "discovered image series");

    let patches = engine.derive(series, ctx);
    let mut records = Vec::with_capacity(series.len());
    let mut missing_uid = 0;
    for (s, patch) in series.iter().zip(patches) {
        let Some(uid) = s.uid() else {
            warn!(path = %meta.path, "series without SeriesInstanceUID skipped");
            missing_uid += 1;
            continue;
        };
        let mut record = SpecRecord::dicom_series(uid, location)
            .with_provenance(&meta.dsid, &meta.refcommit)
            .with_field(keys::CONVERTER, Field::default());
        for (key, value) in patch {
            record.set_field(&key, Field::derived(value));
        }
        apply_properties(&mut record, properties);
        records.push(record);
    }
    DicomDerivation::Candidates {
        records,
        missing_uid,
    }
}

/// A candidate record for an arbitrary file, directory or dataset.
pub fn generic_candidate(
    entity_type: EntityType,
    location: &str,
    dataset_id: &str,
    refcommit: &str,
    properties: &Properties,
) -> SpecRecord {
    let mut record = SpecRecord::new(entity_type, location)
        .with_provenance(dataset_id, refcommit)
        .with_field(keys::CONVERTER, Field::default());
    apply_properties(&mut record, properties);
    record
}

fn apply_properties(record: &mut SpecRecord, properties: &Properties) {
    for (key, field) in properties {
        record.set_field(key, field.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Converter;
    use serde_json::json;

    fn dataset(series: serde_json::Value) -> DatasetMetadata {
        serde_json::from_value(json!({
            "path": "acq1/dicoms",
            "dsid": "ds-1",
            "refcommit": "abc123",
            "metadata": {"dicom": {"Series": series}},
        }))
        .unwrap()
    }

    #[test]
    fn derives_records_per_series() {
        let meta = dataset(json!([
            {"SeriesInstanceUID": "1.2.3", "SeriesNumber": 401,
             "SeriesDescription": "func_task-oneback_run-1", "PatientID": "02"},
            {"SeriesInstanceUID": "1.2.4", "SeriesDescription": "localizer", "PatientID": "02"},
            {"SeriesDescription": "anat-T1w"},
        ]));
        let DicomDerivation::Candidates { records, missing_uid } = dicom_candidates(
            &meta,
            "dicoms",
            &RuleEngine::with_defaults(),
            &RuleContext::default(),
            &Properties::new(),
        ) else {
            panic!("expected candidates");
        };
        assert_eq!(missing_uid, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].location, "dicoms");
        assert_eq!(records[0].dataset_refcommit, "abc123");
        assert_eq!(records[0].converter("heudiconv"), Some(Converter::Batch));
        assert_eq!(records[0].field(keys::ID), Some(&Field::derived(401)));
        assert_eq!(records[1].converter("heudiconv"), Some(Converter::Ignore));
        assert!(records.iter().all(|r| !r.field(keys::SUBJECT).unwrap().approved));
    }

    #[test]
    fn properties_are_layered_on_top() {
        let meta = dataset(json!([
            {"SeriesInstanceUID": "1.2.3", "SeriesDescription": "anat-T1w", "PatientID": "02"},
        ]));
        let properties = Properties::from([
            ("subject".to_string(), Field::approved("05")),
            ("location".to_string(), Field::approved("../elsewhere")),
        ]);
        let DicomDerivation::Candidates { records, .. } = dicom_candidates(
            &meta,
            "dicoms",
            &RuleEngine::with_defaults(),
            &RuleContext::default(),
            &properties,
        ) else {
            panic!("expected candidates");
        };
        assert_eq!(records[0].field(keys::SUBJECT), Some(&Field::approved("05")));
        assert_eq!(records[0].location, "dicoms");
    }

    #[test]
    fn datasets_without_series() {
        let engine = RuleEngine::with_defaults();
        let ctx = RuleContext::default();
        let props = Properties::new();
        assert!(matches!(
            dicom_candidates(&dataset(json!([])), "x", &engine, &ctx, &props),
            DicomDerivation::NoSeries
        ));
        let plain: DatasetMetadata =
            serde_json::from_value(json!({"path": ".", "dsid": "d", "refcommit": "c"})).unwrap();
        assert!(matches!(
            dicom_candidates(&plain, "x", &engine, &ctx, &props),
            DicomDerivation::NoDicom
        ));
    }

    #[test]
    fn generic_candidates_have_no_converter() {
        let record = generic_candidate(
            EntityType::GenericFile,
            "beh/events.tsv",
            "ds-1",
            "abc123",
            &Properties::new(),
        );
        assert!(record.field(keys::CONVERTER).unwrap().is_empty());
        assert_eq!(record.converter("heudiconv"), None);
    }
}
