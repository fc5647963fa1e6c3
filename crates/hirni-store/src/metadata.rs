//! Metadata dumps: dataset metadata records saved as JSON.

use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};

use hirni_core::paths::relative_location;
use hirni_core::{DatasetMetadata, MetadataSource};
use tracing::debug;

use crate::StoreError;

/// Dataset metadata read from a file holding a JSON array, a single JSON
/// object, or one JSON object per line.
#[derive(Debug, Clone)]
pub struct MetadataDump {
    path: PathBuf,
    entries: Vec<DatasetMetadata>,
}

impl MetadataDump {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = Self::parse(path, &content)?;
        debug!(path = %path.display(), count = entries.len(), "read metadata dump");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn parse(path: &Path, content: &str) -> Result<Vec<DatasetMetadata>, StoreError> {
        let json_err = |line: usize| {
            move |source| StoreError::Json {
                path: path.to_path_buf(),
                line,
                source,
            }
        };

        if content.trim_start().starts_with('[') {
            return serde_json::from_str(content).map_err(|e: serde_json::Error| {
                let line = e.line();
                json_err(line)(e)
            });
        }
        if let Ok(single) = serde_json::from_str::<DatasetMetadata>(content) {
            return Ok(vec![single]);
        }
        content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(idx, l)| serde_json::from_str(l).map_err(json_err(idx + 1)))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[DatasetMetadata] {
        &self.entries
    }
}

impl MetadataSource for MetadataDump {
    type Error = Infallible;

    fn dataset_metadata(&self, path: &str) -> Result<Vec<DatasetMetadata>, Self::Error> {
        Ok(self
            .entries
            .iter()
            .filter(|m| relative_location(&m.path, path).is_some())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FUNC: &str = r#"{"path": "acq1/dicoms", "dsid": "ds-1", "refcommit": "abc", "metadata": {"dicom": {"Series": []}}}"#;
    const STRUCT: &str = r#"{"path": "acq2/dicoms", "dsid": "ds-2", "refcommit": "def", "metadata": {}}"#;

    #[test]
    fn reads_lines_arrays_and_objects() {
        let tmp = TempDir::new().unwrap();
        let lines = tmp.path().join("meta.jsonl");
        fs::write(&lines, format!("{FUNC}\n\n{STRUCT}\n")).unwrap();
        assert_eq!(MetadataDump::open(&lines).unwrap().entries().len(), 2);

        let array = tmp.path().join("meta.json");
        fs::write(&array, format!("[{FUNC}, {STRUCT}]")).unwrap();
        assert_eq!(MetadataDump::open(&array).unwrap().entries().len(), 2);

        let single = tmp.path().join("one.json");
        fs::write(&single, FUNC).unwrap();
        assert_eq!(MetadataDump::open(&single).unwrap().entries()[0].dsid, "ds-1");
    }

    #[test]
    fn filters_by_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.jsonl");
        fs::write(&path, format!("{FUNC}\n{STRUCT}\n")).unwrap();
        let dump = MetadataDump::open(&path).unwrap();
        assert_eq!(dump.dataset_metadata(".").unwrap().len(), 2);
        let acq1 = dump.dataset_metadata("acq1").unwrap();
        assert_eq!(acq1.len(), 1);
        assert_eq!(acq1[0].path, "acq1/dicoms");
        assert!(dump.dataset_metadata("acq3").unwrap().is_empty());
    }

    #[test]
    fn bad_lines_report_their_number() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.jsonl");
        fs::write(&path, format!("{FUNC}\n{{\"path\": 1}}\n")).unwrap();
        assert!(matches!(
            MetadataDump::open(&path),
            Err(StoreError::Json { line: 2, .. })
        ));
    }
}
