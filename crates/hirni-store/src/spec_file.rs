//! Specification files: one JSON object per line.
//!
//! Files are read in full and written in full. Writes go to a temporary
//! file in the target's directory which then atomically replaces the
//! target, so readers see either the old or the new content.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use hirni_core::{RawSnippet, SchemaError, SpecRecord, SpecStore};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::StoreError;

/// A snippet that parsed as JSON but is not a valid record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSnippet {
    /// 1-based line number.
    pub line: usize,
    pub error: SchemaError,
}

/// Records of a specification file, plus the lines that failed to load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub records: Vec<SpecRecord>,
    pub rejected: Vec<RejectedSnippet>,
}

impl LoadReport {
    /// Rewriting a file with rejected lines would drop them.
    pub fn ensure_complete(&self, path: &Path) -> Result<(), StoreError> {
        if self.rejected.is_empty() {
            Ok(())
        } else {
            Err(StoreError::RejectedSnippets {
                path: path.to_path_buf(),
                rejected: self.rejected.len(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpecFile {
    path: PathBuf,
}

impl SpecFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Every non-blank line as a raw snippet, with its 1-based line number.
    ///
    /// Lines that are not JSON objects are structural failures.
    pub fn read_raw(&self) -> Result<Vec<(usize, RawSnippet)>, StoreError> {
        let file = File::open(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::SpecNotFound(self.path.clone())
            } else {
                StoreError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let mut snippets = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                line: line_no,
                source,
            })?;
            let Value::Object(snippet) = value else {
                return Err(StoreError::NotAnObject {
                    path: self.path.clone(),
                    line: line_no,
                });
            };
            snippets.push((line_no, snippet));
        }
        debug!(path = %self.path.display(), count = snippets.len(), "read specification");
        Ok(snippets)
    }

    /// Load records, keeping file order. A missing file is an error.
    pub fn load(&self) -> Result<LoadReport, StoreError> {
        let mut report = LoadReport::default();
        for (line, raw) in self.read_raw()? {
            match SpecRecord::try_from(raw) {
                Ok(record) => report.records.push(record),
                Err(error) => {
                    warn!(path = %self.path.display(), line, %error, "rejected specification snippet");
                    report.rejected.push(RejectedSnippet { line, error });
                }
            }
        }
        Ok(report)
    }

    /// Like [`load`](Self::load), but a missing file is an empty specification.
    pub fn load_or_empty(&self) -> Result<LoadReport, StoreError> {
        match self.load() {
            Err(StoreError::SpecNotFound(_)) => Ok(LoadReport::default()),
            other => other,
        }
    }

    /// Write the store in its current order and atomically replace the file.
    pub fn persist(&self, store: &SpecStore) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for record in store.iter() {
                let line = serde_json::to_string(record)?;
                writeln!(writer, "{line}").map_err(io_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|source| StoreError::Persist {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), count = store.len(), "persisted specification");
        Ok(())
    }
}
