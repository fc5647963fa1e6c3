//! Validation of specification snippets.
//!
//! Each snippet is checked by the validator registered for its `type`.
//! Validation works on raw snippets so that a malformed snippet yields
//! precise findings instead of a single parse failure, and it never
//! changes what it checks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::paths::is_within_tree;
use crate::record::{RawSnippet, value_is_empty};
use crate::schema::{
    BASE_OPTIONAL, BASE_REQUIRED, DICOM_OPTIONAL, DICOM_REQUIRED, EntityType, keys,
};
use crate::store::SpecStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Position of the snippet in the specification; `None` for
    /// store-level findings.
    pub record: Option<usize>,
    /// UID or location of the snippet, when it has one.
    pub identity: Option<String>,
    /// Key the finding is about.
    pub key: Option<String>,
    pub message: String,
}

impl Finding {
    pub fn error(key: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, key, message)
    }

    pub fn warning(key: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, key, message)
    }

    fn new(severity: Severity, key: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity,
            record: None,
            identity: None,
            key: key.map(str::to_string),
            message: message.into(),
        }
    }

    fn at(mut self, record: usize, identity: Option<String>) -> Self {
        self.record = Some(record);
        self.identity = identity;
        self
    }
}

/// Outcome of a store-level check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    /// The check exists as an extension point but does not run yet.
    NotEnforced,
    Checked(Vec<Finding>),
}

/// Checks snippets of one entity type.
pub trait SnippetValidator: Send + Sync {
    fn required_keys(&self) -> Vec<&'static str>;

    /// Keys that may appear; empty values only warn.
    fn optional_keys(&self) -> Vec<&'static str>;

    fn validate_snippet(&self, snippet: &RawSnippet) -> Vec<Finding> {
        base_checks(snippet, &self.required_keys(), &self.optional_keys())
    }

    /// Checks across all snippets of this validator's types.
    fn validate_consistency(&self, _snippets: &[&RawSnippet]) -> Consistency {
        Consistency::NotEnforced
    }
}

/// Whether a raw entry counts as empty; pairs are judged by their `value`.
fn entry_is_empty(entry: &Value) -> bool {
    match entry {
        Value::Object(pair) if pair.contains_key("value") => {
            pair.get("value").is_none_or(value_is_empty)
        }
        Value::Object(pair) => pair.is_empty(),
        other => value_is_empty(other),
    }
}

fn base_checks(snippet: &RawSnippet, required: &[&'static str], optional: &[&'static str]) -> Vec<Finding> {
    if snippet.is_empty() {
        return vec![Finding::error(None, "empty specification snippet")];
    }

    let mut findings = Vec::new();
    for &key in required {
        match snippet.get(key) {
            None => findings.push(Finding::error(Some(key), format!("snippet missing key '{key}'"))),
            Some(entry) if entry_is_empty(entry) => {
                findings.push(Finding::error(Some(key), format!("empty entry for '{key}'")))
            }
            Some(_) => {}
        }
    }
    for &key in optional {
        if required.contains(&key) {
            continue;
        }
        if snippet.get(key).is_some_and(entry_is_empty) {
            findings.push(Finding::warning(Some(key), format!("empty entry for '{key}'")));
        }
    }
    for key in snippet.keys() {
        if !required.contains(&key.as_str()) && !optional.contains(&key.as_str()) {
            findings.push(Finding::error(Some(key.as_str()), format!("unknown key '{key}'")));
        }
    }

    match snippet.get(keys::LOCATION) {
        Some(Value::String(location)) if !location.is_empty() => {
            if !is_within_tree(location) {
                findings.push(Finding::error(
                    Some(keys::LOCATION),
                    "'location' outside specification's tree",
                ));
            }
        }
        Some(Value::String(_)) | Some(Value::Null) | None => {}
        Some(_) => findings.push(Finding::error(Some(keys::LOCATION), "'location' must be a string")),
    }
    findings
}

/// Checks shared by every entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseValidator;

impl SnippetValidator for BaseValidator {
    fn required_keys(&self) -> Vec<&'static str> {
        BASE_REQUIRED.to_vec()
    }

    fn optional_keys(&self) -> Vec<&'static str> {
        BASE_OPTIONAL.to_vec()
    }
}

/// DICOM snippets additionally need `subject`, and per-series snippets a `uid`.
#[derive(Debug, Clone, Copy)]
pub struct DicomValidator {
    pub per_series: bool,
}

impl SnippetValidator for DicomValidator {
    fn required_keys(&self) -> Vec<&'static str> {
        let mut required = BaseValidator.required_keys();
        required.extend(
            DICOM_REQUIRED
                .iter()
                .filter(|k| self.per_series || **k != keys::UID),
        );
        required
    }

    fn optional_keys(&self) -> Vec<&'static str> {
        let mut optional = BaseValidator.optional_keys();
        optional.extend(DICOM_OPTIONAL);
        optional
    }
}

/// Result of validating one specification.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    /// Store-level checks that are declared but not yet enforced.
    pub not_enforced: Vec<EntityType>,
    pub records: usize,
}

impl ValidationReport {
    /// No error finding anywhere. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    /// Worst severity found for the snippet at `record`.
    pub fn record_severity(&self, record: usize) -> Severity {
        self.findings
            .iter()
            .filter(|f| f.record == Some(record))
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    /// Positions of snippets with at least one error.
    pub fn invalid_records(&self) -> BTreeSet<usize> {
        self.errors().filter_map(|f| f.record).collect()
    }
}

/// Validators keyed by entity type.
pub struct ValidatorRegistry {
    validators: BTreeMap<EntityType, Box<dyn SnippetValidator>>,
    fallback: BaseValidator,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(EntityType::DicomSeries, DicomValidator { per_series: true });
        registry.register(EntityType::DicomSeriesAll, DicomValidator { per_series: false });
        for t in [
            EntityType::GenericFile,
            EntityType::GenericDirectory,
            EntityType::GenericDataset,
        ] {
            registry.register(t, BaseValidator);
        }
        registry
    }
}

impl ValidatorRegistry {
    /// A registry knowing no type at all.
    pub fn empty() -> Self {
        Self {
            validators: BTreeMap::new(),
            fallback: BaseValidator,
        }
    }

    pub fn register(&mut self, entity_type: EntityType, validator: impl SnippetValidator + 'static) {
        self.validators.insert(entity_type, Box::new(validator));
    }

    pub fn validate(&self, snippets: &[RawSnippet]) -> ValidationReport {
        let mut report = ValidationReport {
            records: snippets.len(),
            ..ValidationReport::default()
        };
        let mut by_type: BTreeMap<EntityType, Vec<&RawSnippet>> = BTreeMap::new();

        for (idx, snippet) in snippets.iter().enumerate() {
            let identity = snippet
                .get(keys::UID)
                .or_else(|| snippet.get(keys::LOCATION))
                .and_then(Value::as_str)
                .map(str::to_string);
            let type_name = snippet.get(keys::TYPE);
            let entity_type = type_name.and_then(Value::as_str).and_then(EntityType::parse);

            let mut findings = match entity_type.and_then(|t| self.validators.get(&t)) {
                Some(validator) => validator.validate_snippet(snippet),
                None => self.fallback.validate_snippet(snippet),
            };
            if let Some(t) = entity_type {
                by_type.entry(t).or_default().push(snippet);
            }
            let registered = entity_type.is_some_and(|t| self.validators.contains_key(&t));
            if let Some(name) = type_name
                && !entry_is_empty(name)
                && !registered
            {
                let shown = name.as_str().map_or_else(|| name.to_string(), str::to_string);
                findings.push(Finding::error(
                    Some(keys::TYPE),
                    format!("unknown specification type '{shown}'"),
                ));
            }

            report
                .findings
                .extend(findings.into_iter().map(|f| f.at(idx, identity.clone())));
        }

        for (entity_type, group) in by_type {
            let Some(validator) = self.validators.get(&entity_type) else {
                continue;
            };
            match validator.validate_consistency(&group) {
                Consistency::NotEnforced => report.not_enforced.push(entity_type),
                Consistency::Checked(findings) => report.findings.extend(findings),
            }
        }
        report
    }

    pub fn validate_store(&self, store: &SpecStore) -> ValidationReport {
        let snippets: Vec<RawSnippet> = store.iter().cloned().map(RawSnippet::from).collect();
        self.validate(&snippets)
    }
}
