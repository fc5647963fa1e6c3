//! Ordered derivation rules over DICOM series metadata.
//!
//! A rule maps the full list of series of one dataset to one patch per
//! series (same length, same order). The engine layers the patches of all
//! rules in order; later rules overwrite the keys they return and leave the
//! rest alone. A rule that cannot make sense of a series returns an empty
//! patch for it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::metadata::{SeriesMeta, attrs};
use crate::schema::{DEFAULT_BATCH_CONVERTER, IGNORE_CONVERTER, keys};
use crate::sort_key::normalize_run;
use crate::store::SpecStore;

/// Field values a rule proposes for one series.
pub type Patch = BTreeMap<String, Value>;

/// Per-invocation inputs shared by all rules.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub subject: Option<&'a str>,
    pub anon_subject: Option<&'a str>,
    pub session: Option<&'a str>,
    /// Specification the candidates will be merged into.
    pub existing: Option<&'a SpecStore>,
    pub batch_converter: &'a str,
}

impl Default for RuleContext<'_> {
    fn default() -> Self {
        Self {
            subject: None,
            anon_subject: None,
            session: None,
            existing: None,
            batch_converter: DEFAULT_BATCH_CONVERTER,
        }
    }
}

pub trait Rule: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// One patch per entry of `series`, in the same order.
    fn apply(&self, series: &[SeriesMeta], ctx: &RuleContext<'_>) -> Vec<Patch>;
}

/// Applies an ordered list of rules as successive patches.
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    /// An engine without any rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules, in their fixed order.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_rule(ConverterRule)
            .with_rule(SubjectRule)
            .with_rule(NamingRule)
            .with_rule(RunNumberingRule)
            .with_rule(SeriesIdRule)
            .with_rule(SessionRule)
    }

    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Box<dyn Rule>>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name())
    }

    /// Accumulated patch per series after applying every rule in order.
    pub fn derive(&self, series: &[SeriesMeta], ctx: &RuleContext<'_>) -> Vec<Patch> {
        let mut acc = vec![Patch::new(); series.len()];
        for rule in &self.rules {
            let patches = rule.apply(series, ctx);
            if patches.len() != series.len() {
                warn!(
                    rule = rule.name(),
                    expected = series.len(),
                    got = patches.len(),
                    "rule returned a patch count that does not match the series; skipped"
                );
                continue;
            }
            for (entry, patch) in acc.iter_mut().zip(patches) {
                entry.extend(patch);
            }
            debug!(rule = rule.name(), "applied rule");
        }
        acc
    }
}

// ---------------------------------------------------------------------------
// Series naming
// ---------------------------------------------------------------------------

/// BIDS-style naming parsed from a series description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesName {
    pub datatype: Option<String>,
    pub modality: Option<String>,
    /// Field key to label, e.g. `("task", "oneback")`.
    pub entities: BTreeMap<&'static str, String>,
}

const DATATYPES: &[&str] = &["anat", "func", "dwi", "fmap", "perf"];

fn entity_key(label: &str) -> Option<&'static str> {
    Some(match label {
        "task" => keys::TASK,
        "run" => keys::RUN,
        "acq" => keys::ACQUISITION,
        "ses" => keys::SESSION,
        "ce" => keys::CONTRAST_ENHANCEMENT,
        "rec" => keys::RECONSTRUCTION_ALGORITHM,
        "echo" => keys::ECHO,
        "dir" => keys::DIRECTION,
        _ => return None,
    })
}

impl SeriesName {
    /// Parse `<datatype>[-<suffix>]_<key>-<value>...`.
    ///
    /// `func_task-oneback_run-1` gives modality `bold`, task `oneback`,
    /// run `01`; `anat-T1w` gives modality `t1w`. Unknown tokens are ignored.
    pub fn parse(description: &str) -> Self {
        let mut name = Self::default();
        for (i, token) in description.split('_').enumerate() {
            let (head, tail) = match token.split_once('-') {
                Some((h, t)) => (h, Some(t)),
                None => (token, None),
            };
            if i == 0 && DATATYPES.contains(&head.to_ascii_lowercase().as_str()) {
                let datatype = head.to_ascii_lowercase();
                let suffix = tail.filter(|t| !t.is_empty()).map(str::to_ascii_lowercase);
                name.modality = match datatype.as_str() {
                    "func" => Some(suffix.unwrap_or_else(|| "bold".into())),
                    "dwi" => Some(suffix.unwrap_or_else(|| "dwi".into())),
                    "perf" => Some(suffix.unwrap_or_else(|| "asl".into())),
                    _ => suffix,
                };
                name.datatype = Some(datatype);
                continue;
            }
            let (Some(key), Some(value)) = (entity_key(head), tail) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let value = if key == keys::RUN {
                normalize_run(value)
            } else {
                value.to_string()
            };
            name.entities.insert(key, value);
        }
        name
    }

    pub fn of(series: &SeriesMeta) -> Option<Self> {
        naming_source(series).map(Self::parse)
    }

    fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }
}

fn naming_source(series: &SeriesMeta) -> Option<&str> {
    series
        .get_str(attrs::SERIES_DESCRIPTION)
        .or_else(|| series.get_str(attrs::PROTOCOL_NAME))
}

/// Whether a series is worth converting at all.
pub fn series_is_convertible(series: &SeriesMeta) -> bool {
    if series.uid().is_none() {
        return false;
    }
    if series.image_type().iter().any(|t| t == "DERIVED") {
        return false;
    }
    let label = naming_source(series).unwrap_or_default().to_lowercase();
    !(label.contains("localizer") || label.contains("scout"))
}

fn single(key: &str, value: impl Into<Value>) -> Patch {
    Patch::from([(key.to_string(), value.into())])
}

// ---------------------------------------------------------------------------
// Built-in rules
// ---------------------------------------------------------------------------

/// `converter`: the batch converter, or `ignore` for unconvertible series.
#[derive(Debug, Clone, Copy)]
pub struct ConverterRule;

impl Rule for ConverterRule {
    fn name(&self) -> &str {
        "converter"
    }

    fn apply(&self, series: &[SeriesMeta], ctx: &RuleContext<'_>) -> Vec<Patch> {
        series
            .iter()
            .map(|s| {
                let converter = if series_is_convertible(s) {
                    ctx.batch_converter
                } else {
                    IGNORE_CONVERTER
                };
                single(keys::CONVERTER, converter)
            })
            .collect()
    }
}

/// `subject` from the override or `PatientID`; `anon_subject` from the
/// override only.
#[derive(Debug, Clone, Copy)]
pub struct SubjectRule;

impl Rule for SubjectRule {
    fn name(&self) -> &str {
        "subject"
    }

    fn apply(&self, series: &[SeriesMeta], ctx: &RuleContext<'_>) -> Vec<Patch> {
        series
            .iter()
            .map(|s| {
                let mut patch = Patch::new();
                if let Some(subject) = ctx.subject.or_else(|| s.get_str(attrs::PATIENT_ID)) {
                    patch.insert(keys::SUBJECT.into(), subject.into());
                }
                if let Some(anon) = ctx.anon_subject {
                    patch.insert(keys::ANON_SUBJECT.into(), anon.into());
                }
                patch
            })
            .collect()
    }
}

/// `description`, `modality` and BIDS entities from the series description.
#[derive(Debug, Clone, Copy)]
pub struct NamingRule;

impl Rule for NamingRule {
    fn name(&self) -> &str {
        "naming"
    }

    fn apply(&self, series: &[SeriesMeta], _ctx: &RuleContext<'_>) -> Vec<Patch> {
        series
            .iter()
            .map(|s| {
                let Some(description) = naming_source(s) else {
                    return Patch::new();
                };
                let name = SeriesName::parse(description);
                let mut patch = single(keys::DESCRIPTION, description);
                if let Some(modality) = name.modality {
                    patch.insert(keys::MODALITY.into(), modality.into());
                }
                for (key, value) in name.entities {
                    patch.insert(key.into(), value.into());
                }
                patch
            })
            .collect()
    }
}

/// Numbers runs of convertible series that share modality, task and
/// acquisition but carry no explicit run, in `SeriesNumber` order.
///
/// Numbering continues after runs already used by other series of the
/// existing specification.
#[derive(Debug, Clone, Copy)]
pub struct RunNumberingRule;

type RunGroup = (String, Option<String>, Option<String>);

impl Rule for RunNumberingRule {
    fn name(&self) -> &str {
        "run-numbering"
    }

    fn apply(&self, series: &[SeriesMeta], ctx: &RuleContext<'_>) -> Vec<Patch> {
        let mut groups: HashMap<RunGroup, Vec<(i64, usize)>> = HashMap::new();
        for (idx, s) in series.iter().enumerate() {
            if !series_is_convertible(s) {
                continue;
            }
            let Some(name) = SeriesName::of(s) else {
                continue;
            };
            let Some(modality) = name.modality.clone() else {
                continue;
            };
            if name.entity(keys::RUN).is_some() {
                continue;
            }
            let group = (
                modality,
                name.entity(keys::TASK).map(str::to_string),
                name.entity(keys::ACQUISITION).map(str::to_string),
            );
            let order = s.get_i64(attrs::SERIES_NUMBER).unwrap_or(i64::MAX);
            groups.entry(group).or_default().push((order, idx));
        }

        let batch_uids: HashSet<&str> = series.iter().filter_map(SeriesMeta::uid).collect();
        let mut patches = vec![Patch::new(); series.len()];
        for (group, mut members) in groups {
            members.sort();
            let offset = ctx
                .existing
                .map_or(0, |store| highest_run(store, &group, &batch_uids));
            for (n, (_, idx)) in members.into_iter().enumerate() {
                let run = normalize_run(&(offset + n as u64 + 1).to_string());
                patches[idx] = single(keys::RUN, run);
            }
        }
        patches
    }
}

fn highest_run(store: &SpecStore, group: &RunGroup, skip: &HashSet<&str>) -> u64 {
    store
        .iter()
        .filter(|r| r.entity_type.is_dicom_series())
        .filter(|r| r.uid.as_deref().is_none_or(|uid| !skip.contains(uid)))
        .filter(|r| {
            r.value_str(keys::MODALITY) == Some(group.0.as_str())
                && r.value_str(keys::TASK) == group.1.as_deref()
                && r.value_str(keys::ACQUISITION) == group.2.as_deref()
        })
        .filter_map(|r| r.value_str(keys::RUN)?.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}

/// `id` from `SeriesNumber`.
#[derive(Debug, Clone, Copy)]
pub struct SeriesIdRule;

impl Rule for SeriesIdRule {
    fn name(&self) -> &str {
        "series-id"
    }

    fn apply(&self, series: &[SeriesMeta], _ctx: &RuleContext<'_>) -> Vec<Patch> {
        series
            .iter()
            .map(|s| match s.get_i64(attrs::SERIES_NUMBER) {
                Some(number) => single(keys::ID, number),
                None => Patch::new(),
            })
            .collect()
    }
}

/// `session` from the override.
#[derive(Debug, Clone, Copy)]
pub struct SessionRule;

impl Rule for SessionRule {
    fn name(&self) -> &str {
        "session"
    }

    fn apply(&self, series: &[SeriesMeta], ctx: &RuleContext<'_>) -> Vec<Patch> {
        let patch = ctx
            .session
            .map(|session| single(keys::SESSION, session))
            .unwrap_or_default();
        vec![patch; series.len()]
    }
}
