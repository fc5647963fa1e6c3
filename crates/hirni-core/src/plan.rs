//! Turning a specification into conversion actions.
//!
//! The planner scans records in store order. Every DICOM series resolving
//! to the batch converter is collapsed into one shared batch action, planned
//! when the first such record is reached. Any other explicit converter
//! becomes one action for its record. Records marked `ignore`, or without a
//! converter, are skipped. A record that cannot be planned fails on its own
//! and never blocks its siblings.
//!
//! Planning only describes invocations; executing them is the job of a
//! [`ConversionSink`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ExternalActionError, PlanningError};
use crate::paths::join_location;
use crate::record::{Converter, SpecRecord};
use crate::schema::{DEFAULT_BATCH_CONVERTER, keys};
use crate::store::SpecStore;

/// Environment variable naming the specification for the batch heuristic.
pub const STUDY_SPEC_ENV: &str = "HIRNI_STUDY_SPEC";

/// Inputs to planning. Paths are relative to the dataset root.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Use `anon_subject` instead of `subject` as the BIDS subject.
    pub anonymize: bool,
    pub batch_converter: String,
    pub heuristic: String,
    /// Container the batch converter runs in.
    pub container: Option<String>,
    pub spec_path: String,
    pub target_dir: String,
    /// Scratch output of the batch converter.
    pub scratch_dir: String,
}

impl PlanOptions {
    pub fn new(spec_path: impl Into<String>) -> Self {
        Self {
            anonymize: false,
            batch_converter: DEFAULT_BATCH_CONVERTER.to_string(),
            heuristic: "hirni".to_string(),
            container: Some("conversion".to_string()),
            spec_path: spec_path.into(),
            target_dir: ".".to_string(),
            scratch_dir: ".hirni/tmp".to_string(),
        }
    }

    /// Directory holding the specification file.
    pub fn spec_dir(&self) -> &str {
        self.spec_path.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    /// Acquisition name: the specification directory's base name.
    pub fn acquisition(&self) -> &str {
        match self.spec_dir() {
            "" => ".",
            dir => dir.rsplit('/').next().unwrap_or(dir),
        }
    }

    fn subject_key(&self) -> &'static str {
        if self.anonymize {
            keys::ANON_SUBJECT
        } else {
            keys::SUBJECT
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum Command {
    /// Program and arguments, run without a shell.
    Argv(Vec<String>),
    /// Rendered command line, run through a shell.
    Shell(String),
}

impl Command {
    pub fn display(&self) -> String {
        match self {
            Self::Argv(args) => args
                .iter()
                .map(|a| if a.is_empty() || a.contains(' ') { format!("'{a}'") } else { a.clone() })
                .collect::<Vec<_>>()
                .join(" "),
            Self::Shell(line) => line.clone(),
        }
    }
}

/// Everything a sink needs to run one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub command: Command,
    pub container: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub message: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMember {
    pub record: usize,
    pub uid: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ActionKind {
    /// The shared DICOM batch conversion.
    Batch {
        subject: String,
        members: Vec<BatchMember>,
    },
    /// Conversion of a single record.
    Single { record: usize, location: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub invocation: Invocation,
}

impl ConversionAction {
    pub fn records(&self) -> Vec<usize> {
        match &self.kind {
            ActionKind::Batch { members, .. } => members.iter().map(|m| m.record).collect(),
            ActionKind::Single { record, .. } => vec![*record],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Converter set to `ignore`.
    Ignored,
    NoConverter,
    /// Left out by the caller, e.g. for failing validation.
    Excluded,
}

/// What planning did with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Covered by the action at this index of [`ConversionPlan::actions`].
    Planned(usize),
    Skipped(SkipReason),
    Failed(PlanningError),
}

#[derive(Debug, Clone, Default)]
pub struct ConversionPlan {
    pub actions: Vec<ConversionAction>,
    /// One entry per record, in store order.
    pub dispositions: Vec<Disposition>,
}

impl ConversionPlan {
    pub fn failures(&self) -> impl Iterator<Item = (usize, &PlanningError)> {
        self.dispositions.iter().enumerate().filter_map(|(i, d)| match d {
            Disposition::Failed(e) => Some((i, e)),
            _ => None,
        })
    }

    pub fn batch_action(&self) -> Option<&ConversionAction> {
        self.actions
            .iter()
            .find(|a| matches!(a.kind, ActionKind::Batch { .. }))
    }
}

/// Single-pass planner over one specification.
#[derive(Debug)]
pub struct ConversionPlanner<'a> {
    options: &'a PlanOptions,
    batch_planned: bool,
}

impl<'a> ConversionPlanner<'a> {
    pub fn new(options: &'a PlanOptions) -> Self {
        Self {
            options,
            batch_planned: false,
        }
    }

    /// Plan every record not in `exclude` (positions in store order).
    pub fn plan(mut self, store: &SpecStore, exclude: &BTreeSet<usize>) -> ConversionPlan {
        let records = store.records();
        let batch = self.resolve_batch(records, exclude);
        let mut plan = ConversionPlan::default();
        let mut batch_index = 0;

        for (idx, record) in records.iter().enumerate() {
            let disposition = if exclude.contains(&idx) {
                Disposition::Skipped(SkipReason::Excluded)
            } else {
                match record.converter(&self.options.batch_converter) {
                    None => Disposition::Skipped(SkipReason::NoConverter),
                    Some(Converter::Ignore) => Disposition::Skipped(SkipReason::Ignored),
                    Some(Converter::Batch) => match batch.failures.get(&idx) {
                        Some(err) => Disposition::Failed(err.clone()),
                        None => {
                            if !self.batch_planned {
                                batch_index = plan.actions.len();
                                plan.actions.push(self.batch_action(&batch));
                                self.batch_planned = true;
                            }
                            Disposition::Planned(batch_index)
                        }
                    },
                    Some(Converter::Command(template)) => {
                        match self.single_action(idx, record, template) {
                            Ok(action) => {
                                plan.actions.push(action);
                                Disposition::Planned(plan.actions.len() - 1)
                            }
                            Err(e) => Disposition::Failed(e),
                        }
                    }
                }
            };
            if let Disposition::Failed(err) = &disposition {
                debug!(record = idx, %err, "record not planned");
            }
            plan.dispositions.push(disposition);
        }
        info!(
            actions = plan.actions.len(),
            failed = plan.failures().count(),
            "conversion planned"
        );
        plan
    }

    /// Decide batch membership up front so the single batch action covers
    /// every eligible series, wherever it sits in the store.
    fn resolve_batch(&self, records: &[SpecRecord], exclude: &BTreeSet<usize>) -> BatchResolution {
        let subject_key = self.options.subject_key();
        let mut members = Vec::new();
        let mut subjects = BTreeSet::new();
        let mut failures = BTreeMap::new();

        for (idx, record) in records.iter().enumerate() {
            if exclude.contains(&idx)
                || record.converter(&self.options.batch_converter) != Some(Converter::Batch)
            {
                continue;
            }
            let (true, Some(uid)) = (record.entity_type.is_dicom_series(), &record.uid) else {
                failures.insert(
                    idx,
                    PlanningError::NotBatchable(self.options.batch_converter.clone()),
                );
                continue;
            };
            let Some(subject) = record.field(subject_key).and_then(|f| f.render()) else {
                failures.insert(idx, PlanningError::MissingValue(subject_key.to_string()));
                continue;
            };
            let Some(location) = join_location(self.options.spec_dir(), &record.location) else {
                failures.insert(idx, PlanningError::EscapingLocation(record.location.clone()));
                continue;
            };
            subjects.insert(subject.clone());
            members.push((
                BatchMember {
                    record: idx,
                    uid: uid.clone(),
                    location,
                },
                subject,
            ));
        }

        if subjects.len() > 1 {
            let listed = subjects.into_iter().collect::<Vec<_>>().join(", ");
            for (member, _) in members.drain(..) {
                failures.insert(member.record, PlanningError::AmbiguousSubject(listed.clone()));
            }
        }
        let subject = members.first().map(|(_, s)| s.clone()).unwrap_or_default();
        BatchResolution {
            subject,
            members: members.into_iter().map(|(m, _)| m).collect(),
            failures,
        }
    }

    fn batch_action(&self, batch: &BatchResolution) -> ConversionAction {
        let opts = self.options;
        let mut files: Vec<String> = Vec::new();
        for member in &batch.members {
            if !files.contains(&member.location) {
                files.push(member.location.clone());
            }
        }

        let mut argv: Vec<String> = [
            opts.batch_converter.as_str(),
            "-f",
            opts.heuristic.as_str(),
            "-s",
            batch.subject.as_str(),
            "-c",
            "dcm2niix",
            "-o",
            opts.scratch_dir.as_str(),
            "-b",
            "-a",
            opts.target_dir.as_str(),
            "-l",
            "",
            "--minmeta",
            "--files",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        argv.extend(files.iter().cloned());

        let mut inputs = files;
        inputs.push(opts.spec_path.clone());
        debug!(
            series = batch.members.len(),
            subject = %batch.subject,
            "planned batch conversion"
        );
        ConversionAction {
            kind: ActionKind::Batch {
                subject: batch.subject.clone(),
                members: batch.members.clone(),
            },
            invocation: Invocation {
                command: Command::Argv(argv),
                container: opts.container.clone().filter(|c| !c.is_empty()),
                inputs,
                outputs: vec![opts.target_dir.clone()],
                message: format!("DICOM conversion of acquisition {}.", opts.acquisition()),
                env: self.env(),
            },
        }
    }

    fn single_action(
        &self,
        idx: usize,
        record: &SpecRecord,
        template: &str,
    ) -> Result<ConversionAction, PlanningError> {
        let opts = self.options;
        let location = join_location(opts.spec_dir(), &record.location)
            .ok_or_else(|| PlanningError::EscapingLocation(record.location.clone()))?;
        let vars = self.variables(record, &location);
        let line = render_template(template, &vars)?;
        let container = record
            .value_str(keys::CONVERTER_CONTAINER)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(ConversionAction {
            kind: ActionKind::Single {
                record: idx,
                location: location.clone(),
            },
            invocation: Invocation {
                command: Command::Shell(line),
                container,
                inputs: vec![location.clone(), opts.spec_path.clone()],
                outputs: vec![opts.target_dir.clone()],
                message: format!(
                    "Conversion of {location} in acquisition {}.",
                    opts.acquisition()
                ),
                env: self.env(),
            },
        })
    }

    /// Substitution variables: every non-empty field, with `subject` and
    /// `anon_subject` collapsed into `bids_subject`, plus paths.
    fn variables(&self, record: &SpecRecord, location: &str) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = record
            .fields()
            .filter(|(k, _)| *k != keys::SUBJECT && *k != keys::ANON_SUBJECT)
            .filter_map(|(k, f)| Some((k.to_string(), f.render()?)))
            .collect();
        if let Some(subject) = record.field(self.options.subject_key()).and_then(|f| f.render()) {
            vars.insert(keys::BIDS_SUBJECT.into(), subject);
        }
        vars.insert(keys::LOCATION.into(), location.to_string());
        vars.insert("spec_path".into(), self.options.spec_path.clone());
        vars.insert("target_dir".into(), self.options.target_dir.clone());
        vars
    }

    fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(STUDY_SPEC_ENV.to_string(), self.options.spec_path.clone())])
    }
}

struct BatchResolution {
    subject: String,
    members: Vec<BatchMember>,
    failures: BTreeMap<usize, PlanningError>,
}

/// Substitute `{name}` placeholders. `{{` and `}}` stand for literal braces.
pub fn render_template(
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, PlanningError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(PlanningError::Template(template.to_string())),
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(PlanningError::Template(template.to_string()));
                }
                let value = vars
                    .get(name)
                    .ok_or_else(|| PlanningError::MissingValue(name.to_string()))?;
                out.push_str(value);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Runs planned invocations.
pub trait ConversionSink {
    fn execute(&mut self, invocation: &Invocation) -> Result<(), ExternalActionError>;
}

/// Execute every action once, in order. Failures are returned, not retried.
pub fn execute_plan(
    plan: &ConversionPlan,
    sink: &mut dyn ConversionSink,
) -> Vec<Result<(), ExternalActionError>> {
    plan.actions
        .iter()
        .map(|action| {
            let result = sink.execute(&action.invocation);
            if let Err(err) = &result {
                tracing::warn!(%err, "conversion action failed");
            }
            result
        })
        .collect()
}
