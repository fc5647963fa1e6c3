use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hirni_core::plan::{ActionKind, SkipReason};
use hirni_core::{
    ConversionPlanner, ConversionSink, Disposition, PlanOptions, SpecRecord, SpecStore,
    ValidatorRegistry, execute_plan,
};
use hirni_store::SpecFile;
use tempfile::TempDir;
use tracing::{info, warn};

use super::Workspace;
use crate::exec::{DryRunSink, ProcessSink, describe};
use crate::results::{CommandResult, display_path};

const ACTION: &str = "spec2bids";

#[derive(Debug)]
pub struct Spec2BidsArgs<'a> {
    pub specs: &'a [PathBuf],
    pub anonymize: bool,
    pub target_dir: Option<&'a Path>,
    pub dry_run: bool,
    pub skip_invalid: bool,
}

pub fn spec2bids_command(ws: &Workspace, args: &Spec2BidsArgs<'_>) -> Result<Vec<CommandResult>> {
    let mut results = Vec::new();
    for spec in args.specs {
        convert_spec(ws, args, spec, &mut results)?;
    }
    Ok(results)
}

fn convert_spec(
    ws: &Workspace,
    args: &Spec2BidsArgs<'_>,
    spec: &Path,
    results: &mut Vec<CommandResult>,
) -> Result<()> {
    let first = results.len();
    let spec_file = SpecFile::new(ws.resolve(spec));
    let shown = display_path(spec);
    let Some(spec_rel) = ws.relative(spec_file.path()) else {
        results.push(CommandResult::error(ACTION, shown).with_message("specification outside the dataset"));
        return Ok(());
    };
    let snippets = match spec_file.read_raw() {
        Ok(snippets) => snippets,
        Err(err) => {
            results.push(CommandResult::error(ACTION, shown).with_message(err.to_string()));
            return Ok(());
        }
    };

    let raw: Vec<_> = snippets.into_iter().map(|(_, snippet)| snippet).collect();
    let report = ValidatorRegistry::default().validate(&raw);
    let invalid = report.invalid_records();
    if !invalid.is_empty() && !args.skip_invalid {
        for finding in report.errors() {
            results.push(CommandResult::error(ACTION, shown.clone()).with_message(finding.message.clone()));
        }
        results.push(
            CommandResult::impossible(ACTION, shown)
                .with_message("specification invalid; use --skip-invalid to convert the valid records"),
        );
        return Ok(());
    }

    // Invalid snippets stay in the store as excluded records where they
    // still parse; the rest cannot be represented at all.
    let mut records = Vec::with_capacity(raw.len());
    let mut exclude = BTreeSet::new();
    for (idx, snippet) in raw.into_iter().enumerate() {
        match SpecRecord::try_from(snippet) {
            Ok(record) => {
                if invalid.contains(&idx) {
                    exclude.insert(records.len());
                }
                records.push(record);
            }
            Err(err) => results.push(
                CommandResult::impossible(ACTION, format!("{shown}#{}", idx + 1))
                    .with_message(format!("invalid snippet skipped: {err}")),
            ),
        }
    }
    let store = SpecStore::from_records(records);

    let conversion = &ws.config.conversion;
    let target_dir = match args.target_dir.or(conversion.target_dir.as_deref()) {
        Some(dir) => ws
            .relative(dir)
            .with_context(|| format!("target directory {} outside the dataset", dir.display()))?,
        None => ".".to_string(),
    };
    let scratch = scratch_dir(ws)?;
    let scratch_rel = ws
        .relative(scratch.path())
        .unwrap_or_else(|| scratch.path().display().to_string());

    let mut options = PlanOptions::new(spec_rel.as_str());
    options.anonymize = args.anonymize || conversion.anonymize;
    options.batch_converter = conversion.batch_converter.clone();
    options.heuristic = conversion.heuristic.clone();
    options.container = conversion.container.clone().filter(|c| !c.is_empty());
    options.target_dir = target_dir;
    options.scratch_dir = scratch_rel;

    let plan = ConversionPlanner::new(&options).plan(&store, &exclude);

    let mut sink: Box<dyn ConversionSink> = if args.dry_run {
        Box::new(DryRunSink::default())
    } else {
        Box::new(ProcessSink::new(&ws.root))
    };
    let outcomes = execute_plan(&plan, &mut *sink);

    for (idx, disposition) in plan.dispositions.iter().enumerate() {
        let Some(record) = store.records().get(idx) else {
            continue;
        };
        let at = record.location.clone();
        match disposition {
            Disposition::Planned(_) => {}
            Disposition::Skipped(SkipReason::Excluded) => results.push(
                CommandResult::impossible(ACTION, at).with_message("invalid record skipped"),
            ),
            Disposition::Skipped(SkipReason::Ignored) => results.push(
                CommandResult::not_needed(ACTION, at).with_message("converter set to ignore"),
            ),
            Disposition::Skipped(SkipReason::NoConverter) => results.push(
                CommandResult::not_needed(ACTION, at).with_message("no converter specified"),
            ),
            Disposition::Failed(err) => {
                results.push(CommandResult::error(ACTION, at).with_message(err.to_string()))
            }
        }
    }

    for (action, outcome) in plan.actions.iter().zip(outcomes) {
        let at = match &action.kind {
            ActionKind::Batch { subject, members } => {
                format!("{spec_rel} (sub-{subject}, {} series)", members.len())
            }
            ActionKind::Single { location, .. } => location.clone(),
        };
        results.push(match outcome {
            Ok(()) if args.dry_run => {
                CommandResult::ok(ACTION, at).with_message(describe(&action.invocation))
            }
            Ok(()) => CommandResult::ok(ACTION, at).with_message(action.invocation.message.clone()),
            Err(err) => CommandResult::error(ACTION, at).with_message(err.to_string()),
        });
    }

    let failed = results[first..].iter().filter(|r| r.status.is_failure()).count();
    if failed > 0 {
        warn!(path = %shown, failed, "conversion incomplete");
    }
    drop(scratch);
    info!(path = %shown, actions = plan.actions.len(), dry_run = args.dry_run, "conversion done");
    Ok(())
}

/// Scratch output of the batch converter, below `.git` when the dataset
/// has one. Removed when dropped.
fn scratch_dir(ws: &Workspace) -> Result<TempDir> {
    let git = ws.root.join(".git");
    let parent = if git.is_dir() { git } else { ws.root.clone() };
    tempfile::Builder::new()
        .prefix("hirni-tmp-")
        .tempdir_in(&parent)
        .with_context(|| format!("cannot create scratch directory in {}", parent.display()))
}
