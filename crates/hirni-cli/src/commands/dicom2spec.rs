use std::convert::Infallible;
use std::path::Path;

use anyhow::{Result, bail};
use hirni_core::paths::relative_location;
use hirni_core::{
    ChangeKind, DicomDerivation, MergeOutcome, MetadataSource, RuleContext, dicom_candidates,
};
use hirni_store::{MetadataDump, SpecFile};
use tracing::{debug, info, warn};

use super::{Workspace, load_properties, parent_location};
use crate::cli::SubjectOverrides;
use crate::results::{CommandResult, display_path};

const ACTION: &str = "dicom2spec";

pub fn dicom2spec_command(
    ws: &Workspace,
    metadata: &Path,
    spec: &Path,
    path: &str,
    overrides: &SubjectOverrides,
    properties: Option<&str>,
) -> Result<Vec<CommandResult>> {
    let properties = load_properties(ws, properties)?;
    let dump = MetadataDump::open(&ws.resolve(metadata))?;
    let spec_file = SpecFile::new(ws.resolve(spec));
    let Some(spec_rel) = ws.relative(spec_file.path()) else {
        bail!("specification {} outside the dataset", spec.display());
    };
    let spec_dir = parent_location(&spec_rel).to_string();
    let Some(path) = ws.relative(Path::new(path)) else {
        bail!("path {path} outside the dataset");
    };

    let store = ws.load_store(&spec_file)?;
    let engine = ws.rule_engine()?;
    let entries = dump
        .dataset_metadata(&path)
        .unwrap_or_else(|never: Infallible| match never {});

    let mut results = Vec::new();
    if entries.is_empty() {
        results.push(
            CommandResult::impossible(ACTION, &path).with_message("no metadata found"),
        );
        return Ok(results);
    }

    let mut candidates = Vec::new();
    {
        let ctx = RuleContext {
            subject: overrides.subject.as_deref(),
            anon_subject: overrides.anon_subject.as_deref(),
            session: overrides.session.as_deref(),
            existing: Some(&store),
            batch_converter: &ws.config.conversion.batch_converter,
        };
        for meta in &entries {
            let Some(location) = relative_location(&meta.path, &spec_dir) else {
                results.push(
                    CommandResult::impossible(ACTION, &meta.path)
                        .with_message("dataset outside specification's tree"),
                );
                continue;
            };
            match dicom_candidates(meta, &location, &engine, &ctx, &properties) {
                DicomDerivation::NoDicom => results.push(
                    CommandResult::not_needed(ACTION, &meta.path)
                        .with_message("no DICOM metadata"),
                ),
                DicomDerivation::NoSeries => results.push(
                    CommandResult::impossible(ACTION, &meta.path)
                        .with_message("no image series detected"),
                ),
                DicomDerivation::Candidates {
                    records,
                    missing_uid,
                } => {
                    if missing_uid > 0 {
                        warn!(path = %meta.path, missing_uid, "series without UID skipped");
                    }
                    candidates.extend(records);
                }
            }
        }
    }
    if candidates.is_empty() {
        return Ok(results);
    }

    let outcome = store.merge(candidates);
    let changed = outcome.changed();
    let MergeOutcome {
        store,
        changes,
        conflicts,
        collapsed,
    } = outcome;
    for identity in collapsed {
        debug!(%identity, "duplicate snippets collapsed");
    }
    for conflict in conflicts {
        results.push(CommandResult::error(ACTION, &conflict.identity).with_message(conflict.to_string()));
    }
    for change in changes {
        let target = format!("{} ({})", change.location, change.identity);
        results.push(match change.kind {
            ChangeKind::Created => CommandResult::ok(ACTION, target).with_message("added"),
            ChangeKind::Updated => CommandResult::ok(ACTION, target).with_message("updated"),
            ChangeKind::Unchanged => CommandResult::not_needed(ACTION, target),
        });
    }

    if changed {
        spec_file.persist(&store)?;
        info!(path = %display_path(spec_file.path()), records = store.len(), "specification updated");
    }
    Ok(results)
}
