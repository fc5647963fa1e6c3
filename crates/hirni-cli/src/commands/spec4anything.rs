use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use anyhow::Result;
use hirni_core::paths::relative_location;
use hirni_core::{
    ChangeKind, DatasetMetadata, EntityType, MetadataSource, SpecRecord, generic_candidate,
};
use hirni_store::{MetadataDump, SpecFile};
use tracing::debug;

use super::{Workspace, load_properties, parent_location};
use crate::results::CommandResult;

const ACTION: &str = "spec4anything";

#[derive(Debug)]
pub struct Spec4AnythingArgs<'a> {
    pub paths: &'a [PathBuf],
    pub spec: Option<&'a Path>,
    pub properties: Option<&'a str>,
    pub metadata: Option<&'a Path>,
    pub dataset_id: Option<&'a str>,
    pub refcommit: Option<&'a str>,
}

/// Where a described path's provenance comes from.
enum Provenance {
    Dump(Vec<DatasetMetadata>),
    Explicit { dataset_id: String, refcommit: String },
    Missing,
}

impl Provenance {
    /// Dataset ID and commit of the innermost dataset containing `path`.
    fn lookup(&self, path: &str) -> Option<(String, String)> {
        match self {
            Self::Dump(entries) => entries
                .iter()
                .filter(|m| relative_location(path, &m.path).is_some())
                .max_by_key(|m| m.path.len())
                .map(|m| (m.dsid.clone(), m.refcommit.clone())),
            Self::Explicit {
                dataset_id,
                refcommit,
            } => Some((dataset_id.clone(), refcommit.clone())),
            Self::Missing => None,
        }
    }
}

pub fn spec4anything_command(ws: &Workspace, args: &Spec4AnythingArgs<'_>) -> Result<Vec<CommandResult>> {
    let properties = load_properties(ws, args.properties)?;
    let provenance = match (args.metadata, args.dataset_id, args.refcommit) {
        (Some(metadata), _, _) => Provenance::Dump(
            MetadataDump::open(&ws.resolve(metadata))?
                .dataset_metadata(".")
                .unwrap_or_else(|never: Infallible| match never {}),
        ),
        (None, Some(dataset_id), Some(refcommit)) => Provenance::Explicit {
            dataset_id: dataset_id.to_string(),
            refcommit: refcommit.to_string(),
        },
        _ => Provenance::Missing,
    };

    let mut results = Vec::new();
    // Candidates grouped by the specification file they go into.
    let mut by_spec: BTreeMap<PathBuf, Vec<SpecRecord>> = BTreeMap::new();
    for path in args.paths {
        let shown = path.display().to_string();
        let Some(rel) = ws.relative(path) else {
            results.push(CommandResult::error(ACTION, shown).with_message("path outside the dataset"));
            continue;
        };
        let spec_path = match args.spec {
            Some(spec) => ws.resolve(spec),
            None => match acquisition_of(ws, &rel) {
                Some(acq) => ws.root.join(acq).join(&ws.config.studyspec_filename),
                None => {
                    results.push(
                        CommandResult::error(ACTION, rel.clone())
                            .with_message("path not inside an acquisition"),
                    );
                    continue;
                }
            },
        };
        let Some(spec_rel) = ws.relative(&spec_path) else {
            results.push(
                CommandResult::error(ACTION, rel).with_message("specification outside the dataset"),
            );
            continue;
        };
        let Some(location) = relative_location(&rel, parent_location(&spec_rel)) else {
            results.push(
                CommandResult::error(ACTION, rel)
                    .with_message("'location' outside specification's tree"),
            );
            continue;
        };
        let Some((dataset_id, refcommit)) = provenance.lookup(&rel) else {
            results.push(
                CommandResult::error(ACTION, rel).with_message("dataset ID and commit unknown"),
            );
            continue;
        };

        let entity_type = entity_type_of(&ws.resolve(path));
        debug!(path = %rel, %entity_type, %location, "describing entity");
        by_spec.entry(spec_path).or_default().push(generic_candidate(
            entity_type,
            &location,
            &dataset_id,
            &refcommit,
            &properties,
        ));
    }

    for (spec_path, candidates) in by_spec {
        let spec_file = SpecFile::new(spec_path);
        let store = ws.load_store(&spec_file)?;
        let seeded: Vec<SpecRecord> = candidates
            .into_iter()
            .map(|c| store.seed_uniform(c))
            .collect();
        let outcome = store.merge(seeded);

        for conflict in &outcome.conflicts {
            results.push(
                CommandResult::error(ACTION, conflict.identity.clone())
                    .with_message(conflict.to_string()),
            );
        }
        let changed = outcome.changed();
        for change in outcome.changes {
            results.push(match change.kind {
                ChangeKind::Unchanged => CommandResult::not_needed(ACTION, change.location),
                ChangeKind::Created | ChangeKind::Updated => CommandResult::ok(ACTION, change.location),
            });
        }
        if changed {
            spec_file.persist(&outcome.store)?;
        }
    }
    Ok(results)
}

/// First component of a dataset-relative path, if that is a directory
/// and the path lies below it.
fn acquisition_of<'p>(ws: &Workspace, rel: &'p str) -> Option<&'p str> {
    let (acq, _) = rel.split_once('/')?;
    ws.root.join(acq).is_dir().then_some(acq)
}

fn entity_type_of(path: &Path) -> EntityType {
    if !path.is_dir() {
        EntityType::GenericFile
    } else if path.join(".git").exists() || path.join(".datalad").exists() {
        EntityType::GenericDataset
    } else {
        EntityType::GenericDirectory
    }
}
