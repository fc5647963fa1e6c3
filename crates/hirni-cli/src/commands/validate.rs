use std::path::PathBuf;

use anyhow::Result;
use hirni_core::{Severity, ValidatorRegistry};
use hirni_store::SpecFile;
use tracing::info;

use super::Workspace;
use crate::results::{CommandResult, display_path};

const ACTION: &str = "validate";

pub fn validate_command(ws: &Workspace, specs: &[PathBuf]) -> Result<Vec<CommandResult>> {
    let registry = ValidatorRegistry::default();
    let mut results = Vec::new();

    for spec in specs {
        let spec_file = SpecFile::new(ws.resolve(spec));
        let shown = display_path(spec);
        let snippets = match spec_file.read_raw() {
            Ok(snippets) => snippets,
            Err(err) => {
                results.push(CommandResult::error(ACTION, shown).with_message(err.to_string()));
                continue;
            }
        };
        let (lines, raw): (Vec<usize>, Vec<_>) = snippets.into_iter().unzip();
        let report = registry.validate(&raw);

        for finding in &report.findings {
            let at = match finding.record {
                Some(idx) => format!("{shown}:{}", lines[idx]),
                None => shown.clone(),
            };
            let result = match finding.severity {
                Severity::Error => CommandResult::error(ACTION, at),
                Severity::Warning | Severity::Ok => CommandResult::ok(ACTION, at),
            };
            let message = match (&finding.identity, finding.severity) {
                (Some(identity), Severity::Warning) => {
                    format!("warning: {} ({identity})", finding.message)
                }
                (None, Severity::Warning) => format!("warning: {}", finding.message),
                (Some(identity), _) => format!("{} ({identity})", finding.message),
                (None, _) => finding.message.clone(),
            };
            results.push(result.with_message(message));
        }
        for entity_type in &report.not_enforced {
            results.push(
                CommandResult::not_needed(ACTION, shown.clone()).with_message(format!(
                    "consistency across {entity_type} snippets not yet enforced"
                )),
            );
        }

        info!(path = %shown, records = report.records, valid = report.is_valid(), "validated");
        results.push(if report.is_valid() {
            CommandResult::ok(ACTION, shown).with_message("specification valid")
        } else {
            let errors = report.errors().count();
            CommandResult::error(ACTION, shown)
                .with_message(format!("specification invalid: {errors} error(s)"))
        });
    }
    Ok(results)
}
