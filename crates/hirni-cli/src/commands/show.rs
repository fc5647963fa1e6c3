use std::path::Path;

use anyhow::Result;
use hirni_store::SpecFile;

use super::Workspace;
use crate::display::print_record_card;
use crate::results::{CommandResult, display_path};

const ACTION: &str = "show";

/// Print every record as a card, or as its JSON snippet with `json`.
pub fn show_command(ws: &Workspace, spec: &Path, json: bool) -> Result<Vec<CommandResult>> {
    let spec_file = SpecFile::new(ws.resolve(spec));
    let report = spec_file.load()?;
    let shown = display_path(spec);

    for record in &report.records {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            print_record_card(record)?;
        }
    }
    let mut results: Vec<CommandResult> = report
        .rejected
        .iter()
        .map(|r| {
            CommandResult::error(ACTION, format!("{shown}:{}", r.line)).with_message(r.error.to_string())
        })
        .collect();
    if results.is_empty() {
        results.push(
            CommandResult::ok(ACTION, shown)
                .with_message(format!("{} record(s)", report.records.len())),
        );
    }
    Ok(results)
}
