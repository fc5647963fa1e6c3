mod cli;
mod commands;
mod display;
mod exec;
mod results;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::{Spec2BidsArgs, Spec4AnythingArgs, Workspace};
use crate::results::Reporter;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = match cli.global.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
    tracing::debug!("hirni v{}", env!("CARGO_PKG_VERSION"));

    let ws = Workspace::open(cli.global.dataset.as_deref())?;
    let results = match &cli.command {
        Commands::Dicom2spec {
            metadata,
            spec,
            path,
            overrides,
            properties,
        } => commands::dicom2spec_command(
            &ws,
            metadata,
            spec,
            path,
            overrides,
            properties.as_deref(),
        )?,
        Commands::Spec4anything {
            paths,
            spec,
            properties,
            metadata,
            dataset_id,
            refcommit,
        } => commands::spec4anything_command(
            &ws,
            &Spec4AnythingArgs {
                paths,
                spec: spec.as_deref(),
                properties: properties.as_deref(),
                metadata: metadata.as_deref(),
                dataset_id: dataset_id.as_deref(),
                refcommit: refcommit.as_deref(),
            },
        )?,
        Commands::Validate { specs } => commands::validate_command(&ws, specs)?,
        Commands::Spec2bids {
            specs,
            anonymize,
            target_dir,
            dry_run,
            skip_invalid,
        } => commands::spec2bids_command(
            &ws,
            &Spec2BidsArgs {
                specs,
                anonymize: *anonymize,
                target_dir: target_dir.as_deref(),
                dry_run: *dry_run,
                skip_invalid: *skip_invalid,
            },
        )?,
        Commands::Show { spec } => commands::show_command(&ws, spec, cli.global.json)?,
    };

    let mut reporter = Reporter::new(cli.global.json);
    reporter.extend(results);
    if reporter.failures() > 0 {
        tracing::info!(failures = reporter.failures(), total = reporter.total(), "finished with failures");
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
