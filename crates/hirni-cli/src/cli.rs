use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Study specifications for neuroimaging raw data, and their conversion to BIDS
#[derive(Parser, Debug)]
#[command(name = "hirni", version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RUST_LOG=debug    Enable debug logging")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Dataset root; relative paths are resolved against it
    #[arg(short, long, env = "HIRNI_DATASET", global = true)]
    pub dataset: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Derive specification snippets for DICOM series from dataset metadata
    Dicom2spec {
        /// Metadata dump: a JSON array, a JSON object, or JSON lines
        metadata: PathBuf,

        /// Specification file to create or update
        #[arg(short, long)]
        spec: PathBuf,

        /// Only use metadata of datasets at or below this path
        #[arg(short, long, default_value = ".")]
        path: String,

        #[command(flatten)]
        overrides: SubjectOverrides,

        /// Field values to set (approved), as a JSON object or a file holding one
        #[arg(long)]
        properties: Option<String>,
    },
    /// Add specification snippets for arbitrary files, directories or datasets
    Spec4anything {
        /// Paths to describe
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Specification file (default: <acquisition>/studyspec.json)
        #[arg(short, long)]
        spec: Option<PathBuf>,

        /// Field values to set (approved), as a JSON object or a file holding one
        #[arg(long)]
        properties: Option<String>,

        /// Metadata dump to take dataset provenance from
        #[arg(long, conflicts_with_all = ["dataset_id", "refcommit"])]
        metadata: Option<PathBuf>,

        /// Dataset ID of the described data
        #[arg(long, requires = "refcommit")]
        dataset_id: Option<String>,

        /// Commit of the dataset the description refers to
        #[arg(long, requires = "dataset_id")]
        refcommit: Option<String>,
    },
    /// Validate specification files
    Validate {
        #[arg(required = true)]
        specs: Vec<PathBuf>,
    },
    /// Convert the data a specification describes into BIDS
    Spec2bids {
        #[arg(required = true)]
        specs: Vec<PathBuf>,

        /// Use anonymized subject IDs
        #[arg(long)]
        anonymize: bool,

        /// Directory the BIDS dataset is written to (default: dataset root)
        #[arg(long)]
        target_dir: Option<PathBuf>,

        /// Print the conversion commands without running them
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Convert the valid records of an invalid specification
        #[arg(long)]
        skip_invalid: bool,
    },
    /// Print the records of a specification as cards
    Show {
        spec: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct SubjectOverrides {
    /// Subject identifier
    #[arg(long)]
    pub subject: Option<String>,

    /// Anonymized subject identifier
    #[arg(long)]
    pub anon_subject: Option<String>,

    /// Session identifier
    #[arg(long)]
    pub session: Option<String>,
}
