//! Storage layer: line-oriented specification files and metadata dumps.

mod error;
pub mod metadata;
pub mod spec_file;

pub use error::StoreError;
pub use metadata::MetadataDump;
pub use spec_file::{LoadReport, RejectedSnippet, SpecFile};
