pub mod config;
pub mod derive;
pub mod error;
pub mod metadata;
pub mod paths;
pub mod plan;
pub mod record;
pub mod rules;
pub mod schema;
pub mod sort_key;
pub mod store;
pub mod user_rules;
pub mod validate;

pub use config::{HirniConfig, parse_properties};
pub use derive::{DicomDerivation, Properties, dicom_candidates, generic_candidate};
pub use error::{
    ConfigError, ExternalActionError, IdentityConflictError, PlanningError, RuleError, SchemaError,
};
pub use metadata::{DatasetMetadata, MetadataSource, SeriesMeta};
pub use plan::{
    ConversionPlan, ConversionPlanner, ConversionSink, Disposition, Invocation, PlanOptions,
    execute_plan,
};
pub use record::{Converter, Field, RawSnippet, SpecRecord};
pub use rules::{Rule, RuleContext, RuleEngine};
pub use schema::EntityType;
pub use store::{ChangeKind, GenericIdentity, IdentityScheme, MergeOutcome, SpecStore};
pub use user_rules::ConfiguredRule;
pub use validate::{Finding, Severity, ValidationReport, ValidatorRegistry};
