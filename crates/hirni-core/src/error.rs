use thiserror::Error;

/// A specification snippet that does not have the shape of a [`SpecRecord`](crate::SpecRecord).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("empty specification snippet")]
    Empty,

    #[error("snippet missing key '{0}'")]
    MissingKey(String),

    #[error("empty entry for '{0}'")]
    EmptyValue(String),

    #[error("unknown specification type '{0}'")]
    UnknownType(String),

    #[error("'{key}' must be {expected}")]
    Shape { key: String, expected: &'static str },
}

/// Two candidates claim the same identity but disagree on immutable provenance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting candidates for '{identity}': {key} is '{existing}' vs '{incoming}'")]
pub struct IdentityConflictError {
    pub identity: String,
    pub key: &'static str,
    pub existing: String,
    pub incoming: String,
}

/// A record that cannot be turned into a conversion action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("no value for '{0}' to substitute")]
    MissingValue(String),

    #[error("subject ambiguous across batch series: {0}")]
    AmbiguousSubject(String),

    #[error("batch converter '{0}' only applies to DICOM series")]
    NotBatchable(String),

    #[error("unterminated placeholder in command template '{0}'")]
    Template(String),

    #[error("'location' {0} escapes the specification's directory")]
    EscapingLocation(String),
}

/// A derivation rule that cannot be built.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{name}': invalid pattern: {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{name}': 'pattern' given without 'attribute'")]
    PatternWithoutAttribute { name: String },

    #[error("rule file parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Invalid configuration or override input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("properties must be a JSON object, got {0}")]
    Properties(String),

    #[error("properties parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The invocation sink reported a failed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} failed: {message}")]
pub struct ExternalActionError {
    pub action: String,
    pub message: String,
}
