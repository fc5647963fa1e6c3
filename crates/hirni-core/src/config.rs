//! Dataset-level configuration (`.hirni/config.toml`) and override parsing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::record::Field;
use crate::schema::{DEFAULT_BATCH_CONVERTER, DEFAULT_SPEC_FILENAME};
use crate::store::GenericIdentity;

/// Location of the config file relative to the dataset root.
pub const CONFIG_PATH: &str = ".hirni/config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HirniConfig {
    /// File name of an acquisition's specification.
    #[serde(default = "default_spec_filename")]
    pub studyspec_filename: String,
    #[serde(default)]
    pub dicom2spec: Dicom2SpecConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dicom2SpecConfig {
    /// Rule files applied after the built-in rules, in order. Relative
    /// paths are resolved against the dataset root.
    #[serde(default)]
    pub rules: Vec<PathBuf>,
    #[serde(default)]
    pub generic_identity: GenericIdentity,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionConfig {
    #[serde(default = "default_batch_converter")]
    pub batch_converter: String,
    /// Container the batch converter runs in.
    #[serde(default = "default_container")]
    pub container: Option<String>,
    #[serde(default = "default_heuristic")]
    pub heuristic: String,
    #[serde(default)]
    pub anonymize: bool,
    /// Conversion target, relative to the dataset root.
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
}

fn default_spec_filename() -> String {
    DEFAULT_SPEC_FILENAME.to_string()
}

fn default_batch_converter() -> String {
    DEFAULT_BATCH_CONVERTER.to_string()
}

fn default_container() -> Option<String> {
    Some("conversion".to_string())
}

fn default_heuristic() -> String {
    "hirni".to_string()
}

impl Default for HirniConfig {
    fn default() -> Self {
        Self {
            studyspec_filename: default_spec_filename(),
            dicom2spec: Dicom2SpecConfig::default(),
            conversion: ConversionConfig::default(),
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            batch_converter: default_batch_converter(),
            container: default_container(),
            heuristic: default_heuristic(),
            anonymize: false,
            target_dir: None,
        }
    }
}

impl HirniConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Parse explicit properties: a JSON object of field name to value.
///
/// Every entry becomes a pre-approved [`Field`]. A value already shaped as
/// `{"value": .., "approved": ..}` is taken as is, approval forced on.
pub fn parse_properties(json: &str) -> Result<BTreeMap<String, Field>, ConfigError> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Object(map) = value else {
        return Err(ConfigError::Properties(type_name(&value).to_string()));
    };
    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Object(mut pair) if pair.contains_key("value") => {
                    pair.remove("value").unwrap_or(Value::Null)
                }
                other => other,
            };
            (key, Field::approved(value))
        })
        .collect())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = HirniConfig::from_toml("").unwrap();
        assert_eq!(config, HirniConfig::default());
        assert_eq!(config.studyspec_filename, "studyspec.json");
        assert_eq!(config.conversion.batch_converter, "heudiconv");
        assert_eq!(config.conversion.container.as_deref(), Some("conversion"));
        assert_eq!(config.dicom2spec.generic_identity, GenericIdentity::Location);
    }

    #[test]
    fn parses_sections() {
        let config = HirniConfig::from_toml(
            r#"
studyspec_filename = "spec.jsonl"

[dicom2spec]
rules = ["code/rules/site.toml"]
generic_identity = "typed-location"

[conversion]
heuristic = "custom"
anonymize = true
target_dir = "bids"
"#,
        )
        .unwrap();
        assert_eq!(config.studyspec_filename, "spec.jsonl");
        assert_eq!(config.dicom2spec.rules, [PathBuf::from("code/rules/site.toml")]);
        assert_eq!(config.dicom2spec.generic_identity, GenericIdentity::TypedLocation);
        assert_eq!(config.conversion.heuristic, "custom");
        assert!(config.conversion.anonymize);
        assert_eq!(config.conversion.batch_converter, "heudiconv");
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            HirniConfig::from_toml("spec_filename = \"x\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn properties_are_pre_approved() {
        let props = parse_properties(r#"{"subject": "02", "run": 3, "comment": {"value": "ok"}}"#)
            .unwrap();
        assert_eq!(props["subject"], Field::approved("02"));
        assert_eq!(props["run"], Field::approved(3));
        assert_eq!(props["comment"], Field::approved("ok"));
    }

    #[test]
    fn properties_must_be_an_object() {
        let err = parse_properties("[1, 2]").unwrap_err();
        assert_eq!(err.to_string(), "properties must be a JSON object, got an array");
        assert!(matches!(parse_properties("{"), Err(ConfigError::Json(_))));
    }
}
