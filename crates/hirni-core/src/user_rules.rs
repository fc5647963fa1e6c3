//! Rules configured in TOML files.
//!
//! ```toml
//! [[rule]]
//! name = "resting state"
//! attribute = "SeriesDescription"
//! pattern = '^rest_(?P<run>\d+)$'
//!
//! [rule.set]
//! modality = "bold"
//! task = "rest"
//! run = "${run}"
//! ```
//!
//! A rule without `pattern` applies to every series carrying `attribute`,
//! or to every series if `attribute` is absent too. String values may refer
//! to pattern captures (`$1`, `${name}`).

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::RuleError;
use crate::metadata::SeriesMeta;
use crate::rules::{Patch, Rule, RuleContext};
use crate::schema::keys;
use crate::sort_key::normalize_run;

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rule: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSpec {
    name: String,
    attribute: Option<String>,
    pattern: Option<String>,
    #[serde(default)]
    set: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ConfiguredRule {
    name: String,
    attribute: Option<String>,
    pattern: Option<Regex>,
    set: BTreeMap<String, Value>,
}

impl ConfiguredRule {
    /// Parse every `[[rule]]` of a rule file, in file order.
    pub fn parse_file(content: &str) -> Result<Vec<Self>, RuleError> {
        let file: RuleFile = toml::from_str(content)?;
        file.rule.into_iter().map(Self::build).collect()
    }

    fn build(spec: RuleSpec) -> Result<Self, RuleError> {
        let pattern = match (&spec.attribute, &spec.pattern) {
            (None, Some(_)) => {
                return Err(RuleError::PatternWithoutAttribute { name: spec.name });
            }
            (_, Some(p)) => Some(Regex::new(p).map_err(|source| RuleError::Pattern {
                name: spec.name.clone(),
                source,
            })?),
            (_, None) => None,
        };
        Ok(Self {
            name: spec.name,
            attribute: spec.attribute,
            pattern,
            set: spec.set,
        })
    }

    fn patch_for(&self, series: &SeriesMeta) -> Patch {
        let Some(attribute) = &self.attribute else {
            return self.set.clone();
        };
        let Some(text) = series.get_text(attribute) else {
            return Patch::new();
        };
        let Some(pattern) = &self.pattern else {
            return self.set.clone();
        };
        let Some(caps) = pattern.captures(&text) else {
            return Patch::new();
        };
        self.set
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(template) => {
                        let mut expanded = String::new();
                        caps.expand(template, &mut expanded);
                        if key == keys::RUN {
                            expanded = normalize_run(&expanded);
                        }
                        Value::String(expanded)
                    }
                    other => other.clone(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

impl Rule for ConfiguredRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, series: &[SeriesMeta], _ctx: &RuleContext<'_>) -> Vec<Patch> {
        let patches: Vec<Patch> = series.iter().map(|s| self.patch_for(s)).collect();
        debug!(
            rule = %self.name,
            matched = patches.iter().filter(|p| !p.is_empty()).count(),
            "configured rule evaluated"
        );
        patches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleEngine;
    use serde_json::json;

    fn series(value: Value) -> SeriesMeta {
        SeriesMeta::new(value.as_object().cloned().unwrap_or_default())
    }

    const RULES: &str = r#"
[[rule]]
name = "comment"
[rule.set]
comment = "These rules are for unit testing only"

[[rule]]
name = "rest"
attribute = "SeriesDescription"
pattern = '^rest_(?P<run>\d+)$'
[rule.set]
modality = "bold"
task = "rest"
run = "${run}"
"#;

    #[test]
    fn unconditional_rules_patch_every_series() {
        let rules = ConfiguredRule::parse_file(RULES).unwrap();
        assert_eq!(rules.len(), 2);
        let patches = rules[0].apply(&[series(json!({})), series(json!({"X": 1}))], &RuleContext::default());
        for patch in patches {
            assert_eq!(patch["comment"], "These rules are for unit testing only");
        }
    }

    #[test]
    fn pattern_captures_expand() {
        let rules = ConfiguredRule::parse_file(RULES).unwrap();
        let all = [
            series(json!({"SeriesDescription": "rest_2"})),
            series(json!({"SeriesDescription": "anat-T1w"})),
            series(json!({})),
        ];
        let patches = rules[1].apply(&all, &RuleContext::default());
        assert_eq!(patches[0]["run"], "02");
        assert_eq!(patches[0]["task"], "rest");
        assert!(patches[1].is_empty());
        assert!(patches[2].is_empty());
    }

    #[test]
    fn configured_rules_run_after_defaults() {
        let engine = RuleEngine::with_defaults().with_rules(
            ConfiguredRule::parse_file(RULES)
                .unwrap()
                .into_iter()
                .map(|r| Box::new(r) as Box<dyn Rule>),
        );
        let patches = engine.derive(
            &[series(json!({
                "SeriesInstanceUID": "1.2.3",
                "SeriesDescription": "rest_1",
                "PatientID": "02",
            }))],
            &RuleContext::default(),
        );
        assert_eq!(patches[0]["modality"], "bold");
        assert_eq!(patches[0]["run"], "01");
        assert_eq!(patches[0]["subject"], "02");
        assert_eq!(patches[0]["comment"], "These rules are for unit testing only");
    }

    #[test]
    fn invalid_rules_are_configuration_errors() {
        let bad = "[[rule]]\nname = \"x\"\nattribute = \"A\"\npattern = \"(\"\n";
        assert!(matches!(
            ConfiguredRule::parse_file(bad),
            Err(RuleError::Pattern { name, .. }) if name == "x"
        ));

        let orphan = "[[rule]]\nname = \"y\"\npattern = \"a\"\n";
        assert!(matches!(
            ConfiguredRule::parse_file(orphan),
            Err(RuleError::PatternWithoutAttribute { .. })
        ));

        assert!(matches!(
            ConfiguredRule::parse_file("[[rule]]\nnom = 1\n"),
            Err(RuleError::Parse(_))
        ));
    }
}
