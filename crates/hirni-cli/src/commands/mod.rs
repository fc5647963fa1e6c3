pub mod dicom2spec;
pub mod show;
pub mod spec2bids;
pub mod spec4anything;
pub mod validate;

pub use dicom2spec::dicom2spec_command;
pub use show::show_command;
pub use spec2bids::{Spec2BidsArgs, spec2bids_command};
pub use spec4anything::{Spec4AnythingArgs, spec4anything_command};
pub use validate::validate_command;

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use hirni_core::config::CONFIG_PATH;
use hirni_core::{
    ConfiguredRule, HirniConfig, Properties, Rule, RuleEngine, SpecStore, parse_properties,
};
use hirni_store::SpecFile;
use tracing::{debug, info};

/// The dataset a command works on, with its configuration.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: HirniConfig,
}

impl Workspace {
    /// Open the dataset at `root` (default: current directory).
    pub fn open(root: Option<&Path>) -> Result<Self> {
        let root = match root {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        let root = fs::canonicalize(&root)
            .with_context(|| format!("dataset not found: {}", root.display()))?;

        let config_path = root.join(CONFIG_PATH);
        let config = if config_path.is_file() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config = HirniConfig::from_toml(&content)
                .with_context(|| format!("invalid configuration {}", config_path.display()))?;
            info!(path = %config_path.display(), "loaded configuration");
            config
        } else {
            debug!("no configuration file, using defaults");
            HirniConfig::default()
        };
        Ok(Self { root, config })
    }

    /// Absolute form of a path given relative to the dataset root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Dataset-relative, `/`-separated form of a path; `None` outside the dataset.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let abs = self.resolve(path);
        let rel = abs.strip_prefix(&self.root).ok()?;
        let mut parts: Vec<String> = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop()?;
                }
                _ => return None,
            }
        }
        Some(if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        })
    }

    /// Built-in rules followed by the configured rule files, in order.
    pub fn rule_engine(&self) -> Result<RuleEngine> {
        let mut configured: Vec<Box<dyn Rule>> = Vec::new();
        for file in &self.config.dicom2spec.rules {
            let path = self.resolve(file);
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading rule file {}", path.display()))?;
            let rules = ConfiguredRule::parse_file(&content)
                .with_context(|| format!("invalid rule file {}", path.display()))?;
            debug!(path = %path.display(), count = rules.len(), "loaded rules");
            configured.extend(rules.into_iter().map(|r| Box::new(r) as Box<dyn Rule>));
        }
        Ok(RuleEngine::with_defaults().with_rules(configured))
    }

    /// Records of a specification file in a store using the configured
    /// identity scheme. A missing file is an empty store.
    pub fn load_store(&self, spec: &SpecFile) -> Result<SpecStore> {
        let report = spec.load_or_empty()?;
        report.ensure_complete(spec.path())?;
        Ok(SpecStore::with_identity(Arc::new(self.config.dicom2spec.generic_identity))
            .replace_records(report.records))
    }
}

/// Properties given inline as JSON or as the path of a file holding it.
pub fn load_properties(ws: &Workspace, arg: Option<&str>) -> Result<Properties> {
    let Some(arg) = arg else {
        return Ok(Properties::new());
    };
    let json = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        let path = ws.resolve(Path::new(arg));
        fs::read_to_string(&path)
            .with_context(|| format!("reading properties from {}", path.display()))?
    };
    Ok(parse_properties(&json)?)
}

/// Directory of a dataset-relative file path, `""` at the root.
pub fn parent_location(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}
