//! Per-entity command results, rendered as text or JSON lines.

use std::fmt;
use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    NotNeeded,
    Impossible,
    Error,
}

impl Status {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Impossible | Self::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::NotNeeded => "notneeded",
            Self::Impossible => "impossible",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub action: &'static str,
    pub path: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResult {
    pub fn new(action: &'static str, path: impl Into<String>, status: Status) -> Self {
        Self {
            action,
            path: path.into(),
            status,
            message: None,
        }
    }

    pub fn ok(action: &'static str, path: impl Into<String>) -> Self {
        Self::new(action, path, Status::Ok)
    }

    pub fn not_needed(action: &'static str, path: impl Into<String>) -> Self {
        Self::new(action, path, Status::NotNeeded)
    }

    pub fn impossible(action: &'static str, path: impl Into<String>) -> Self {
        Self::new(action, path, Status::Impossible)
    }

    pub fn error(action: &'static str, path: impl Into<String>) -> Self {
        Self::new(action, path, Status::Error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// Collects results and prints each as it arrives.
#[derive(Debug, Default)]
pub struct Reporter {
    json: bool,
    failures: usize,
    total: usize,
}

impl Reporter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            ..Self::default()
        }
    }

    pub fn report(&mut self, result: CommandResult) {
        self.total += 1;
        if result.status.is_failure() {
            self.failures += 1;
        }
        if self.json {
            match serde_json::to_string(&result) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::error!(%err, "cannot render result"),
            }
        } else {
            match &result.message {
                Some(message) => println!(
                    "{}({}): {} ({message})",
                    result.action, result.status, result.path
                ),
                None => println!("{}({}): {}", result.action, result.status, result.path),
            }
        }
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = CommandResult>) {
        for result in results {
            self.report(result);
        }
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
