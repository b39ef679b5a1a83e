//! Operational alerts handed over by the upstream triage system.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::RemedyError;

/// Alert severity as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = RemedyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "critical" | "crit" => Ok(Self::Critical),
            other => Err(RemedyError::UnknownSeverity(other.to_string())),
        }
    }
}

/// A triage-worthy event. Immutable once received; consumed by exactly one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub content: String,
    pub severity: Severity,
    pub received_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(id: impl Into<String>, content: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            severity,
            received_at: Utc::now(),
        }
    }
}
