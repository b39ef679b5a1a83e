//! Remediation categories and the structured classification of an alert.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RemedyError;

/// Sentinel used when the model cannot name a target node or service.
pub const UNKNOWN_TARGET: &str = "unknown";

/// Closed set of remediation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ServiceDown,
    ConfigDrift,
    ResourceExhaustion,
    DatabaseIssue,
    NetworkIssue,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::ServiceDown,
        Category::ConfigDrift,
        Category::ResourceExhaustion,
        Category::DatabaseIssue,
        Category::NetworkIssue,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceDown => "service_down",
            Self::ConfigDrift => "config_drift",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::DatabaseIssue => "database_issue",
            Self::NetworkIssue => "network_issue",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RemedyError;

    /// Exact match only. Near-misses are rejected, never mapped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RemedyError::UnknownCategory(s.to_string()))
    }
}

/// Structured interpretation of an alert. Produced once per alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub target_node: String,
    pub target_service: String,
    pub summary: String,
}

impl Classification {
    pub fn has_known_node(&self) -> bool {
        self.target_node != UNKNOWN_TARGET
    }

    pub fn has_known_service(&self) -> bool {
        self.target_service != UNKNOWN_TARGET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn category_rejects_near_misses() {
        assert!("Service_Down".parse::<Category>().is_err());
        assert!("service-down".parse::<Category>().is_err());
        assert!("disk_full".parse::<Category>().is_err());
    }
}
