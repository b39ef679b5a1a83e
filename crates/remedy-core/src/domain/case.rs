//! Historical remediation cases returned by the memory store.

use serde::{Deserialize, Serialize};

/// A past remediation similar to the current incident. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCase {
    pub case_id: String,
    pub similarity_score: f64,
    pub content: String,
    /// Opaque key/value pairs owned by the memory store.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievedCase {
    pub fn new(case_id: impl Into<String>, similarity_score: f64, content: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            similarity_score,
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Leading `max_chars` characters of the content, on a char boundary.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let mut out: String = self.content.chars().take(max_chars).collect();
        if self.content.chars().count() > max_chars {
            out.push_str(" ...");
        }
        out
    }
}
