//! Language-model contract and response parsing.
//!
//! The pipeline treats the model as an untrusted text generator. The only
//! structure taken from a response is a single JSON object, extracted with
//! [`extract_json`] whether or not the model wrapped it in a fenced block.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Sampling settings for one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl SamplingSettings {
    pub fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest {
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Transport-level failures talking to the model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("model call timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model response could not be decoded: {0}")]
    Decode(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// An inference endpoint. Implementations must be safe to share across runs.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the raw completion text for `request`.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String>;
}

/// Locate the single JSON object in a model response.
///
/// Leading/trailing code fences (with or without an info string such as
/// `json`) are stripped first; any prose around the object is ignored.
pub fn extract_json(text: &str) -> Option<&str> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
        body = body.trim_end();
        body = body.strip_suffix("```").unwrap_or(body).trim();
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

/// Extract and parse the JSON object in `text`.
pub fn parse_json_object(text: &str) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let raw = extract_json(text).ok_or_else(|| "no JSON object found in response".to_string())?;
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("response JSON is not an object".to_string()),
        Err(err) => Err(format!("invalid JSON: {err}")),
    }
}
