//! Alert classification via the language model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Alert, Category, Classification, UNKNOWN_TARGET};
use crate::llm::{extract_json, LanguageModel, SamplingSettings};
use crate::retry::{call_with_retry, RetryExhausted, RetryPolicy};

/// Why an alert could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationFailure {
    #[error("model unavailable: {0}")]
    Transport(RetryExhausted),

    #[error("malformed model response after repair retry: {detail}")]
    MalformedResponse { detail: String, raw: String },

    #[error("model returned category {category:?}, which is not a known category")]
    UnknownCategory { category: String },
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: String,
    #[serde(default)]
    target_node: Option<String>,
    #[serde(default)]
    target_service: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

fn target_or_unknown(value: Option<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => UNKNOWN_TARGET.to_string(),
    }
}

/// Parse one model reply into a classification.
pub fn parse_classification(raw: &str) -> Result<Classification, ClassificationFailure> {
    let malformed = |detail: String| ClassificationFailure::MalformedResponse {
        detail,
        raw: raw.to_string(),
    };

    let json = extract_json(raw).ok_or_else(|| malformed("no JSON object found".into()))?;
    let parsed: RawClassification =
        serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    let category = parsed
        .category
        .trim()
        .parse::<Category>()
        .map_err(|_| ClassificationFailure::UnknownCategory {
            category: parsed.category.clone(),
        })?;

    Ok(Classification {
        category,
        target_node: target_or_unknown(parsed.target_node),
        target_service: target_or_unknown(parsed.target_service),
        summary: parsed.summary.unwrap_or_default().trim().to_string(),
    })
}

/// Turns an alert into a [`Classification`] with a fixed, low-temperature prompt.
pub struct AlertClassifier {
    model: Arc<dyn LanguageModel>,
    sampling: SamplingSettings,
    retry: RetryPolicy,
}

impl AlertClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, sampling: SamplingSettings, retry: RetryPolicy) -> Self {
        Self {
            model,
            sampling,
            retry,
        }
    }

    /// Classify `alert`.
    ///
    /// A reply that does not parse gets one retry with a stricter prompt. A
    /// category outside the closed set fails immediately; it is never mapped
    /// to a near match.
    pub async fn classify(&self, alert: &Alert) -> Result<Classification, ClassificationFailure> {
        let prompt = classification_prompt(alert);
        let raw = self.call(prompt.clone()).await?;

        let classification = match parse_classification(&raw) {
            Ok(c) => c,
            Err(ClassificationFailure::MalformedResponse { detail, .. }) => {
                warn!(alert_id = %alert.id, error = %detail, "classification unparseable, retrying with strict prompt");
                let repaired = self.call(strict_prompt(&prompt)).await?;
                parse_classification(&repaired)?
            }
            Err(other) => return Err(other),
        };

        debug!(
            alert_id = %alert.id,
            category = %classification.category,
            target_node = %classification.target_node,
            target_service = %classification.target_service,
            "alert classified"
        );
        Ok(classification)
    }

    async fn call(&self, prompt: String) -> Result<String, ClassificationFailure> {
        let request = self.sampling.request(prompt);
        call_with_retry(&self.retry, "alert classification", || {
            self.model.complete(&request)
        })
        .await
        .map_err(ClassificationFailure::Transport)
    }
}

/// The fixed classification prompt.
pub fn classification_prompt(alert: &Alert) -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "You are an infrastructure incident classifier.\n\
         Classify the alert below. Answer with exactly one JSON object:\n\
         {{\"category\": \"<{categories}>\", \"target_node\": \"<host or unknown>\", \
         \"target_service\": \"<systemd unit or unknown>\", \"summary\": \"<one sentence>\"}}\n\
         Use \"unknown\" for any target the alert does not name.\n\n\
         Severity: {}\n\
         Alert:\n{}\n",
        alert.severity, alert.content
    )
}

fn strict_prompt(original: &str) -> String {
    format!(
        "Your previous reply could not be parsed. Respond with JSON only, no prose, \
         no code fences: a single object with keys category, target_node, \
         target_service, summary.\n\n{original}"
    )
}
