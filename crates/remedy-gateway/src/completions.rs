//! OpenAI-compatible text completions client.
//!
//! Speaks `POST <endpoint>/v1/completions` as served by vLLM. Only the first
//! choice's `text` is used.

use std::time::Duration;

use async_trait::async_trait;
use remedy_core::config::LlmConfig;
use remedy_core::{CompletionRequest, LanguageModel, LlmError, LlmResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check_endpoint, Result};
use crate::{join_url, truncate_body, USER_AGENT};

const COMPLETIONS_PATH: &str = "/v1/completions";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
}

/// Pull the first choice's text out of a completions response body.
pub fn parse_completion(body: &str) -> LlmResult<String> {
    let response: CompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Decode(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.text)
        .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))
}

/// Completions client
pub struct CompletionsClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl CompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        check_endpoint(&config.endpoint)?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: join_url(&config.endpoint, COMPLETIONS_PATH),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                limit_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            LlmError::Decode(err.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl LanguageModel for CompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String> {
        let body = CompletionBody {
            model: &self.model,
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate_body(&text, MAX_ERROR_BODY),
            });
        }

        debug!(url = %self.url, bytes = text.len(), "completion received");
        parse_completion(&text)
    }
}
