//! Memory-store client: `POST <endpoint>/search` with a [`CaseQuery`].
//!
//! The store may answer with `{"cases": [...]}` or a bare array. Ranking is
//! re-applied by the retriever, so response order does not matter here.

use std::time::Duration;

use async_trait::async_trait;
use remedy_core::config::MemoryConfig;
use remedy_core::{CaseQuery, CaseStore, RetrievalError, RetrievalResult, RetrievedCase};
use serde::Deserialize;
use tracing::debug;

use crate::error::{check_endpoint, Result};
use crate::{join_url, truncate_body, USER_AGENT};

const SEARCH_PATH: &str = "/search";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { cases: Vec<RetrievedCase> },
    Bare(Vec<RetrievedCase>),
}

pub fn parse_search_response(body: &str) -> RetrievalResult<Vec<RetrievedCase>> {
    match serde_json::from_str(body) {
        Ok(SearchResponse::Wrapped { cases }) | Ok(SearchResponse::Bare(cases)) => Ok(cases),
        Err(err) => Err(RetrievalError::Decode(err.to_string())),
    }
}

/// HTTP case store
pub struct HttpCaseStore {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpCaseStore {
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        check_endpoint(&config.endpoint)?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: join_url(&config.endpoint, SEARCH_PATH),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_error(&self, err: reqwest::Error) -> RetrievalError {
        if err.is_timeout() {
            RetrievalError::Timeout {
                limit_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RetrievalError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl CaseStore for HttpCaseStore {
    async fn search(&self, query: &CaseQuery) -> RetrievalResult<Vec<RetrievedCase>> {
        let response = self
            .http
            .post(&self.url)
            .json(query)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_error(e))?;
        if !status.is_success() {
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body: truncate_body(&text, MAX_ERROR_BODY),
            });
        }

        let cases = parse_search_response(&text)?;
        debug!(url = %self.url, returned = cases.len(), "memory store search");
        Ok(cases)
    }
}
