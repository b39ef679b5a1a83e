//! Historical-case retrieval from the external memory store.
//!
//! Retrieval enriches the generation prompt but is not a prerequisite: when
//! the store is unreachable the run proceeds with no cases and records a
//! diagnostic.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Category, Classification, RetrievedCase};
use crate::retry::{call_with_retry, RetryExhausted, RetryPolicy};

/// Largest `top_k` a retriever accepts.
pub const MAX_TOP_K: usize = 10;

/// Failures talking to the memory store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    #[error("memory store timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("memory store transport error: {0}")]
    Transport(String),

    #[error("memory store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("memory store response could not be decoded: {0}")]
    Decode(String),
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Query sent to the memory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseQuery {
    pub query: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub limit: usize,
}

impl CaseQuery {
    pub fn from_classification(classification: &Classification, limit: usize) -> Self {
        let mut tags = vec![classification.category.as_str().to_string()];
        if classification.has_known_service() {
            tags.push(classification.target_service.clone());
        }
        if classification.has_known_node() {
            tags.push(classification.target_node.clone());
        }
        Self {
            query: format!(
                "{} {} {}",
                classification.category, classification.target_service, classification.summary
            )
            .trim()
            .to_string(),
            category: classification.category,
            tags,
            limit,
        }
    }
}

/// Read-only similarity search over past remediations.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Return up to `query.limit` cases; ordering is not relied upon.
    async fn search(&self, query: &CaseQuery) -> RetrievalResult<Vec<RetrievedCase>>;
}

/// Fetches the top-K most similar cases for a classification.
pub struct CaseRetriever {
    store: Arc<dyn CaseStore>,
    top_k: usize,
    retry: RetryPolicy,
}

impl CaseRetriever {
    /// `top_k` is clamped to `1..=MAX_TOP_K`.
    pub fn new(store: Arc<dyn CaseStore>, top_k: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            top_k: top_k.clamp(1, MAX_TOP_K),
            retry,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Ranked by similarity, highest first, at most `top_k` long.
    pub async fn retrieve(
        &self,
        classification: &Classification,
    ) -> Result<Vec<RetrievedCase>, RetryExhausted> {
        let query = CaseQuery::from_classification(classification, self.top_k);
        let mut cases =
            call_with_retry(&self.retry, "case retrieval", || self.store.search(&query)).await?;

        cases.retain(|c| c.similarity_score.is_finite());
        cases.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        cases.truncate(self.top_k);

        debug!(category = %classification.category, returned = cases.len(), "cases retrieved");
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingCaseStore, InMemoryCaseStore};

    fn classification() -> Classification {
        Classification {
            category: Category::ServiceDown,
            target_node: "redfin".into(),
            target_service: "vllm.service".into(),
            summary: "vllm failed to start".into(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            backoff_base_ms: 1,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn query_tags_skip_unknown_targets() {
        let mut c = classification();
        c.target_node = "unknown".into();
        let q = CaseQuery::from_classification(&c, 3);
        assert_eq!(q.tags, vec!["service_down", "vllm.service"]);
        assert_eq!(q.limit, 3);
    }

    #[tokio::test]
    async fn results_are_ranked_and_truncated() {
        let store = InMemoryCaseStore::new()
            .with_case(Category::ServiceDown, RetrievedCase::new("low", 0.2, "a"))
            .with_case(Category::ServiceDown, RetrievedCase::new("high", 0.9, "b"))
            .with_case(Category::ServiceDown, RetrievedCase::new("nan", f64::NAN, "c"))
            .with_case(Category::ServiceDown, RetrievedCase::new("mid", 0.5, "d"))
            .with_case(Category::DatabaseIssue, RetrievedCase::new("other", 0.99, "e"));
        let retriever = CaseRetriever::new(Arc::new(store), 2, fast_retry());

        let cases = retriever.retrieve(&classification()).await.unwrap();
        let ids: Vec<_> = cases.iter().map(|c| c.case_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn empty_store_yields_empty_list() {
        let retriever = CaseRetriever::new(Arc::new(InMemoryCaseStore::new()), 3, fast_retry());
        assert!(retriever.retrieve(&classification()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_reported_after_retries() {
        let retriever = CaseRetriever::new(Arc::new(FailingCaseStore), 3, fast_retry());
        let err = retriever.retrieve(&classification()).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.last_error.contains("memory store transport error"));
    }

    #[test]
    fn top_k_is_clamped() {
        let store = Arc::new(InMemoryCaseStore::new());
        assert_eq!(CaseRetriever::new(store.clone(), 0, fast_retry()).top_k(), 1);
        assert_eq!(CaseRetriever::new(store, 50, fast_retry()).top_k(), MAX_TOP_K);
    }
}
