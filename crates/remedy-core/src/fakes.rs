//! In-memory fakes for the external collaborators (testing only)
//!
//! Provides `ScriptedModel`, `InMemoryCaseStore` and `FailingCaseStore` that
//! satisfy the `LanguageModel` and `CaseStore` contracts without any network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{Category, RetrievedCase};
use crate::llm::{CompletionRequest, LanguageModel, LlmError, LlmResult};
use crate::retrieval::{CaseQuery, CaseStore, RetrievalError, RetrievalResult};

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Replays a fixed sequence of replies, one per call, and records every request.
///
/// Once the script is exhausted every further call fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<LlmResult<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, err: LlmError) -> Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".into())))
    }
}

// ---------------------------------------------------------------------------
// InMemoryCaseStore
// ---------------------------------------------------------------------------

/// Case store backed by a `Vec<(Category, RetrievedCase)>`.
///
/// Returns every case filed under the query's category, in insertion order;
/// ranking is left to the caller.
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    cases: Mutex<Vec<(Category, RetrievedCase)>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case(self, category: Category, case: RetrievedCase) -> Self {
        self.cases.lock().unwrap().push((category, case));
        self
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn search(&self, query: &CaseQuery) -> RetrievalResult<Vec<RetrievedCase>> {
        let cases = self.cases.lock().unwrap();
        Ok(cases
            .iter()
            .filter(|(category, _)| *category == query.category)
            .map(|(_, case)| case.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FailingCaseStore
// ---------------------------------------------------------------------------

/// A store that is always unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingCaseStore;

#[async_trait]
impl CaseStore for FailingCaseStore {
    async fn search(&self, _query: &CaseQuery) -> RetrievalResult<Vec<RetrievedCase>> {
        Err(RetrievalError::Transport("connection refused".into()))
    }
}
