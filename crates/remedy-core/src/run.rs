//! Pipeline run record and its forward-only state machine.
//!
//! ```text
//! RECEIVED ─► CLASSIFIED ─► RETRIEVED ─► PARAMETERIZED ─► RENDERED ─┬► VALIDATED_OK ─┬► STAGED
//!    │                          │  │            │                   │                └► STAGING_FAILED
//!    └► CLASSIFICATION_FAILED   │  └► GENERATION_FAILED ◄──────────┘ (render)
//!                               └► NO_TEMPLATE_MANUAL_REVIEW        └► VALIDATED_REJECTED
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationFailure;
use crate::domain::{Alert, Category, Classification, RemedyError, Result, RetrievedCase};
use crate::generator::{GeneratedVariables, GenerationFailure};
use crate::render::RenderedArtifact;
use crate::validator::ValidationResult;

/// Where a run is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Received,
    Classified,
    Retrieved,
    Parameterized,
    Rendered,
    ValidatedOk,
    Staged,
    ValidatedRejected,
    ClassificationFailed,
    GenerationFailed,
    NoTemplateManualReview,
    StagingFailed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Classified => "CLASSIFIED",
            Self::Retrieved => "RETRIEVED",
            Self::Parameterized => "PARAMETERIZED",
            Self::Rendered => "RENDERED",
            Self::ValidatedOk => "VALIDATED_OK",
            Self::Staged => "STAGED",
            Self::ValidatedRejected => "VALIDATED_REJECTED",
            Self::ClassificationFailed => "CLASSIFICATION_FAILED",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::NoTemplateManualReview => "NO_TEMPLATE_MANUAL_REVIEW",
            Self::StagingFailed => "STAGING_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Staged
                | Self::ValidatedRejected
                | Self::ClassificationFailed
                | Self::GenerationFailed
                | Self::NoTemplateManualReview
                | Self::StagingFailed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Staged)
    }

    /// The only edges of the state machine.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Received, ClassificationFailed)
                | (Classified, Retrieved)
                | (Retrieved, Parameterized)
                | (Retrieved, GenerationFailed)
                | (Retrieved, NoTemplateManualReview)
                | (Parameterized, Rendered)
                | (Parameterized, GenerationFailed)
                | (Rendered, ValidatedOk)
                | (Rendered, ValidatedRejected)
                | (ValidatedOk, Staged)
                | (ValidatedOk, StagingFailed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to every failed terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunFailure {
    Classification { failure: ClassificationFailure },
    Generation { failure: GenerationFailure },
    Render { detail: String },
    NoTemplate { category: Category },
    Rejected { summary: String },
    Staging { detail: String },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification { failure } => write!(f, "classification failed: {failure}"),
            Self::Generation { failure } => write!(f, "parameter generation failed: {failure}"),
            Self::Render { detail } => write!(f, "rendering failed: {detail}"),
            Self::NoTemplate { category } => {
                write!(f, "no template for category {category}; manual review required")
            }
            Self::Rejected { summary } => write!(f, "validation rejected: {summary}"),
            Self::Staging { detail } => write!(f, "staging failed: {detail}"),
        }
    }
}

/// Non-fatal observation recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: RunState,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// Everything known about one alert's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub alert: Alert,
    pub state: RunState,
    pub classification: Option<Classification>,
    pub retrieved_cases: Option<Vec<RetrievedCase>>,
    pub template_id: Option<String>,
    pub variables: Option<GeneratedVariables>,
    pub artifact: Option<RenderedArtifact>,
    pub validation: Option<ValidationResult>,
    pub staged_path: Option<PathBuf>,
    pub failure: Option<RunFailure>,
    pub diagnostics: Vec<Diagnostic>,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(alert: Alert) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            alert,
            state: RunState::Received,
            classification: None,
            retrieved_cases: None,
            template_id: None,
            variables: None,
            artifact: None,
            validation: None,
            staged_path: None,
            failure: None,
            diagnostics: Vec::new(),
            transitions: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move forward along one edge of the state machine.
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RemedyError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Move to a failed terminal state, recording why.
    pub fn fail(&mut self, terminal: RunState, failure: RunFailure) -> Result<()> {
        self.advance(terminal)?;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn record_diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            stage: self.state,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn run() -> PipelineRun {
        PipelineRun::new(Alert::new("a-1", "x", Severity::Info))
    }

    #[test]
    fn happy_path_walks_forward() {
        let mut r = run();
        for next in [
            RunState::Classified,
            RunState::Retrieved,
            RunState::Parameterized,
            RunState::Rendered,
            RunState::ValidatedOk,
            RunState::Staged,
        ] {
            r.advance(next).unwrap();
        }
        assert!(r.state.is_success());
        assert_eq!(r.transitions.len(), 6);
        assert!(r.finished_at.is_some());
    }

    #[test]
    fn backwards_and_skipping_transitions_are_illegal() {
        let mut r = run();
        r.advance(RunState::Classified).unwrap();
        assert!(r.advance(RunState::Received).is_err());
        assert!(r.advance(RunState::Rendered).is_err());
        assert!(r.advance(RunState::Staged).is_err());
        assert_eq!(r.state, RunState::Classified);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use RunState::*;
        let all = [
            Received,
            Classified,
            Retrieved,
            Parameterized,
            Rendered,
            ValidatedOk,
            Staged,
            ValidatedRejected,
            ClassificationFailed,
            GenerationFailed,
            NoTemplateManualReview,
            StagingFailed,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn fail_records_reason() {
        let mut r = run();
        r.advance(RunState::Classified).unwrap();
        r.advance(RunState::Retrieved).unwrap();
        r.fail(
            RunState::NoTemplateManualReview,
            RunFailure::NoTemplate {
                category: Category::NetworkIssue,
            },
        )
        .unwrap();
        assert_eq!(r.state, RunState::NoTemplateManualReview);
        assert!(r.failure.as_ref().unwrap().to_string().contains("network_issue"));
    }

    #[test]
    fn state_serializes_screaming() {
        let json = serde_json::to_string(&RunState::NoTemplateManualReview).unwrap();
        assert_eq!(json, "\"NO_TEMPLATE_MANUAL_REVIEW\"");
    }
}
