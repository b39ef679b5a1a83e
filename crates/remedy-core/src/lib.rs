//! Remedy Core Library
//!
//! Turns an operational alert into a staged, statically validated remediation
//! playbook: classify, retrieve similar cases, fill a fixed template's
//! variables, render, validate against the operation allow-list, stage.

pub mod audit;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod generator;
pub mod llm;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod policy;
pub mod render;
pub mod retrieval;
pub mod retry;
pub mod run;
pub mod staging;
pub mod telemetry;
pub mod validator;

pub use domain::{
    Alert, Category, Classification, ContentDigest, RemedyError, Result, RetrievedCase, Severity,
    UNKNOWN_TARGET,
};

pub use audit::{read_run_record, write_run_record};
pub use catalog::{
    select_template, TemplateCatalog, TemplateDescriptor, VariableKind, VariableSpec, VariableType,
};
pub use classifier::{AlertClassifier, ClassificationFailure};
pub use config::PipelineConfig;
pub use generator::{
    GeneratedVariables, GenerationFailure, GenerationLimits, ParameterGenerator, VariableValue,
};
pub use llm::{CompletionRequest, LanguageModel, LlmError, LlmResult, SamplingSettings};
pub use orchestrator::Pipeline;
pub use policy::{normalize_operation, OperationPolicy, OperationVerdict};
pub use render::{render, Play, RenderError, RenderedArtifact, Task};
pub use retrieval::{CaseQuery, CaseRetriever, CaseStore, RetrievalError, RetrievalResult};
pub use retry::{RetryExhausted, RetryPolicy};
pub use run::{PipelineRun, RunFailure, RunState};
pub use staging::{GateDecision, StagedArtifact, StagingError, StagingGate};
pub use telemetry::init_tracing;
pub use validator::{validate_document, ValidationResult};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
