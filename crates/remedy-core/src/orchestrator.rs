//! Sequences the pipeline stages for one alert.
//!
//! A run only ever moves forward through [`RunState`]. Retries live inside
//! the classifier, retriever and generator; the orchestrator sees each stage
//! as a single success or failure. The rendered artifact is serialized once,
//! and that exact text is what the validator inspects and what gets staged.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use crate::audit::write_run_record;
use crate::catalog::{select_template, TemplateCatalog};
use crate::classifier::AlertClassifier;
use crate::config::PipelineConfig;
use crate::domain::{Alert, RemedyError, Result};
use crate::generator::ParameterGenerator;
use crate::llm::LanguageModel;
use crate::metrics::METRICS;
use crate::obs::{
    emit_audit_error, emit_retrieval_degraded, emit_run_finished, emit_run_started,
    emit_state_transition, emit_validation_evaluated, run_span,
};
use crate::policy::OperationPolicy;
use crate::render::render;
use crate::retrieval::{CaseRetriever, CaseStore};
use crate::run::{PipelineRun, RunFailure, RunState};
use crate::staging::{GateDecision, StagingGate};
use crate::validator::validate_document;

/// The assembled pipeline. Shareable across concurrent runs.
pub struct Pipeline {
    classifier: AlertClassifier,
    retriever: CaseRetriever,
    generator: ParameterGenerator,
    catalog: Arc<TemplateCatalog>,
    policy: Arc<OperationPolicy>,
    gate: StagingGate,
    audit_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        classifier: AlertClassifier,
        retriever: CaseRetriever,
        generator: ParameterGenerator,
        catalog: Arc<TemplateCatalog>,
        policy: Arc<OperationPolicy>,
        gate: StagingGate,
    ) -> Self {
        Self {
            classifier,
            retriever,
            generator,
            catalog,
            policy,
            gate,
            audit_dir: None,
        }
    }

    /// Persist every finished run under `dir`.
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    /// Wire a pipeline from configuration and the two external collaborators.
    pub fn from_config(
        config: &PipelineConfig,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn CaseStore>,
        catalog: Arc<TemplateCatalog>,
    ) -> Result<Self> {
        config.validate()?;
        let policy = Arc::new(config.operation_policy()?);
        let limits = Arc::new(config.generation_limits());
        let gate = StagingGate::new(&config.staging.dir).map_err(|e| {
            RemedyError::InvalidConfig(format!(
                "staging dir {}: {e}",
                config.staging.dir.display()
            ))
        })?;

        let classifier = AlertClassifier::new(
            model.clone(),
            config.classify_sampling(),
            config.llm_retry(),
        );
        let retriever = CaseRetriever::new(store, config.memory.top_k, config.memory_retry());
        let generator =
            ParameterGenerator::new(model, config.generate_sampling(), config.llm_retry(), limits);

        let mut pipeline = Self::new(classifier, retriever, generator, catalog, policy, gate);
        pipeline.audit_dir = config.audit.dir.clone();
        Ok(pipeline)
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> &OperationPolicy {
        &self.policy
    }

    /// Drive `alert` to a terminal state.
    ///
    /// Stage failures are reported through the returned run's state and
    /// `failure`; `Err` is reserved for broken invariants.
    pub async fn run(&self, alert: Alert) -> Result<PipelineRun> {
        let mut run = PipelineRun::new(alert);
        let span = run_span(&run.run_id, &run.alert.id);

        async {
            METRICS.inc_started();
            emit_run_started(&run.run_id, &run.alert.id, run.alert.severity.as_str());

            self.drive(&mut run).await?;

            METRICS.record_outcome(run.state);
            emit_run_finished(
                &run.run_id,
                run.state,
                run.duration_ms().unwrap_or_default(),
                run.state.is_success(),
            );
            if let Some(dir) = &self.audit_dir {
                if let Err(err) = write_run_record(&run, dir) {
                    emit_audit_error(&run.run_id, &err);
                }
            }
            Ok::<_, RemedyError>(())
        }
        .instrument(span)
        .await?;

        Ok(run)
    }

    async fn drive(&self, run: &mut PipelineRun) -> Result<()> {
        // RECEIVED -> CLASSIFIED
        let classification = match self.classifier.classify(&run.alert).await {
            Ok(c) => c,
            Err(failure) => {
                return fail(
                    run,
                    RunState::ClassificationFailed,
                    RunFailure::Classification { failure },
                );
            }
        };
        run.classification = Some(classification.clone());
        transition(run, RunState::Classified)?;

        // CLASSIFIED -> RETRIEVED; an unreachable store degrades to no cases.
        let cases = match self.retriever.retrieve(&classification).await {
            Ok(cases) => cases,
            Err(err) => {
                emit_retrieval_degraded(&run.run_id, &err);
                run.record_diagnostic(format!("retrieval degraded, continuing without cases: {err}"));
                Vec::new()
            }
        };
        run.retrieved_cases = Some(cases.clone());
        transition(run, RunState::Retrieved)?;

        let Some(template) = select_template(&self.catalog, &classification) else {
            return fail(
                run,
                RunState::NoTemplateManualReview,
                RunFailure::NoTemplate {
                    category: classification.category,
                },
            );
        };
        run.template_id = Some(template.template_id.clone());

        // RETRIEVED -> PARAMETERIZED
        let variables = match self
            .generator
            .generate(&classification, &cases, template)
            .await
        {
            Ok(v) => v,
            Err(failure) => {
                if failure.is_configuration_error() {
                    run.record_diagnostic(format!("allow-list rejected a generated value: {failure}"));
                }
                return fail(
                    run,
                    RunState::GenerationFailed,
                    RunFailure::Generation { failure },
                );
            }
        };
        run.variables = Some(variables.clone());
        transition(run, RunState::Parameterized)?;

        // PARAMETERIZED -> RENDERED
        let rendered = render(template, &variables)
            .and_then(|artifact| artifact.to_yaml().map(|yaml| (artifact, yaml)));
        let (artifact, document) = match rendered {
            Ok(pair) => pair,
            Err(err) => {
                return fail(
                    run,
                    RunState::GenerationFailed,
                    RunFailure::Render {
                        detail: err.to_string(),
                    },
                );
            }
        };
        run.artifact = Some(artifact);
        transition(run, RunState::Rendered)?;

        // RENDERED -> VALIDATED_OK | VALIDATED_REJECTED
        let validation = validate_document(&document, &self.policy);
        emit_validation_evaluated(&run.run_id, &validation);
        run.validation = Some(validation.clone());
        if validation.valid {
            transition(run, RunState::ValidatedOk)?;
        }

        // VALIDATED_OK -> STAGED
        let run_id = run.run_id.clone();
        match self
            .gate
            .admit(&run_id, &template.template_id, &document, &validation)
        {
            Ok(GateDecision::Staged(staged)) => {
                run.staged_path = Some(staged.path);
                transition(run, RunState::Staged)
            }
            Ok(GateDecision::Rejected(result)) => fail(
                run,
                RunState::ValidatedRejected,
                RunFailure::Rejected {
                    summary: result.rejection_summary(),
                },
            ),
            Err(err) => fail(
                run,
                RunState::StagingFailed,
                RunFailure::Staging {
                    detail: err.to_string(),
                },
            ),
        }
    }
}

fn transition(run: &mut PipelineRun, next: RunState) -> Result<()> {
    let from = run.state;
    run.advance(next)?;
    emit_state_transition(&run.run_id, from, next);
    Ok(())
}

fn fail(run: &mut PipelineRun, terminal: RunState, failure: RunFailure) -> Result<()> {
    let from = run.state;
    run.fail(terminal, failure)?;
    emit_state_transition(&run.run_id, from, terminal);
    Ok(())
}
