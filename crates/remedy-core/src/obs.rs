//! Structured lifecycle events for pipeline runs.
//!
//! Every event carries an `event` field (`run.started`, `run.transition`,
//! `validation.evaluated`, ...) so logs can be filtered without parsing messages.

use tracing::{info, warn};

use crate::run::RunState;
use crate::validator::ValidationResult;

/// Span tagged with the run and alert ids. Attach it to the run future with
/// [`tracing::Instrument`] so it survives `.await` points.
pub fn run_span(run_id: &str, alert_id: &str) -> tracing::Span {
    tracing::info_span!("remedy.run", run_id = %run_id, alert_id = %alert_id)
}

pub fn emit_run_started(run_id: &str, alert_id: &str, severity: &str) {
    info!(event = "run.started", run_id = %run_id, alert_id = %alert_id, severity = %severity);
}

pub fn emit_state_transition(run_id: &str, from: RunState, to: RunState) {
    info!(event = "run.transition", run_id = %run_id, from = %from, to = %to);
}

/// Validator verdict, with the offending operations itemized.
pub fn emit_validation_evaluated(run_id: &str, result: &ValidationResult) {
    let banned = result.banned_ops.iter().cloned().collect::<Vec<_>>().join(",");
    let unapproved = result
        .unapproved_ops
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(",");
    info!(
        event = "validation.evaluated",
        run_id = %run_id,
        valid = result.valid,
        tasks_inspected = result.tasks_inspected,
        banned_ops = %banned,
        unapproved_ops = %unapproved,
        parse_error = result.parse_error.as_deref().unwrap_or(""),
    );
}

/// Retrieval failed; the run continues without cases.
pub fn emit_retrieval_degraded(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "retrieval.degraded", run_id = %run_id, error = %error);
}

pub fn emit_run_finished(run_id: &str, state: RunState, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        state = %state,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Audit record could not be written (warning level).
pub fn emit_audit_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.write_error", run_id = %run_id, error = %error);
}
