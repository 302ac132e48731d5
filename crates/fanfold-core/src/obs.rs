//! Structured lifecycle events for orchestration runs.
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it. Worker and stage spans nest under the [`RunSpan`] of their run.

use tracing::{info, warn};

/// RAII guard that enters a `fanfold.run` span for the lifetime of a run.
///
/// Only hold this across synchronous sections; futures should use
/// [`RunSpan::span`] with `Instrument` instead.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: Self::span(run_id).entered(),
        }
    }

    /// The un-entered span, for instrumenting futures.
    pub fn span(run_id: &str) -> tracing::Span {
        tracing::info_span!("fanfold.run", run_id = %run_id)
    }
}

pub fn emit_run_started(run_id: &str, profiles: usize) {
    info!(event = "run.started", run_id = %run_id, profiles = profiles);
}

/// Instructions are ready and fan-out is about to begin.
pub fn emit_instructions_ready(run_id: &str, instructions: usize, scope: &str) {
    info!(
        event = "run.instructions_ready",
        run_id = %run_id,
        instructions = instructions,
        scope = %scope,
    );
}

pub fn emit_worker_finished(profile: &str, success: bool, duration_ms: u64) {
    info!(
        event = "worker.finished",
        profile = %profile,
        success = success,
        duration_ms = duration_ms,
    );
}

pub fn emit_evidence_aggregated(run_id: &str, entries: usize, missing: usize, digest: &str) {
    info!(
        event = "run.evidence_aggregated",
        run_id = %run_id,
        entries = entries,
        missing = missing,
        digest = %digest,
    );
}

/// Emit event: run finished. `degraded` is true when some profiles are missing.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, has_block: bool, degraded: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        has_block = has_block,
        degraded = degraded,
    );
}

/// Emit event: the run aborted (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_run_started("test-run-id", 3);
        emit_run_failed("test-run-id", &"planner unavailable");
    }
}
