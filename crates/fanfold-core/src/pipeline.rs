//! End-to-end run: instructions, fan-out, fan-in, synthesis, extraction.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use fanfold_llm::CompletionService;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::aggregate::{AggregatedEvidence, MissingProfile, ResultAggregator};
use crate::config::{FailurePolicy, OrchestratorConfig};
use crate::dispatch::{check_profiles, DispatchOptions, TaskDispatcher};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::extract::{extract_block, FinalAnswer};
use crate::instruction::InstructionSynthesizer;
use crate::metrics::METRICS;
use crate::objective::Objective;
use crate::obs::{
    emit_evidence_aggregated, emit_instructions_ready, emit_run_failed, emit_run_finished,
    emit_run_started, RunSpan,
};
use crate::profile::{Instruction, WorkerProfile};
use crate::report::ReportSynthesizer;

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub instructions: Vec<Instruction>,
    pub evidence: AggregatedEvidence,
    /// Profiles excluded from the evidence, with the reason.
    pub missing: Vec<MissingProfile>,
    /// Hex SHA-256 of the evidence as rendered for synthesis.
    pub evidence_digest: String,
    pub answer: FinalAnswer,
}

impl RunReport {
    /// True when the answer was built from a subset of the profiles.
    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn missing_identities(&self) -> Vec<&str> {
        self.missing.iter().map(|m| m.identity.as_str()).collect()
    }
}

/// Runs the planner/worker pipeline over one completion service.
pub struct Orchestrator {
    service: Arc<dyn CompletionService>,
    config: OrchestratorConfig,
    cancellation: CancellationToken,
}

impl Orchestrator {
    /// Fails with [`OrchestrationError::Config`] if `config` does not validate.
    pub fn new(
        service: Arc<dyn CompletionService>,
        config: OrchestratorConfig,
    ) -> OrchestrationResult<Self> {
        config.validate()?;
        Ok(Self {
            service,
            config,
            cancellation: CancellationToken::new(),
        })
    }

    /// Cancelling `token` cancels the outstanding workers of any active run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn run(
        &self,
        objective: &Objective,
        profiles: Vec<WorkerProfile>,
    ) -> OrchestrationResult<RunReport> {
        let run_id = Uuid::new_v4();
        let run_key = run_id.to_string();
        let result = self
            .execute(run_id, objective, profiles)
            .instrument(RunSpan::span(&run_key))
            .await;

        if let Err(err) = &result {
            let _span = RunSpan::enter(&run_key);
            emit_run_failed(&run_key, err);
        }
        result
    }

    async fn execute(
        &self,
        run_id: Uuid,
        objective: &Objective,
        profiles: Vec<WorkerProfile>,
    ) -> OrchestrationResult<RunReport> {
        let run_key = run_id.to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        emit_run_started(&run_key, profiles.len());

        check_profiles(&profiles)?;

        let instructions = InstructionSynthesizer::new(Arc::clone(&self.service), &self.config)
            .synthesize(objective, &profiles)
            .await?;
        emit_instructions_ready(
            &run_key,
            instructions.len(),
            &format!("{:?}", self.config.instruction_scope),
        );

        let options = DispatchOptions::from_config(&self.config)
            .with_cancellation(self.cancellation.child_token());
        let mode = self.config.evidence_mode;
        let results = TaskDispatcher::new(Arc::clone(&self.service), &self.config, options)
            .dispatch(profiles, &instructions, mode)
            .await?;

        let evidence = ResultAggregator::new(mode).aggregate(results);
        let missing = evidence.missing().to_vec();

        if evidence.is_empty() {
            return Err(OrchestrationError::EvidenceUnavailable { missing });
        }
        if self.config.failure_policy == FailurePolicy::AbortOnAny && evidence.is_degraded() {
            return Err(OrchestrationError::PartialEvidenceRejected { missing });
        }

        let evidence_digest = evidence.digest();
        emit_evidence_aggregated(&run_key, evidence.len(), missing.len(), &evidence_digest);
        if evidence.is_degraded() {
            info!(
                missing = ?missing.iter().map(|m| m.identity.as_str()).collect::<Vec<_>>(),
                "synthesizing from partial evidence"
            );
        }

        let text = ReportSynthesizer::new(Arc::clone(&self.service), &self.config)
            .synthesize(objective, &evidence)
            .await?;

        let answer = match objective.markers() {
            Some(markers) => extract_block(&text, markers),
            None => FinalAnswer::prose_only(&text),
        };

        METRICS.inc_runs_completed();
        METRICS.flush();
        emit_run_finished(
            &run_key,
            clock.elapsed().as_millis() as u64,
            answer.extracted_block.is_some(),
            !missing.is_empty(),
        );

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            instructions,
            evidence,
            missing,
            evidence_digest,
            answer,
        })
    }
}
