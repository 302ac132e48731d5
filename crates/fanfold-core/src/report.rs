//! Final synthesis over the aggregated evidence.

use std::sync::Arc;

use fanfold_llm::{CompletionRequest, CompletionService};
use tracing::instrument;

use crate::aggregate::{AggregatedEvidence, EvidenceMode};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, OrchestrationResult, PlannerStage};
use crate::metrics::METRICS;
use crate::objective::Objective;

/// Build the synthesis prompt for `objective` over `evidence`.
pub fn synthesis_prompt(objective: &Objective, evidence: &AggregatedEvidence) -> String {
    let mut prompt = match evidence.mode {
        EvidenceMode::Tagged => format!(
            "Based on the following extracted information, please provide a response to \
             the question: {question}\n\n",
            question = objective.question,
        ),
        EvidenceMode::Structured => {
            let mut head = String::new();
            if let Some(reference) = &objective.reference {
                head.push_str("Original material:\n");
                head.push_str(reference);
                head.push_str("\n\n");
            }
            head.push_str(&format!(
                "Objective: {question}\n\n\
                 Please synthesize the feedback below into a comprehensive analysis that:\n\
                 1. Summarizes key insights from each perspective\n\
                 2. Identifies common themes and concerns\n\
                 3. Prioritizes improvement areas\n\
                 4. Provides specific recommendations\n\
                 5. Highlights any potential conflicts between perspectives\n\n\
                 Format your response in a clear, structured manner with sections and \
                 bullet points.\n\n",
                question = objective.question,
            ));
            head
        }
    };

    if let Some(artifact) = &objective.artifact {
        prompt.push_str(&format!(
            "Also, please generate {description} to accompany your response. Enclose it \
             within {start} and {end}.\n\n",
            description = artifact.description,
            start = artifact.markers.start,
            end = artifact.markers.end,
        ));
    }

    if evidence.is_degraded() {
        let missing: Vec<&str> = evidence
            .missing()
            .iter()
            .map(|m| m.identity.as_str())
            .collect();
        prompt.push_str(&format!(
            "Note: no information could be obtained for: {}. Do not guess at it.\n\n",
            missing.join(", ")
        ));
    }

    let label = match evidence.mode {
        EvidenceMode::Tagged => "Extracted Information",
        EvidenceMode::Structured => "Feedback by perspective",
    };
    prompt.push_str(label);
    prompt.push_str(":\n");
    prompt.push_str(&evidence.render());
    prompt
}

/// Turns aggregated evidence into the planner's final text.
pub struct ReportSynthesizer {
    service: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
}

impl ReportSynthesizer {
    pub fn new(service: Arc<dyn CompletionService>, config: &OrchestratorConfig) -> Self {
        Self {
            service,
            model: config.planner_model.clone(),
            max_tokens: config.max_tokens_planner,
        }
    }

    /// One planner call. A failure or a blank response is fatal.
    #[instrument(skip_all, fields(entries = evidence.len(), degraded = evidence.is_degraded()))]
    pub async fn synthesize(
        &self,
        objective: &Objective,
        evidence: &AggregatedEvidence,
    ) -> OrchestrationResult<String> {
        METRICS.inc_planner_calls();
        let request = CompletionRequest::text(
            self.model.clone(),
            synthesis_prompt(objective, evidence),
            self.max_tokens,
        );
        let completion = self
            .service
            .complete(request)
            .await
            .map_err(|e| OrchestrationError::planner(PlannerStage::Synthesis, e.to_string()))?;

        if completion.text.trim().is_empty() {
            return Err(OrchestrationError::planner(
                PlannerStage::Synthesis,
                "planner returned an empty report",
            ));
        }
        Ok(completion.text)
    }
}
