//! Instruction synthesis.
//!
//! The planner writes the instruction each worker receives verbatim. The text
//! is treated as opaque, so the only checks are minimal shape checks: non-empty
//! and free of the artifact markers the extractor relies on later.

use std::sync::Arc;

use fanfold_llm::{CompletionRequest, CompletionService};
use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::config::{InstructionScope, OrchestratorConfig};
use crate::error::{OrchestrationError, OrchestrationResult, PlannerStage};
use crate::metrics::METRICS;
use crate::objective::Objective;
use crate::profile::{Instruction, WorkerProfile};

/// Prompt asking the planner for one instruction shared by every worker.
pub fn global_instruction_prompt(objective: &Objective) -> String {
    let scope = objective
        .scope_hint
        .as_deref()
        .unwrap_or("its own portion of the source material");
    format!(
        "Based on the following question, please generate a specific prompt for an LLM \
         sub-agent to extract relevant information from {scope}. Each sub-agent only has \
         access to {scope}. Output only the prompt and nothing else.\n\n\
         Question: {question}",
        scope = scope,
        question = objective.question,
    )
}

/// Prompt asking the planner for an instruction specialized to one profile.
pub fn profile_instruction_prompt(objective: &Objective, profile: &WorkerProfile) -> String {
    let focus = if profile.focus_tags().is_empty() {
        "(none specified)".to_string()
    } else {
        profile.focus_tags().join(", ")
    };
    format!(
        "Generate a detailed prompt for a sub-agent that will work on the objective below \
         from one specific point of view. The sub-agent only sees its own material.\n\n\
         Objective: {question}\n\n\
         The sub-agent should embody this profile:\n\
         {capability}\n\
         Focus Areas: {focus}\n\n\
         Generate a prompt that will make the sub-agent:\n\
         1. Analyze the material from this specific perspective\n\
         2. Identify key concerns and opportunities\n\
         3. Provide specific suggestions for improvement\n\
         4. Highlight any missing elements crucial for this perspective\n\
         5. Structure the feedback in a clear, actionable format\n\n\
         Output only the prompt text that will be given to the sub-agent.",
        question = objective.question,
        capability = profile.capability_description(),
        focus = focus,
    )
}

/// Minimal shape check on planner-written instruction text.
pub fn validate_instruction(text: &str, objective: &Objective) -> Result<String, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("planner returned an empty instruction".to_string());
    }
    if let Some(markers) = objective.markers() {
        if markers.occur_in(trimmed) {
            return Err(format!(
                "instruction contains reserved block markers {} / {}",
                markers.start, markers.end
            ));
        }
    }
    Ok(trimmed.to_string())
}

/// Produces one [`Instruction`] per profile using the planner model.
pub struct InstructionSynthesizer {
    service: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
    scope: InstructionScope,
}

impl InstructionSynthesizer {
    pub fn new(service: Arc<dyn CompletionService>, config: &OrchestratorConfig) -> Self {
        Self {
            service,
            model: config.planner_model.clone(),
            max_tokens: config.max_tokens_planner,
            scope: config.instruction_scope,
        }
    }

    pub fn scope(&self) -> InstructionScope {
        self.scope
    }

    /// Synthesize instructions for every profile.
    ///
    /// Fails with [`OrchestrationError::PlannerUnavailable`] if any planner call
    /// fails or yields an unusable instruction; no fallback text is invented.
    #[instrument(skip_all, fields(scope = ?self.scope, profiles = profiles.len()))]
    pub async fn synthesize(
        &self,
        objective: &Objective,
        profiles: &[WorkerProfile],
    ) -> OrchestrationResult<Vec<Instruction>> {
        match self.scope {
            InstructionScope::Global => {
                let text = self
                    .ask_planner(global_instruction_prompt(objective), objective)
                    .await?;
                Ok(profiles
                    .iter()
                    .map(|p| Instruction::new(p.identity(), text.clone()))
                    .collect())
            }
            InstructionScope::PerProfile => {
                let calls = profiles.iter().map(|profile| async move {
                    let text = self
                        .ask_planner(profile_instruction_prompt(objective, profile), objective)
                        .await?;
                    debug!(profile = %profile.identity(), chars = text.len(), "instruction ready");
                    Ok::<_, OrchestrationError>(Instruction::new(profile.identity(), text))
                });
                try_join_all(calls).await
            }
        }
    }

    async fn ask_planner(
        &self,
        prompt: String,
        objective: &Objective,
    ) -> OrchestrationResult<String> {
        METRICS.inc_planner_calls();
        let request = CompletionRequest::text(self.model.clone(), prompt, self.max_tokens);
        let completion = self
            .service
            .complete(request)
            .await
            .map_err(|e| OrchestrationError::planner(PlannerStage::Instruction, e.to_string()))?;
        validate_instruction(&completion.text, objective)
            .map_err(|reason| OrchestrationError::planner(PlannerStage::Instruction, reason))
    }
}
