//! Error taxonomy for orchestration runs.
//!
//! Two tiers: [`WorkerFailure`] is scoped to one profile and only ever shrinks
//! the evidence set; [`OrchestrationError`] aborts the whole run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::MissingProfile;
use crate::config::ConfigError;

/// Why a single worker produced no usable evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum WorkerFailure {
    #[error("completion service error: {0}")]
    Service(String),

    #[error("worker returned an empty response")]
    EmptyResponse,

    #[error("worker payload did not match the record schema: {0}")]
    ParseError(String),

    #[error("worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker was cancelled before completing")]
    Cancelled,

    #[error("worker task panicked: {0}")]
    Panicked(String),
}

/// Which planner call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStage {
    Instruction,
    Synthesis,
}

impl std::fmt::Display for PlannerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlannerStage::Instruction => "instruction",
            PlannerStage::Synthesis => "synthesis",
        };
        write!(f, "{s}")
    }
}

/// Errors that abort an orchestration run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("planner unavailable during {stage}: {reason}")]
    PlannerUnavailable { stage: PlannerStage, reason: String },

    #[error("no worker profiles to dispatch")]
    EmptyProfileSet,

    #[error("duplicate worker profile identity: {identity}")]
    DuplicateProfile { identity: String },

    #[error("no instruction was synthesized for profile {identity}")]
    MissingInstruction { identity: String },

    #[error("every worker failed; nothing to synthesize ({} missing)", missing.len())]
    EvidenceUnavailable { missing: Vec<MissingProfile> },

    #[error("partial evidence rejected by policy ({} of the workers failed)", missing.len())]
    PartialEvidenceRejected { missing: Vec<MissingProfile> },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestrationError {
    pub(crate) fn planner(stage: PlannerStage, reason: impl Into<String>) -> Self {
        OrchestrationError::PlannerUnavailable {
            stage,
            reason: reason.into(),
        }
    }

    /// Profiles that were missing from the evidence when the run aborted.
    pub fn missing(&self) -> &[MissingProfile] {
        match self {
            OrchestrationError::EvidenceUnavailable { missing }
            | OrchestrationError::PartialEvidenceRejected { missing } => missing,
            _ => &[],
        }
    }
}

/// Result type for orchestration operations.
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_unavailable_display_names_stage() {
        let err = OrchestrationError::planner(PlannerStage::Instruction, "empty response");
        let msg = err.to_string();
        assert!(msg.contains("instruction"));
        assert!(msg.contains("empty response"));
    }

    #[test]
    fn test_worker_failure_round_trips_through_json() {
        let failure = WorkerFailure::Timeout(Duration::from_secs(3));
        let json = serde_json::to_string(&failure).unwrap();
        let back: WorkerFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(failure, back);
    }

    #[test]
    fn test_missing_exposes_failed_identities() {
        let err = OrchestrationError::EvidenceUnavailable {
            missing: vec![MissingProfile {
                identity: "q1".to_string(),
                failure: WorkerFailure::EmptyResponse,
            }],
        };
        assert_eq!(err.missing().len(), 1);
        assert!(err.to_string().contains("1 missing"));
        assert!(OrchestrationError::EmptyProfileSet.missing().is_empty());
    }
}
