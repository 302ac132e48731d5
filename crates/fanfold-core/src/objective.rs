//! The high-level question a run answers.

use serde::{Deserialize, Serialize};

use crate::extract::BlockMarkers;

/// A generated artifact the final answer should carry, e.g. plotting code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    /// What to generate, phrased for the planner ("Python code using the matplotlib library").
    pub description: String,
    pub markers: BlockMarkers,
}

impl ArtifactRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            markers: BlockMarkers::code(),
        }
    }

    pub fn with_markers(mut self, markers: BlockMarkers) -> Self {
        self.markers = markers;
        self
    }
}

/// The user's question plus optional framing for the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub question: String,
    /// Shared source material repeated to the planner at synthesis time.
    pub reference: Option<String>,
    /// What one worker sees, e.g. "a single quarter's earnings report".
    pub scope_hint: Option<String>,
    pub artifact: Option<ArtifactRequest>,
}

impl Objective {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            reference: None,
            scope_hint: None,
            artifact: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_scope_hint(mut self, hint: impl Into<String>) -> Self {
        self.scope_hint = Some(hint.into());
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactRequest) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn markers(&self) -> Option<&BlockMarkers> {
        self.artifact.as_ref().map(|a| &a.markers)
    }
}
