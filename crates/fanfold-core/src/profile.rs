//! Worker profiles: the unit of fan-out.
//!
//! A profile names one worker's scope (an identity, what it is good at, what
//! it should focus on) and carries the only context that worker will ever see.

use fanfold_llm::{ContentPart, ImageBlob};
use serde::{Deserialize, Serialize};

/// The slice of evidence handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextPayload {
    Text(String),
    /// Ordered page images, e.g. a rasterized document.
    Images(Vec<ImageBlob>),
}

impl ContextPayload {
    pub fn text(text: impl Into<String>) -> Self {
        ContextPayload::Text(text.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ContextPayload::Text(t) => t.trim().is_empty(),
            ContextPayload::Images(images) => images.is_empty(),
        }
    }

    /// Content parts placed ahead of the worker's instruction.
    pub(crate) fn into_parts(self) -> (Vec<ContentPart>, Option<String>) {
        match self {
            ContextPayload::Text(text) => (Vec::new(), Some(text)),
            ContextPayload::Images(images) => {
                (images.into_iter().map(ContentPart::Image).collect(), None)
            }
        }
    }
}

/// One worker's scope. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProfile {
    identity: String,
    capability_description: String,
    focus_tags: Vec<String>,
    context: ContextPayload,
}

impl WorkerProfile {
    pub fn new(
        identity: impl Into<String>,
        capability_description: impl Into<String>,
        context: ContextPayload,
    ) -> Self {
        Self {
            identity: identity.into(),
            capability_description: capability_description.into(),
            focus_tags: Vec::new(),
            context,
        }
    }

    pub fn with_focus_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.focus_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn capability_description(&self) -> &str {
        &self.capability_description
    }

    pub fn focus_tags(&self) -> &[String] {
        &self.focus_tags
    }

    pub fn context(&self) -> &ContextPayload {
        &self.context
    }

    pub(crate) fn into_context(self) -> ContextPayload {
        self.context
    }
}

/// A planner-written instruction bound to one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub profile_identity: String,
    pub text: String,
}

impl Instruction {
    pub fn new(profile_identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            profile_identity: profile_identity.into(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_keeps_focus_tag_order() {
        let profile = WorkerProfile::new("eng", "Software Engineer", ContextPayload::text("doc"))
            .with_focus_tags(["Feasibility", "Architecture", "Performance"]);
        assert_eq!(
            profile.focus_tags(),
            &["Feasibility", "Architecture", "Performance"]
        );
        assert_eq!(profile.identity(), "eng");
    }

    #[test]
    fn test_image_payload_becomes_leading_parts() {
        let payload = ContextPayload::Images(vec![
            ImageBlob::png(vec![1]),
            ImageBlob::png(vec![2]),
        ]);
        let (parts, text) = payload.into_parts();
        assert_eq!(parts.len(), 2);
        assert!(text.is_none());
    }

    #[test]
    fn test_empty_payloads() {
        assert!(ContextPayload::text("   ").is_empty());
        assert!(ContextPayload::Images(vec![]).is_empty());
        assert!(!ContextPayload::text("q3 revenue").is_empty());
    }
}
