//! Core vocabulary: `ContentPart`, `CompletionRequest`, `Completion`, `CompletionService`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};


/// A binary image handed to a model alongside text.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Raw image bytes (encoded by the backend as needed).
    pub bytes: Vec<u8>,
}

impl ImageBlob {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn png(bytes: Vec<u8>) -> Self {
        Self::new("image/png", bytes)
    }
}

impl std::fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBlob")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One part of a request's content, in the order the model should see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImageBlob),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(t) => Some(t),
            ContentPart::Image(_) => None,
        }
    }
}

/// A single completion request.
///
/// The model identifier is how callers select a role (a capable planner model
/// vs. a cheap worker model); the service treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, parts: Vec<ContentPart>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            parts,
            max_tokens,
        }
    }

    /// A request carrying a single text prompt.
    pub fn text(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self::new(model, vec![ContentPart::text(prompt)], max_tokens)
    }

    /// All text parts joined with newlines.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Image(_)))
            .count()
    }
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Model that actually served the request.
    pub model: String,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage: None,
        }
    }
}

/// The completion service contract.
///
/// Implementations must be stateless per request: the orchestrator calls
/// `complete` from many tasks at once through a shared reference.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError`](crate::CompletionError) for transport,
    /// provider, timeout or configuration failures.
    async fn complete(&self, request: CompletionRequest) -> crate::Result<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_skips_images() {
        let req = CompletionRequest::new(
            "m",
            vec![
                ContentPart::Image(ImageBlob::png(vec![1, 2, 3])),
                ContentPart::text("first"),
                ContentPart::text("second"),
            ],
            10,
        );
        assert_eq!(req.text_content(), "first\nsecond");
        assert_eq!(req.image_count(), 1);
    }

    #[test]
    fn test_image_blob_debug_hides_bytes() {
        let blob = ImageBlob::png(vec![0; 4096]);
        let dbg = format!("{:?}", blob);
        assert!(dbg.contains("4096"));
        assert!(!dbg.contains("0, 0"));
    }
}
