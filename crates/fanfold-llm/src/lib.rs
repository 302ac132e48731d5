//! fanfold-llm: the language-model completion service contract.
//!
//! The orchestration engine only needs "request in, text out, or failure".
//! This crate pins that contract down as the [`CompletionService`] trait and
//! ships the implementations the engine is used with.
//!
//! ## Key Components
//!
//! - [`CompletionService`]: async request/response trait, safe for concurrent use
//! - [`CompletionRequest`] / [`ContentPart`]: model id, text and image parts, token budget
//! - [`AnthropicBackend`]: Messages API backend over `reqwest`
//! - [`fakes::ScriptedCompletionService`]: in-memory scripted service for tests

mod anthropic;
mod error;
pub mod fakes;
mod types;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use error::CompletionError;
pub use types::{Completion, CompletionRequest, CompletionService, ContentPart, ImageBlob, Usage};

/// Result type for completion calls.
pub type Result<T> = std::result::Result<T, CompletionError>;
