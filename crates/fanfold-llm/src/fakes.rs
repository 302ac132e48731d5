//! In-memory fakes for the completion service (testing only)
//!
//! [`ScriptedCompletionService`] answers requests from a list of rules that
//! match on model id and request text. Every request is recorded so tests can
//! assert exactly what each model call saw.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CompletionError;
use crate::types::{Completion, CompletionRequest, CompletionService};

/// What a scripted rule answers with.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Succeed with this text
    Text(String),
    /// Fail with a transport error carrying this message
    Fail(String),
    /// Wait (on the tokio clock), then answer with the inner reply
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        ScriptedReply::Fail(message.into())
    }

    pub fn after(self, delay: Duration) -> Self {
        ScriptedReply::Delayed(delay, Box::new(self))
    }
}

#[derive(Debug, Clone)]
struct Rule {
    model: Option<String>,
    needle: Option<String>,
    reply: ScriptedReply,
}

impl Rule {
    fn matches(&self, request: &CompletionRequest, text: &str) -> bool {
        let model_ok = self.model.as_deref().map_or(true, |m| m == request.model);
        let needle_ok = self.needle.as_deref().map_or(true, |n| text.contains(n));
        model_ok && needle_ok
    }
}

/// Scripted completion service.
///
/// Rules are checked in insertion order; the first match wins. Requests that
/// match no rule fail with [`CompletionError::Transport`].
#[derive(Debug, Default)]
pub struct ScriptedCompletionService {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any request whose text contains `needle`.
    pub fn when_contains(mut self, needle: &str, reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            model: None,
            needle: Some(needle.to_string()),
            reply,
        });
        self
    }

    /// Answer any request addressed to `model`.
    pub fn when_model(mut self, model: &str, reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            model: Some(model.to_string()),
            needle: None,
            reply,
        });
        self
    }

    /// Answer requests addressed to `model` whose text contains `needle`.
    pub fn when_model_contains(mut self, model: &str, needle: &str, reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            model: Some(model.to_string()),
            needle: Some(needle.to_string()),
            reply,
        });
        self
    }

    /// Answer every request not matched by an earlier rule.
    pub fn otherwise(mut self, reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            model: None,
            needle: None,
            reply,
        });
        self
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests received for a given model id.
    pub fn calls_for_model(&self, model: &str) -> Vec<CompletionRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.model == model)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn complete(&self, request: CompletionRequest) -> crate::Result<Completion> {
        let text = request.text_content();
        let reply = self
            .rules
            .iter()
            .find(|r| r.matches(&request, &text))
            .map(|r| r.reply.clone());
        self.calls.lock().unwrap().push(request.clone());

        let mut reply = reply.ok_or_else(|| {
            CompletionError::Transport(format!("no scripted reply for model {}", request.model))
        })?;

        loop {
            match reply {
                ScriptedReply::Text(text) => return Ok(Completion::new(text, request.model)),
                ScriptedReply::Fail(message) => return Err(CompletionError::Transport(message)),
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let svc = ScriptedCompletionService::new()
            .when_contains("alpha", ScriptedReply::text("A"))
            .when_model("planner", ScriptedReply::text("P"))
            .otherwise(ScriptedReply::text("fallback"));

        let a = svc
            .complete(CompletionRequest::text("planner", "alpha beta", 10))
            .await
            .unwrap();
        assert_eq!(a.text, "A");

        let p = svc
            .complete(CompletionRequest::text("planner", "gamma", 10))
            .await
            .unwrap();
        assert_eq!(p.text, "P");

        let f = svc
            .complete(CompletionRequest::text("worker", "gamma", 10))
            .await
            .unwrap();
        assert_eq!(f.text, "fallback");
        assert_eq!(svc.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unmatched_request_fails_and_is_recorded() {
        let svc = ScriptedCompletionService::new();
        let err = svc
            .complete(CompletionRequest::text("worker", "hello", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)));
        assert_eq!(svc.calls_for_model("worker").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_waits_on_tokio_clock() {
        let svc = ScriptedCompletionService::new()
            .otherwise(ScriptedReply::text("late").after(Duration::from_secs(60)));
        let started = tokio::time::Instant::now();
        let out = svc
            .complete(CompletionRequest::text("worker", "x", 10))
            .await
            .unwrap();
        assert_eq!(out.text, "late");
        assert!(started.elapsed() >= Duration::from_secs(60));
    }
}
