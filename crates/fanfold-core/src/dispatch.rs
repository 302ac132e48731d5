//! Parallel worker dispatch.
//!
//! One tokio task per profile. Each task owns exactly its profile's context
//! and instruction, so no worker can observe another's input or output. The
//! dispatcher gathers every task before returning (no early exit on failure)
//! and reports one [`WorkerResult`] per profile, in submission order, keyed by
//! identity rather than by completion order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fanfold_llm::{CompletionRequest, CompletionService, ContentPart};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn, Instrument};

use crate::aggregate::{EvidenceMode, RECORD_CONTRACT};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, OrchestrationResult, WorkerFailure};
use crate::metrics::METRICS;
use crate::obs::emit_worker_finished;
use crate::profile::{Instruction, WorkerProfile};

/// Outcome of one worker call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// Raw response text; normalized later by the aggregator.
    Success(String),
    Failure(WorkerFailure),
}

/// The result of dispatching one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub profile_identity: String,
    pub outcome: WorkerOutcome,
}

impl WorkerResult {
    pub fn success(identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            profile_identity: identity.into(),
            outcome: WorkerOutcome::Success(text.into()),
        }
    }

    pub fn failure(identity: impl Into<String>, failure: WorkerFailure) -> Self {
        Self {
            profile_identity: identity.into(),
            outcome: WorkerOutcome::Failure(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Success(_))
    }
}

/// Concurrency, timeout and cancellation controls for one fan-out.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// `None` dispatches every profile simultaneously.
    pub max_concurrent: Option<usize>,
    pub worker_timeout: Option<Duration>,
    /// Outstanding workers are cancelled once this much time has passed.
    pub run_deadline: Option<Duration>,
    /// Cancelling this token cancels every outstanding worker.
    pub cancellation: CancellationToken,
}

impl DispatchOptions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_workers,
            worker_timeout: config.worker_timeout(),
            run_deadline: config.run_deadline(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Reject profile sets that cannot yield one result per identity.
///
/// Empty sets, sets where no profile carries any context, and sets with a
/// repeated identity are refused.
pub(crate) fn check_profiles(profiles: &[WorkerProfile]) -> OrchestrationResult<()> {
    if profiles.is_empty() || profiles.iter().all(|p| p.context().is_empty()) {
        return Err(OrchestrationError::EmptyProfileSet);
    }
    let mut seen = HashSet::new();
    for profile in profiles {
        if !seen.insert(profile.identity()) {
            return Err(OrchestrationError::DuplicateProfile {
                identity: profile.identity().to_string(),
            });
        }
    }
    Ok(())
}

/// Assemble the worker request: context first, then the instruction, then the
/// response contract when a structured record is expected.
pub fn build_worker_request(
    model: &str,
    max_tokens: u32,
    profile: WorkerProfile,
    instruction: &str,
    mode: EvidenceMode,
) -> CompletionRequest {
    let (mut parts, context_text) = profile.into_context().into_parts();

    let mut text = String::new();
    if let Some(context_text) = context_text {
        text.push_str("Source material:\n");
        text.push_str(&context_text);
        text.push_str("\n\n");
    }
    text.push_str(instruction);
    if mode == EvidenceMode::Structured {
        text.push_str("\n\n");
        text.push_str(RECORD_CONTRACT);
    }
    parts.push(ContentPart::Text(text));

    CompletionRequest::new(model, parts, max_tokens)
}

/// Fans worker calls out over the worker model.
pub struct TaskDispatcher {
    service: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
    options: DispatchOptions,
}

impl TaskDispatcher {
    pub fn new(
        service: Arc<dyn CompletionService>,
        config: &OrchestratorConfig,
        options: DispatchOptions,
    ) -> Self {
        Self {
            service,
            model: config.worker_model.clone(),
            max_tokens: config.max_tokens_worker,
            options,
        }
    }

    /// Dispatch every profile and wait for all of them.
    ///
    /// Fails before spawning anything with [`OrchestrationError::EmptyProfileSet`]
    /// when no profile has context, [`OrchestrationError::DuplicateProfile`] on a
    /// repeated identity, or [`OrchestrationError::MissingInstruction`] if a
    /// profile has no instruction. Individual worker failures never fail the dispatch.
    #[instrument(skip_all, fields(profiles = profiles.len(), mode = ?mode))]
    pub async fn dispatch(
        &self,
        profiles: Vec<WorkerProfile>,
        instructions: &[Instruction],
        mode: EvidenceMode,
    ) -> OrchestrationResult<Vec<WorkerResult>> {
        check_profiles(&profiles)?;

        let by_identity: HashMap<&str, &str> = instructions
            .iter()
            .map(|i| (i.profile_identity.as_str(), i.text.as_str()))
            .collect();
        if let Some(orphan) = profiles
            .iter()
            .find(|p| !by_identity.contains_key(p.identity()))
        {
            return Err(OrchestrationError::MissingInstruction {
                identity: orphan.identity().to_string(),
            });
        }

        let run_token = self.options.cancellation.child_token();
        let sem = self
            .options
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n)));

        let watchdog = self.options.run_deadline.map(|deadline| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "run deadline exceeded; cancelling outstanding workers"
                );
                token.cancel();
            })
        });

        let mut tasks: Vec<(String, JoinHandle<Result<String, WorkerFailure>>)> = Vec::new();

        for profile in profiles {
            let identity = profile.identity().to_string();
            let instruction = by_identity[identity.as_str()];
            let request =
                build_worker_request(&self.model, self.max_tokens, profile, instruction, mode);

            let service = Arc::clone(&self.service);
            let sem = sem.clone();
            let token = run_token.clone();
            let timeout = self.options.worker_timeout;
            let span = tracing::info_span!("fanfold.worker", profile = %identity);
            let task_identity = identity.clone();

            let task = tokio::spawn(
                async move {
                    let started = Instant::now();
                    METRICS.inc_worker_calls();
                    let outcome = run_worker(service, request, timeout, sem, token).await;
                    emit_worker_finished(
                        &task_identity,
                        outcome.is_ok(),
                        started.elapsed().as_millis() as u64,
                    );
                    outcome
                }
                .instrument(span),
            );

            tasks.push((identity, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (identity, task) in tasks {
            let outcome = match task.await {
                Ok(Ok(text)) => WorkerOutcome::Success(text),
                Ok(Err(failure)) => WorkerOutcome::Failure(failure),
                Err(join_err) if join_err.is_panic() => {
                    WorkerOutcome::Failure(WorkerFailure::Panicked(join_err.to_string()))
                }
                Err(_) => WorkerOutcome::Failure(WorkerFailure::Cancelled),
            };
            if let WorkerOutcome::Failure(failure) = &outcome {
                METRICS.inc_worker_failures();
                warn!(profile = %identity, error = %failure, "worker failed");
            }
            results.push(WorkerResult {
                profile_identity: identity,
                outcome,
            });
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        Ok(results)
    }
}

async fn run_worker(
    service: Arc<dyn CompletionService>,
    request: CompletionRequest,
    timeout: Option<Duration>,
    sem: Option<Arc<Semaphore>>,
    token: CancellationToken,
) -> Result<String, WorkerFailure> {
    let work = async move {
        let _permit = match sem {
            Some(sem) => Some(
                sem.acquire_owned()
                    .await
                    .map_err(|_| WorkerFailure::Cancelled)?,
            ),
            None => None,
        };

        let call = service.complete(request);
        let completion = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| WorkerFailure::Timeout(limit))?,
            None => call.await,
        }
        .map_err(|e| WorkerFailure::Service(e.to_string()))?;

        if completion.text.trim().is_empty() {
            return Err(WorkerFailure::EmptyResponse);
        }
        Ok(completion.text)
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(WorkerFailure::Cancelled),
        outcome = work => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ContextPayload;
    use async_trait::async_trait;
    use fanfold_llm::fakes::{ScriptedCompletionService, ScriptedReply};
    use fanfold_llm::{Completion, ImageBlob};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn profile(id: &str, context: &str) -> WorkerProfile {
        WorkerProfile::new(id, format!("{id} reader"), ContextPayload::text(context))
    }

    fn instructions(ids: &[&str]) -> Vec<Instruction> {
        ids.iter()
            .map(|id| Instruction::new(*id, format!("instruction for {id}")))
            .collect()
    }

    fn dispatcher(svc: Arc<dyn CompletionService>, options: DispatchOptions) -> TaskDispatcher {
        TaskDispatcher::new(svc, &OrchestratorConfig::default(), options)
    }

    #[tokio::test]
    async fn test_empty_profile_set_is_rejected() {
        let svc = Arc::new(ScriptedCompletionService::new());
        let result = dispatcher(svc, DispatchOptions::default())
            .dispatch(vec![], &[], EvidenceMode::Tagged)
            .await;
        assert!(matches!(result, Err(OrchestrationError::EmptyProfileSet)));
    }

    #[tokio::test]
    async fn test_profiles_without_any_context_are_rejected() {
        let svc = Arc::new(ScriptedCompletionService::new());
        let result = dispatcher(svc.clone(), DispatchOptions::default())
            .dispatch(
                vec![profile("a", " "), profile("b", "")],
                &instructions(&["a", "b"]),
                EvidenceMode::Tagged,
            )
            .await;
        assert!(matches!(result, Err(OrchestrationError::EmptyProfileSet)));
        assert_eq!(svc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_identity_is_rejected_before_spawning() {
        let svc = Arc::new(ScriptedCompletionService::new().otherwise(ScriptedReply::text("ok")));
        let result = dispatcher(svc.clone(), DispatchOptions::default())
            .dispatch(
                vec![profile("a", "first"), profile("a", "second")],
                &instructions(&["a"]),
                EvidenceMode::Tagged,
            )
            .await;
        match result {
            Err(OrchestrationError::DuplicateProfile { identity }) => assert_eq!(identity, "a"),
            other => panic!("Expected DuplicateProfile, got {:?}", other),
        }
        assert_eq!(svc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_profile_without_instruction_is_rejected() {
        let svc = Arc::new(ScriptedCompletionService::new());
        let result = dispatcher(svc.clone(), DispatchOptions::default())
            .dispatch(
                vec![profile("a", "A"), profile("b", "B")],
                &instructions(&["a"]),
                EvidenceMode::Tagged,
            )
            .await;
        match result {
            Err(OrchestrationError::MissingInstruction { identity }) => assert_eq!(identity, "b"),
            other => panic!("Expected MissingInstruction, got {:?}", other),
        }
        assert_eq!(svc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_worker_sees_only_its_own_context() {
        let svc = Arc::new(ScriptedCompletionService::new().otherwise(ScriptedReply::text("ok")));
        let results = dispatcher(svc.clone(), DispatchOptions::default())
            .dispatch(
                vec![profile("a", "ALPHA-DOC"), profile("b", "BETA-DOC")],
                &instructions(&["a", "b"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        for call in svc.calls() {
            let text = call.text_content();
            assert_eq!(call.model, crate::config::DEFAULT_WORKER_MODEL);
            if text.contains("ALPHA-DOC") {
                assert!(text.contains("instruction for a"));
                assert!(!text.contains("BETA-DOC"));
                assert!(!text.contains("instruction for b"));
            } else {
                assert!(text.contains("BETA-DOC"));
                assert!(!text.contains("instruction for a"));
            }
        }
    }

    #[tokio::test]
    async fn test_structured_mode_appends_record_contract() {
        let svc = Arc::new(ScriptedCompletionService::new().otherwise(ScriptedReply::text("{}")));
        dispatcher(svc.clone(), DispatchOptions::default())
            .dispatch(
                vec![profile("a", "A")],
                &instructions(&["a"]),
                EvidenceMode::Structured,
            )
            .await
            .unwrap();
        let text = svc.calls()[0].text_content();
        assert!(text.contains("key_insights"));
        assert!(text.contains("priority_areas"));
    }

    #[test]
    fn test_image_context_precedes_instruction() {
        let profile = WorkerProfile::new(
            "fy23_q4",
            "reader",
            ContextPayload::Images(vec![ImageBlob::png(vec![1]), ImageBlob::png(vec![2])]),
        );
        let request =
            build_worker_request("w", 100, profile, "Extract revenue", EvidenceMode::Tagged);
        assert_eq!(request.parts.len(), 3);
        assert!(matches!(request.parts[0], ContentPart::Image(_)));
        assert!(matches!(request.parts[1], ContentPart::Image(_)));
        assert_eq!(request.parts[2].as_text(), Some("Extract revenue"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_submission_order_not_completion_order() {
        let svc = Arc::new(
            ScriptedCompletionService::new()
                .when_contains("SLOW", ScriptedReply::text("slow").after(Duration::from_secs(5)))
                .when_contains("FAST", ScriptedReply::text("fast")),
        );
        let results = dispatcher(svc, DispatchOptions::default())
            .dispatch(
                vec![profile("first", "SLOW"), profile("second", "FAST")],
                &instructions(&["first", "second"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert_eq!(results[0], WorkerResult::success("first", "slow"));
        assert_eq!(results[1], WorkerResult::success("second", "fast"));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_profile() {
        let svc = Arc::new(
            ScriptedCompletionService::new()
                .when_contains("BROKEN", ScriptedReply::fail("HTTP 500"))
                .otherwise(ScriptedReply::text("fine")),
        );
        let results = dispatcher(svc, DispatchOptions::default())
            .dispatch(
                vec![profile("a", "A"), profile("b", "BROKEN"), profile("c", "C")],
                &instructions(&["a", "b", "c"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert!(results[0].is_success());
        assert!(matches!(
            &results[1].outcome,
            WorkerOutcome::Failure(WorkerFailure::Service(msg)) if msg.contains("HTTP 500")
        ));
        assert!(results[2].is_success());
    }

    #[tokio::test]
    async fn test_blank_response_is_empty_response_failure() {
        let svc = Arc::new(ScriptedCompletionService::new().otherwise(ScriptedReply::text(" \n")));
        let results = dispatcher(svc, DispatchOptions::default())
            .dispatch(vec![profile("a", "A")], &instructions(&["a"]), EvidenceMode::Tagged)
            .await
            .unwrap();
        assert_eq!(
            results[0].outcome,
            WorkerOutcome::Failure(WorkerFailure::EmptyResponse)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_timeout_is_reported_per_profile() {
        let svc = Arc::new(
            ScriptedCompletionService::new()
                .when_contains("HANG", ScriptedReply::text("never").after(Duration::from_secs(600)))
                .otherwise(ScriptedReply::text("ok")),
        );
        let options = DispatchOptions {
            worker_timeout: Some(Duration::from_secs(10)),
            ..DispatchOptions::default()
        };
        let results = dispatcher(svc, options)
            .dispatch(
                vec![profile("a", "HANG"), profile("b", "B")],
                &instructions(&["a", "b"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert_eq!(
            results[0].outcome,
            WorkerOutcome::Failure(WorkerFailure::Timeout(Duration::from_secs(10)))
        );
        assert!(results[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_cancels_outstanding_workers() {
        let svc = Arc::new(
            ScriptedCompletionService::new()
                .when_contains("HANG", ScriptedReply::text("never").after(Duration::from_secs(600)))
                .otherwise(ScriptedReply::text("ok")),
        );
        let options = DispatchOptions {
            run_deadline: Some(Duration::from_secs(30)),
            ..DispatchOptions::default()
        };
        let results = dispatcher(svc, options)
            .dispatch(
                vec![profile("a", "A"), profile("b", "HANG")],
                &instructions(&["a", "b"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert!(results[0].is_success());
        assert_eq!(
            results[1].outcome,
            WorkerOutcome::Failure(WorkerFailure::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_external_cancellation_before_dispatch() {
        let svc = Arc::new(ScriptedCompletionService::new().otherwise(ScriptedReply::text("ok")));
        let token = CancellationToken::new();
        token.cancel();
        let results = dispatcher(svc, DispatchOptions::default().with_cancellation(token))
            .dispatch(
                vec![profile("a", "A"), profile("b", "B")],
                &instructions(&["a", "b"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert!(results
            .iter()
            .all(|r| r.outcome == WorkerOutcome::Failure(WorkerFailure::Cancelled)));
    }

    /// Tracks the peak number of in-flight calls.
    struct GaugeService {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CompletionService for GaugeService {
        async fn complete(&self, request: CompletionRequest) -> fanfold_llm::Result<Completion> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Completion::new("ok", request.model))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_bounds_in_flight_calls() {
        let svc = Arc::new(GaugeService {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let ids = ["a", "b", "c", "d", "e", "f"];
        let options = DispatchOptions {
            max_concurrent: Some(2),
            ..DispatchOptions::default()
        };
        let results = dispatcher(svc.clone(), options)
            .dispatch(
                ids.iter().map(|id| profile(id, id)).collect(),
                &instructions(&ids),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(WorkerResult::is_success));
        assert!(svc.peak.load(Ordering::SeqCst) <= 2);
    }

    struct PanickingService;

    #[async_trait]
    impl CompletionService for PanickingService {
        async fn complete(&self, request: CompletionRequest) -> fanfold_llm::Result<Completion> {
            if request.text_content().contains("BOOM") {
                panic!("worker exploded");
            }
            Ok(Completion::new("ok", request.model))
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_isolated() {
        let results = dispatcher(Arc::new(PanickingService), DispatchOptions::default())
            .dispatch(
                vec![profile("a", "BOOM"), profile("b", "B")],
                &instructions(&["a", "b"]),
                EvidenceMode::Tagged,
            )
            .await
            .unwrap();
        assert!(matches!(
            results[0].outcome,
            WorkerOutcome::Failure(WorkerFailure::Panicked(_))
        ));
        assert!(results[1].is_success());
    }
}
