// src/core/orchestrator.rs — Session state machine
//
// INTENT → GENERATE → VALIDATE → {EXECUTE | RETRY_DECISION} → {RESPOND | GENERATE | ABORT} → DONE
//
// The orchestrator is the only writer of `Session`. Every collaborator call
// is bounded by a timeout, and every edge is counted against the global
// iteration cap before it is taken.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::classifier;
use super::policy::RetryPolicy;
use super::safety::{SafetyNet, SafetyStop};
use super::types::*;
use super::validator::Validator;
use crate::agents::responder::PlainFormatter;
use crate::agents::{
    ContextRetriever, DecisionOracle, ExecutionOutcome, QueryGenerator, QueryRows, QueryStore,
    ResponseFormatter,
};
use crate::infra::errors::QueryLoopError;
use crate::memory::store::HistoryStore;

/// Drives one request at a time per call; a single orchestrator may serve
/// many concurrent sessions.
pub struct Orchestrator {
    generator: Arc<dyn QueryGenerator>,
    store: Arc<dyn QueryStore>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    formatter: Arc<dyn ResponseFormatter>,
    validator: Validator,
    policy: RetryPolicy,
    safety: SafetyNet,
    config: OrchestratorConfig,
    /// Optional persistence of finished sessions.
    history: Option<Arc<Mutex<HistoryStore>>>,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

/// Candidate that has been generated but whose outcome is not settled yet.
struct PendingAttempt {
    number: u32,
    candidate: String,
    strategy: Option<RetryStrategy>,
    started: Instant,
    validation: Option<ValidationResult>,
}

struct AbortState {
    status: SessionStatus,
    reason: String,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        store: Arc<dyn QueryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            generator,
            store,
            retriever: None,
            formatter: Arc::new(PlainFormatter),
            validator: Validator::new(config.timeouts.plan),
            policy: RetryPolicy::new(config.max_retries, config.stuck_prefix_len),
            safety: SafetyNet::new(config.max_retries, config.global_iteration_cap),
            config,
            history: None,
            on_progress: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ResponseFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Consult `oracle` before the deterministic fallback.
    pub fn with_oracle(mut self, oracle: Arc<dyn DecisionOracle>) -> Self {
        self.policy = RetryPolicy::new(self.config.max_retries, self.config.stuck_prefix_len)
            .with_oracle(oracle, self.config.timeouts.oracle);
        self
    }

    pub fn with_history(mut self, history: Arc<Mutex<HistoryStore>>) -> Self {
        self.history = Some(history);
        self
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    /// Run one request to a terminal status.
    pub async fn run_session(&self, request: &str) -> SessionReport {
        self.run_session_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`run_session`](Self::run_session), but `cancel` is honoured at
    /// every state boundary.
    pub async fn run_session_with_cancel(
        &self,
        request: &str,
        cancel: &CancellationToken,
    ) -> SessionReport {
        let session = self.drive(request, cancel).await;

        self.emit(ProgressEvent::Complete {
            status: session.status(),
            attempts: session.attempts().len() as u32,
        });
        tracing::info!(
            session_id = %session.id,
            status = %session.status(),
            attempts = session.attempts().len(),
            transitions = session.transitions(),
            "Session finished"
        );
        self.persist(&session);
        session.report()
    }

    async fn drive(&self, request: &str, cancel: &CancellationToken) -> Session {
        let mut session = Session::new(request.trim());
        let mut stage = Stage::Intent;
        let mut pending: Option<PendingAttempt> = None;
        let mut guidance: Option<(RetryStrategy, String)> = None;
        let mut rows: Option<QueryRows> = None;
        let mut abort: Option<AbortState> = None;

        while stage != Stage::Done {
            if cancel.is_cancelled() {
                tracing::info!(session_id = %session.id, %stage, "Session cancelled");
                let output = abort_message("cancelled by caller", &session);
                session.finish(SessionStatus::AbortedPolicy, output);
                return session;
            }

            // Every stage leaves by exactly one edge; if that edge is over the
            // cap, the stage's collaborators are never called.
            if !self.safety.permit_transition(session.transitions) {
                let message = format!(
                    "iteration cap of {} transitions reached",
                    self.safety.global_iteration_cap
                );
                tracing::warn!(session_id = %session.id, %stage, "Safety net: {message}");
                self.emit(ProgressEvent::SafetyStop {
                    message: message.clone(),
                });
                let output = abort_message(&message, &session);
                session.finish(SessionStatus::AbortedSafetyNet, output);
                return session;
            }

            let attempt = session.attempts().len() as u32 + u32::from(pending.is_some());
            tracing::debug!(session_id = %session.id, attempt, %stage, "Entering stage");
            self.emit(ProgressEvent::StageEntered { stage, attempt });

            let next = match stage {
                Stage::Intent => {
                    if session.request.is_empty() {
                        abort = Some(AbortState {
                            status: SessionStatus::AbortedPolicy,
                            reason: "empty request".into(),
                        });
                        Stage::Abort
                    } else {
                        session.context = self.fetch_context(&session.request).await;
                        Stage::Generate
                    }
                }

                Stage::Generate => {
                    let number = session.attempts().len() as u32 + 1;
                    let started = Instant::now();
                    let (strategy, hint) = match guidance.take() {
                        Some((s, g)) => (Some(s), Some(g)),
                        None => (None, None),
                    };
                    let generated = bounded(
                        "generate",
                        self.config.timeouts.generate,
                        self.generator
                            .generate(&session.request, &session.context, hint.as_deref()),
                    )
                    .await;

                    match generated {
                        Ok(candidate) if !candidate.trim().is_empty() => {
                            pending = Some(PendingAttempt {
                                number,
                                candidate: candidate.trim().to_string(),
                                strategy,
                                started,
                                validation: None,
                            });
                            Stage::Validate
                        }
                        outcome => {
                            let (kind, message) = match outcome {
                                Ok(_) => (ErrorKind::Unknown, "generator returned an empty query".to_string()),
                                Err(e) => (failure_kind(&e), e.to_string()),
                            };
                            let failed = PendingAttempt {
                                number,
                                candidate: String::new(),
                                strategy,
                                started,
                                validation: None,
                            };
                            self.settle_failure(&mut session, failed, kind, message);
                            self.after_failure(&session, &mut abort)
                        }
                    }
                }

                Stage::Validate => match pending.take() {
                    Some(mut p) => {
                        let checked = self
                            .validator
                            .validate(&p.candidate, self.store.as_ref())
                            .await;
                        match checked {
                            Ok(v) if v.passed => {
                                p.validation = Some(v);
                                pending = Some(p);
                                Stage::Execute
                            }
                            Ok(v) => {
                                let kind = classifier::classify_validation(&v);
                                let message = v.message.clone();
                                tracing::warn!(
                                    session_id = %session.id,
                                    attempt = p.number,
                                    layer = ?v.failing_layer,
                                    error_kind = %kind,
                                    "Validation failed: {message}"
                                );
                                p.validation = Some(v);
                                self.settle_failure(&mut session, p, kind, message);
                                self.after_failure(&session, &mut abort)
                            }
                            Err(e) => {
                                let message = e.to_string();
                                p.validation = Some(ValidationResult::fail(
                                    ValidationLayer::ExecutionPlan,
                                    message.clone(),
                                ));
                                self.settle_failure(&mut session, p, failure_kind(&e), message);
                                self.after_failure(&session, &mut abort)
                            }
                        }
                    }
                    None => {
                        abort = Some(AbortState {
                            status: SessionStatus::AbortedPolicy,
                            reason: "no candidate to validate".into(),
                        });
                        Stage::Abort
                    }
                },

                Stage::Execute => match pending.take() {
                    Some(p) => {
                        let executed = bounded(
                            "execute",
                            self.config.timeouts.execute,
                            self.store.execute(&p.candidate),
                        )
                        .await;
                        match executed {
                            Ok(ExecutionOutcome::Rows(result)) => {
                                self.settle_success(&mut session, p, result.len());
                                rows = Some(result);
                                Stage::Respond
                            }
                            Ok(ExecutionOutcome::Failed(message)) => {
                                let kind = classifier::classify(&message);
                                tracing::warn!(
                                    session_id = %session.id,
                                    attempt = p.number,
                                    error_kind = %kind,
                                    "Execution failed: {message}"
                                );
                                self.settle_failure(&mut session, p, kind, message);
                                self.after_failure(&session, &mut abort)
                            }
                            Err(e) => {
                                let message = e.to_string();
                                self.settle_failure(&mut session, p, failure_kind(&e), message);
                                self.after_failure(&session, &mut abort)
                            }
                        }
                    }
                    None => {
                        abort = Some(AbortState {
                            status: SessionStatus::AbortedPolicy,
                            reason: "no validated candidate to execute".into(),
                        });
                        Stage::Abort
                    }
                },

                Stage::RetryDecision => {
                    let decision = self.policy.decide(&session).await;
                    tracing::info!(
                        session_id = %session.id,
                        attempt = session.attempts().len(),
                        strategy = %decision.strategy,
                        confidence = decision.confidence,
                        "Retry decision: {}",
                        decision.reasoning
                    );
                    if decision.should_retry {
                        if decision.strategy == RetryStrategy::AddContext {
                            self.widen_context(&mut session).await;
                        }
                        self.emit(ProgressEvent::RetryScheduled {
                            next_attempt: session.attempts().len() as u32 + 1,
                            strategy: decision.strategy,
                            confidence: decision.confidence,
                        });
                        guidance = Some((decision.strategy, decision.guidance_for_next_attempt));
                        Stage::Generate
                    } else {
                        let reason = decision.abort_reason.unwrap_or(AbortReason::Policy);
                        abort = Some(AbortState {
                            status: reason.status(),
                            reason: abort_reason_text(reason, &decision.reasoning),
                        });
                        Stage::Abort
                    }
                }

                Stage::Respond => {
                    let result = rows.take().unwrap_or_default();
                    let output = self.format(&session, &result).await;
                    session.finish(SessionStatus::Succeeded, output);
                    Stage::Done
                }

                Stage::Abort => {
                    let state = abort.take().unwrap_or(AbortState {
                        status: SessionStatus::AbortedPolicy,
                        reason: "aborted".into(),
                    });
                    let output = abort_message(&state.reason, &session);
                    session.finish(state.status, output);
                    Stage::Done
                }

                Stage::Done => Stage::Done,
            };

            session.transitions += 1;
            stage = next;
        }

        session
    }

    /// Safety-net gate between a failure and the retry policy.
    fn after_failure(&self, session: &Session, abort: &mut Option<AbortState>) -> Stage {
        let Some(stop) = self.safety.check(session, session.transitions) else {
            return Stage::RetryDecision;
        };
        let security = session
            .latest_attempt()
            .and_then(|a| a.error_kind)
            .is_some_and(|k| k == ErrorKind::SecurityViolation);

        let state = match stop {
            SafetyStop::IterationCapReached => AbortState {
                status: SessionStatus::AbortedSafetyNet,
                reason: "safety limit reached".into(),
            },
            SafetyStop::RetryCapReached if security => AbortState {
                status: SessionStatus::AbortedPolicy,
                reason: "security violation".into(),
            },
            SafetyStop::RetryCapReached => AbortState {
                status: SessionStatus::AbortedMaxRetries,
                reason: format!("maximum retries ({}) reached", self.safety.max_retries),
            },
        };
        tracing::warn!(session_id = %session.id, ?stop, "Safety net denied another attempt");
        self.emit(ProgressEvent::SafetyStop {
            message: state.reason.clone(),
        });
        *abort = Some(state);
        Stage::Abort
    }

    fn settle_failure(
        &self,
        session: &mut Session,
        p: PendingAttempt,
        kind: ErrorKind,
        message: String,
    ) {
        self.emit(ProgressEvent::AttemptFailed {
            attempt: p.number,
            kind,
            message: message.clone(),
        });
        session.record_attempt(QueryAttempt {
            attempt_number: p.number,
            candidate_query: p.candidate,
            validation_result: p.validation,
            error_kind: Some(kind),
            raw_error_message: Some(message),
            strategy: p.strategy,
            row_count: None,
            duration: p.started.elapsed(),
        });
    }

    fn settle_success(&self, session: &mut Session, p: PendingAttempt, row_count: usize) {
        session.record_attempt(QueryAttempt {
            attempt_number: p.number,
            candidate_query: p.candidate,
            validation_result: p.validation,
            error_kind: None,
            raw_error_message: None,
            strategy: p.strategy,
            row_count: Some(row_count),
            duration: p.started.elapsed(),
        });
    }

    /// Best effort; an unavailable retriever yields empty context.
    async fn fetch_context(&self, query: &str) -> String {
        let Some(ref retriever) = self.retriever else {
            return String::new();
        };
        match bounded(
            "context",
            self.config.timeouts.context,
            retriever.get_context(query),
        )
        .await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::debug!("Context retrieval failed: {e}");
                String::new()
            }
        }
    }

    /// ADD_CONTEXT: look the schema up again, steered by the last error.
    async fn widen_context(&self, session: &mut Session) {
        let error = session
            .latest_attempt()
            .and_then(|a| a.raw_error_message.clone())
            .unwrap_or_default();
        let widened = self
            .fetch_context(&format!("{}\n{}", session.request, error))
            .await;
        if !widened.is_empty() {
            session.context = widened;
        }
    }

    async fn format(&self, session: &Session, rows: &QueryRows) -> String {
        let formatted = bounded(
            "format",
            self.config.timeouts.format,
            self.formatter.format_response(rows, &session.request),
        )
        .await;
        match formatted {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => PlainFormatter::render(rows),
            Err(e) => {
                tracing::warn!(session_id = %session.id, "Formatter failed, using plain output: {e}");
                PlainFormatter::render(rows)
            }
        }
    }

    /// Persist a finished session. Non-fatal on error.
    fn persist(&self, session: &Session) {
        let Some(ref history) = self.history else { return };
        let Ok(store) = history.lock() else {
            tracing::warn!(session_id = %session.id, "History store lock poisoned, session not recorded");
            return;
        };
        if let Err(e) = store.record_session(session) {
            tracing::warn!(session_id = %session.id, "Failed to record session history: {e}");
        }
    }
}

async fn bounded<T>(
    stage: &str,
    limit: Duration,
    call: impl Future<Output = Result<T, QueryLoopError>>,
) -> Result<T, QueryLoopError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| QueryLoopError::Timeout {
            stage: stage.into(),
            timeout_ms: limit.as_millis() as u64,
        })?
}

/// Collaborator errors become synthetic classifications.
fn failure_kind(err: &QueryLoopError) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    }
}

fn abort_reason_text(reason: AbortReason, reasoning: &str) -> String {
    match reason {
        AbortReason::SecurityViolation => "security violation".into(),
        AbortReason::RepeatedError => "the same error repeated".into(),
        AbortReason::MaxRetries => "maximum retries reached".into(),
        AbortReason::Policy if reasoning.is_empty() => "retry policy declined".into(),
        AbortReason::Policy => format!("retry policy declined ({reasoning})"),
    }
}

fn abort_message(reason: &str, session: &Session) -> String {
    match session
        .latest_attempt()
        .and_then(|a| a.raw_error_message.as_deref())
    {
        Some(last) => format!("Unable to answer: {reason}. Last error: {last}"),
        None => format!("Unable to answer: {reason}."),
    }
}
