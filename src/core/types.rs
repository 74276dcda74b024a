// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::infra::config::Config;

/// Validation layers in evaluation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationLayer {
    OperationWhitelist,
    Syntax,
    ExecutionPlan,
    Semantic,
}

impl fmt::Display for ValidationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationLayer::OperationWhitelist => "OPERATION_WHITELIST",
            ValidationLayer::Syntax => "SYNTAX",
            ValidationLayer::ExecutionPlan => "EXECUTION_PLAN",
            ValidationLayer::Semantic => "SEMANTIC",
        };
        f.write_str(s)
    }
}

/// Outcome of running the validation layers against one candidate.
///
/// `failing_layer` is `Some` exactly when `passed` is false; use the
/// constructors to keep that invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub passed: bool,
    pub failing_layer: Option<ValidationLayer>,
    pub message: String,
}

impl ValidationResult {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            failing_layer: None,
            message: message.into(),
        }
    }

    pub fn fail(layer: ValidationLayer, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            failing_layer: Some(layer),
            message: message.into(),
        }
    }
}

/// Stable vocabulary for failures, produced by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SecurityViolation,
    UnknownIdentifier,
    SyntaxError,
    TypeMismatch,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Security violations are the only kind that is never retried.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::SecurityViolation)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SecurityViolation => "SECURITY_VIOLATION",
            ErrorKind::UnknownIdentifier => "UNKNOWN_IDENTIFIER",
            ErrorKind::SyntaxError => "SYNTAX_ERROR",
            ErrorKind::TypeMismatch => "TYPE_MISMATCH",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
    AddContext,
    Simplify,
    CorrectSpecific,
    Abort,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetryStrategy::AddContext => "ADD_CONTEXT",
            RetryStrategy::Simplify => "SIMPLIFY",
            RetryStrategy::CorrectSpecific => "CORRECT_SPECIFIC",
            RetryStrategy::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// Why a retry decision stopped the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AbortReason {
    SecurityViolation,
    RepeatedError,
    MaxRetries,
    Policy,
}

impl AbortReason {
    pub fn status(self) -> SessionStatus {
        match self {
            AbortReason::SecurityViolation | AbortReason::Policy => SessionStatus::AbortedPolicy,
            AbortReason::RepeatedError => SessionStatus::AbortedRepeatedError,
            AbortReason::MaxRetries => SessionStatus::AbortedMaxRetries,
        }
    }
}

/// Output of the retry policy engine for the latest failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub strategy: RetryStrategy,
    pub confidence: f32,
    pub guidance_for_next_attempt: String,
    pub reasoning: String,
    pub abort_reason: Option<AbortReason>,
}

impl RetryDecision {
    pub fn retry(
        strategy: RetryStrategy,
        confidence: f32,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            should_retry: true,
            strategy,
            confidence,
            guidance_for_next_attempt: String::new(),
            reasoning: reasoning.into(),
            abort_reason: None,
        }
        .normalized()
    }

    pub fn abort(reason: AbortReason, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            strategy: RetryStrategy::Abort,
            confidence,
            guidance_for_next_attempt: String::new(),
            reasoning: reasoning.into(),
            abort_reason: Some(reason),
        }
        .normalized()
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance_for_next_attempt = guidance.into();
        self
    }

    /// Enforce the decision invariants: ABORT never retries, a non-retry is
    /// always ABORT, confidence stays in [0, 1].
    pub fn normalized(mut self) -> Self {
        if self.strategy == RetryStrategy::Abort || !self.should_retry {
            self.should_retry = false;
            self.strategy = RetryStrategy::Abort;
            self.guidance_for_next_attempt.clear();
            if self.abort_reason.is_none() {
                self.abort_reason = Some(AbortReason::Policy);
            }
        } else {
            self.abort_reason = None;
        }
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// One generation/validation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub candidate_query: String,
    /// `None` when generation failed before a candidate existed.
    pub validation_result: Option<ValidationResult>,
    pub error_kind: Option<ErrorKind>,
    pub raw_error_message: Option<String>,
    /// Strategy that produced this attempt's guidance (None for attempt 1).
    pub strategy: Option<RetryStrategy>,
    pub row_count: Option<usize>,
    pub duration: Duration,
}

impl QueryAttempt {
    pub fn failed(&self) -> bool {
        self.error_kind.is_some()
    }

    pub fn failing_layer(&self) -> Option<ValidationLayer> {
        self.validation_result
            .as_ref()
            .and_then(|v| v.failing_layer)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Succeeded,
    AbortedMaxRetries,
    AbortedRepeatedError,
    AbortedPolicy,
    AbortedSafetyNet,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != SessionStatus::InProgress
    }

    pub fn is_aborted(self) -> bool {
        !matches!(self, SessionStatus::InProgress | SessionStatus::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Succeeded => "SUCCEEDED",
            SessionStatus::AbortedMaxRetries => "ABORTED_MAX_RETRIES",
            SessionStatus::AbortedRepeatedError => "ABORTED_REPEATED_ERROR",
            SessionStatus::AbortedPolicy => "ABORTED_POLICY",
            SessionStatus::AbortedSafetyNet => "ABORTED_SAFETY_NET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            SessionStatus::InProgress,
            SessionStatus::Succeeded,
            SessionStatus::AbortedMaxRetries,
            SessionStatus::AbortedRepeatedError,
            SessionStatus::AbortedPolicy,
            SessionStatus::AbortedSafetyNet,
        ]
        .into_iter()
        .find(|st| st.as_str() == s)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stage {
    Intent,
    Generate,
    Validate,
    RetryDecision,
    Execute,
    Respond,
    Abort,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Intent => "intent",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::RetryDecision => "retry_decision",
            Stage::Execute => "execute",
            Stage::Respond => "respond",
            Stage::Abort => "abort",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Complete state of one request. Only the orchestrator mutates it; every
/// other component receives it by shared reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub request: String,
    pub(crate) context: String,
    pub(crate) attempts: Vec<QueryAttempt>,
    pub(crate) status: SessionStatus,
    pub(crate) final_output: Option<String>,
    pub(crate) transitions: u32,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request: request.into(),
            context: String::new(),
            attempts: Vec::new(),
            status: SessionStatus::InProgress,
            final_output: None,
            transitions: 0,
            created_at: Utc::now(),
        }
    }

    pub fn attempts(&self) -> &[QueryAttempt] {
        &self.attempts
    }

    pub fn latest_attempt(&self) -> Option<&QueryAttempt> {
        self.attempts.last()
    }

    /// Always `len(attempts) - 1` (zero before the first attempt).
    pub fn retry_count(&self) -> u32 {
        self.attempts.len().saturating_sub(1) as u32
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    pub(crate) fn record_attempt(&mut self, attempt: QueryAttempt) {
        debug_assert_eq!(attempt.attempt_number as usize, self.attempts.len() + 1);
        self.attempts.push(attempt);
    }

    pub(crate) fn finish(&mut self, status: SessionStatus, output: String) {
        self.status = status;
        self.final_output = Some(output);
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.id.clone(),
            status: self.status,
            final_output: self.final_output.clone().unwrap_or_default(),
            attempts_summary: self.attempts.iter().map(AttemptSummary::from).collect(),
            retry_count: self.retry_count(),
            transitions: self.transitions,
        }
    }
}

/// Condensed attempt record handed back to transport layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptSummary {
    pub attempt_number: u32,
    pub candidate_query: String,
    pub passed: bool,
    pub failing_layer: Option<ValidationLayer>,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
}

impl From<&QueryAttempt> for AttemptSummary {
    fn from(a: &QueryAttempt) -> Self {
        Self {
            attempt_number: a.attempt_number,
            candidate_query: a.candidate_query.clone(),
            passed: !a.failed(),
            failing_layer: a.failing_layer(),
            error_kind: a.error_kind,
            message: a.raw_error_message.clone(),
        }
    }
}

/// What `run_session` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub final_output: String,
    pub attempts_summary: Vec<AttemptSummary>,
    pub retry_count: u32,
    pub transitions: u32,
}

/// Lifecycle notifications for progress renderers.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageEntered {
        stage: Stage,
        attempt: u32,
    },
    AttemptFailed {
        attempt: u32,
        kind: ErrorKind,
        message: String,
    },
    RetryScheduled {
        next_attempt: u32,
        strategy: RetryStrategy,
        confidence: f32,
    },
    SafetyStop {
        message: String,
    },
    Complete {
        status: SessionStatus,
        attempts: u32,
    },
}

/// Timeout applied to each collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTimeouts {
    pub generate: Duration,
    pub context: Duration,
    pub plan: Duration,
    pub execute: Duration,
    pub oracle: Duration,
    pub format: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            generate: Duration::from_secs(60),
            context: Duration::from_secs(10),
            plan: Duration::from_secs(5),
            execute: Duration::from_secs(30),
            oracle: Duration::from_secs(30),
            format: Duration::from_secs(30),
        }
    }
}

/// Runtime configuration for one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub global_iteration_cap: u32,
    pub stuck_prefix_len: usize,
    pub timeouts: StageTimeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            global_iteration_cap: 24,
            stuck_prefix_len: 50,
            timeouts: StageTimeouts::default(),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(cfg: &Config) -> Self {
        let t = &cfg.timeouts;
        Self {
            max_retries: cfg.retry.max_retries,
            global_iteration_cap: cfg.retry.global_iteration_cap,
            stuck_prefix_len: cfg.retry.stuck_prefix_len,
            timeouts: StageTimeouts {
                generate: Duration::from_secs(t.generate_secs),
                context: Duration::from_secs(t.context_secs),
                plan: Duration::from_secs(t.plan_secs),
                execute: Duration::from_secs(t.execute_secs),
                oracle: Duration::from_secs(t.oracle_secs),
                format: Duration::from_secs(t.format_secs),
            },
        }
    }
}
