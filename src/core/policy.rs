// src/core/policy.rs — Retry policy engine
//
// Decides whether a failed attempt is worth another try and how the next
// candidate should differ. Order of precedence:
//   security abort > stuck-loop abort > oracle (or fallback) > retry clamp

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::classifier::{self, ErrorAnalysis};
use super::types::{
    AbortReason, ErrorKind, QueryAttempt, RetryDecision, RetryStrategy, Session,
};
use crate::agents::DecisionOracle;
use crate::infra::errors::QueryLoopError;

/// Retry count at which the deterministic fallback stops retrying.
const FALLBACK_RETRY_LIMIT: u32 = 2;

pub struct RetryPolicy {
    max_retries: u32,
    stuck_prefix_len: usize,
    oracle: Option<Arc<dyn DecisionOracle>>,
    oracle_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, stuck_prefix_len: usize) -> Self {
        Self {
            max_retries,
            stuck_prefix_len,
            oracle: None,
            oracle_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn DecisionOracle>, timeout: Duration) -> Self {
        self.oracle = Some(oracle);
        self.oracle_timeout = timeout;
        self
    }

    /// Decide on the latest failed attempt of `session`. Never fails: oracle
    /// errors and timeouts fall back to the deterministic rule.
    pub async fn decide(&self, session: &Session) -> RetryDecision {
        let Some(latest) = session.latest_attempt() else {
            return RetryDecision::abort(AbortReason::Policy, 1.0, "no attempt to decide on");
        };
        let kind = latest.error_kind.unwrap_or(ErrorKind::Unknown);
        let message = latest.raw_error_message.as_deref().unwrap_or_default();

        if kind == ErrorKind::SecurityViolation {
            return RetryDecision::abort(
                AbortReason::SecurityViolation,
                1.0,
                "security violations are never retried",
            );
        }

        if self.is_stuck(session.attempts()) {
            return RetryDecision::abort(
                AbortReason::RepeatedError,
                0.9,
                "same error repeated on consecutive attempts",
            );
        }

        let mut decision = match &self.oracle {
            Some(oracle) => self.consult(oracle.as_ref(), kind, message, session).await,
            None => fallback(session.retry_count()),
        };

        if decision.should_retry && session.retry_count() >= self.max_retries {
            decision = RetryDecision::abort(
                AbortReason::MaxRetries,
                1.0,
                format!("retry limit of {} reached", self.max_retries),
            );
        }

        if decision.should_retry {
            let analysis = classifier::analyze(message);
            let guidance = guidance_for(
                decision.strategy,
                message,
                &analysis,
                &decision.guidance_for_next_attempt,
            );
            decision.guidance_for_next_attempt = guidance;
        }
        decision
    }

    async fn consult(
        &self,
        oracle: &dyn DecisionOracle,
        kind: ErrorKind,
        message: &str,
        session: &Session,
    ) -> RetryDecision {
        let call = oracle.decide(kind, message, session.attempts());
        match tokio::time::timeout(self.oracle_timeout, call).await {
            Ok(Ok(decision)) => decision.normalized(),
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session.id, "decision oracle failed, using fallback: {e}");
                fallback(session.retry_count())
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.id,
                    timeout_ms = self.oracle_timeout.as_millis() as u64,
                    "decision oracle timed out, using fallback"
                );
                fallback(session.retry_count())
            }
        }
    }

    /// True when the two most recent error messages share the same prefix.
    pub fn is_stuck(&self, attempts: &[QueryAttempt]) -> bool {
        let [.., prev, latest] = attempts else {
            return false;
        };
        match (&prev.raw_error_message, &latest.raw_error_message) {
            (Some(a), Some(b)) => {
                prefix(a, self.stuck_prefix_len) == prefix(b, self.stuck_prefix_len)
            }
            _ => false,
        }
    }
}

fn prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Deterministic policy used when no oracle is configured or it fails.
pub fn fallback(retry_count: u32) -> RetryDecision {
    if retry_count < FALLBACK_RETRY_LIMIT {
        RetryDecision::retry(RetryStrategy::CorrectSpecific, 0.7, "fixable error, retrying")
    } else {
        RetryDecision::abort(AbortReason::MaxRetries, 1.0, "maximum retries exceeded")
    }
}

/// Instruction block handed to the generator for the next attempt.
pub fn guidance_for(
    strategy: RetryStrategy,
    previous_error: &str,
    analysis: &ErrorAnalysis,
    suggested_fix: &str,
) -> String {
    let (title, steps): (&str, &[&str]) = match strategy {
        RetryStrategy::AddContext => (
            "Schema Clarification",
            &[
                "Carefully review the schema provided",
                "Verify exact column and table names",
                "Use only columns that exist in the schema",
            ],
        ),
        RetryStrategy::Simplify => (
            "Simplify Query",
            &[
                "Remove complex joins or subqueries",
                "Use simpler aggregations",
                "Add a LIMIT clause if missing",
            ],
        ),
        RetryStrategy::CorrectSpecific => (
            "Corrected Approach",
            &[
                "Fix the specific error identified",
                "Double-check syntax",
                "Verify data types match",
            ],
        ),
        RetryStrategy::Abort => return String::new(),
    };

    let mut out = format!("RETRY STRATEGY: {title}\n\nPrevious Error: {previous_error}\n");
    if let Some(entity) = &analysis.entity {
        out.push_str(&format!("Problem Element: {entity}\n"));
    }
    out.push_str("\nAction Required:\n");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {step}\n", i + 1));
    }
    let fix = if suggested_fix.trim().is_empty() {
        analysis.suggestion
    } else {
        suggested_fix.trim()
    };
    out.push_str(&format!("\nSuggested Fix: {fix}\n"));
    out
}

/// Deterministic oracle: a fixed table from error kind to strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleTableOracle;

#[async_trait]
impl DecisionOracle for RuleTableOracle {
    async fn decide(
        &self,
        kind: ErrorKind,
        raw_message: &str,
        history: &[QueryAttempt],
    ) -> Result<RetryDecision, QueryLoopError> {
        let suggestion = classifier::analyze(raw_message).suggestion;
        let decision = match kind {
            ErrorKind::SecurityViolation => {
                RetryDecision::abort(AbortReason::SecurityViolation, 1.0, "security violation")
            }
            ErrorKind::UnknownIdentifier => {
                RetryDecision::retry(RetryStrategy::AddContext, 0.8, "identifier not in schema")
            }
            ErrorKind::Timeout => {
                RetryDecision::retry(RetryStrategy::Simplify, 0.7, "query too expensive")
            }
            ErrorKind::SyntaxError | ErrorKind::TypeMismatch => RetryDecision::retry(
                RetryStrategy::CorrectSpecific,
                0.75,
                "error is local to the query text",
            ),
            ErrorKind::Unknown => {
                // One corrective attempt per session, not per streak.
                let earlier_unknown = history
                    .iter()
                    .rev()
                    .skip(1)
                    .any(|a| a.error_kind == Some(ErrorKind::Unknown));
                if earlier_unknown {
                    RetryDecision::abort(AbortReason::Policy, 0.6, "unrecognised error persists")
                } else {
                    RetryDecision::retry(
                        RetryStrategy::CorrectSpecific,
                        0.5,
                        "unrecognised error, one corrective attempt",
                    )
                }
            }
        };
        Ok(decision.with_guidance(suggestion))
    }
}
