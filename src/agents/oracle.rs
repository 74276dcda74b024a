// src/agents/oracle.rs — LLM decision oracle for the retry policy

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

use super::prompt::{self, HistoryLine, OraclePrompt};
use super::DecisionOracle;
use crate::core::types::{ErrorKind, QueryAttempt, RetryDecision, RetryStrategy};
use crate::infra::errors::QueryLoopError;
use crate::provider::{ChatProvider, ChatRequest};

/// Attempts shown to the model.
const HISTORY_WINDOW: usize = 3;

static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"(?s)\{.*\}").expect("json object regex")
});

#[derive(Debug, Deserialize)]
struct RawDecision {
    should_retry: bool,
    #[serde(default = "default_confidence")]
    confidence: f32,
    strategy: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    suggested_fix: String,
}

fn default_confidence() -> f32 {
    0.5
}

/// Accepts the enum names as well as the older snake-case vocabulary.
pub fn parse_strategy(s: &str) -> Option<RetryStrategy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "add_context" | "retry_with_schema" => Some(RetryStrategy::AddContext),
        "simplify" | "retry_simpler" => Some(RetryStrategy::Simplify),
        "correct_specific" | "retry_corrected" => Some(RetryStrategy::CorrectSpecific),
        "abort" => Some(RetryStrategy::Abort),
        _ => None,
    }
}

/// Pull the decision out of a free-form model reply.
pub fn parse_decision(reply: &str) -> Result<RetryDecision, QueryLoopError> {
    let json = JSON_OBJECT_RE
        .find(reply)
        .ok_or_else(|| QueryLoopError::collaborator("oracle", "reply contains no JSON object"))?;
    let raw: RawDecision = serde_json::from_str(json.as_str())
        .map_err(|e| QueryLoopError::collaborator("oracle", format!("malformed decision: {e}")))?;
    let strategy = parse_strategy(&raw.strategy).ok_or_else(|| {
        QueryLoopError::collaborator("oracle", format!("unknown strategy '{}'", raw.strategy))
    })?;

    Ok(RetryDecision {
        should_retry: raw.should_retry,
        strategy,
        confidence: raw.confidence,
        guidance_for_next_attempt: raw.suggested_fix,
        reasoning: raw.reasoning,
        abort_reason: None,
    }
    .normalized())
}

pub struct LlmOracle {
    provider: Arc<dyn ChatProvider>,
    model: String,
    question: String,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            question: String::new(),
        }
    }

    /// The user question, shown to the model for context.
    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn decide(
        &self,
        kind: ErrorKind,
        raw_message: &str,
        history: &[QueryAttempt],
    ) -> Result<RetryDecision, QueryLoopError> {
        let sql = history
            .last()
            .map(|a| a.candidate_query.as_str())
            .unwrap_or_default();
        let lines = history
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .rev()
            .map(|a| HistoryLine {
                number: a.attempt_number,
                kind: a.error_kind.map(|k| k.to_string()).unwrap_or_else(|| "OK".into()),
                message: a
                    .raw_error_message
                    .as_deref()
                    .unwrap_or_default()
                    .chars()
                    .take(120)
                    .collect(),
            })
            .collect();

        let text = prompt::render_oracle(&OraclePrompt {
            question: &self.question,
            retry_count: history.len().saturating_sub(1) as u32,
            sql,
            kind: kind.as_str(),
            message: raw_message,
            history: lines,
        })?;

        let response = self
            .provider
            .chat(ChatRequest::single(&self.model, None, text).with_temperature(0.0))
            .await?;
        let decision = parse_decision(&response.content)?;
        tracing::debug!(
            model = %self.model,
            strategy = %decision.strategy,
            confidence = decision.confidence,
            "Oracle decision"
        );
        Ok(decision)
    }
}
