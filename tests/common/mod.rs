// tests/common/mod.rs — Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use queryloop::agents::{
    DecisionOracle, ExecutionOutcome, PlanOutcome, QueryGenerator, QueryRows, QueryStore,
    ResponseFormatter, Row,
};
use queryloop::core::types::{ErrorKind, QueryAttempt, RetryDecision};
use queryloop::infra::errors::QueryLoopError;

/// Replays a fixed list of generator replies, then fails.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, QueryLoopError>>>,
    pub calls: AtomicUsize,
    pub guidance: Mutex<Vec<Option<String>>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|s| Ok(s.into())).collect()),
            calls: AtomicUsize::new(0),
            guidance: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_results(replies: Vec<Result<String, QueryLoopError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            guidance: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before every reply.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        _request: &str,
        _context: &str,
        guidance: Option<&str>,
    ) -> Result<String, QueryLoopError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.guidance
            .lock()
            .unwrap()
            .push(guidance.map(str::to_string));
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(QueryLoopError::Generation("script exhausted".into())))
    }
}

/// Plan check fails with a scripted message whenever the candidate contains
/// the key; everything else plans and executes to a single `n = 1` row.
pub struct ScriptedStore {
    plan_failures: Vec<(String, String)>,
    exec_failures: Vec<(String, String)>,
    pub executed: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            plan_failures: Vec::new(),
            exec_failures: Vec::new(),
            executed: AtomicUsize::new(0),
        }
    }

    pub fn plan_fails(mut self, needle: &str, message: &str) -> Self {
        self.plan_failures.push((needle.into(), message.into()));
        self
    }

    pub fn exec_fails(mut self, needle: &str, message: &str) -> Self {
        self.exec_failures.push((needle.into(), message.into()));
        self
    }
}

fn lookup<'a>(table: &'a [(String, String)], query: &str) -> Option<&'a str> {
    table
        .iter()
        .find(|(needle, _)| query.contains(needle.as_str()))
        .map(|(_, msg)| msg.as_str())
}

#[async_trait]
impl QueryStore for ScriptedStore {
    async fn check_plan(&self, query: &str) -> Result<PlanOutcome, QueryLoopError> {
        Ok(match lookup(&self.plan_failures, query) {
            Some(msg) => PlanOutcome::Invalid(msg.into()),
            None => PlanOutcome::Valid,
        })
    }

    async fn execute(&self, query: &str) -> Result<ExecutionOutcome, QueryLoopError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = lookup(&self.exec_failures, query) {
            return Ok(ExecutionOutcome::Failed(msg.into()));
        }
        let mut row = Row::new();
        row.insert("n".into(), json!(1));
        Ok(ExecutionOutcome::Rows(QueryRows {
            columns: vec!["n".into()],
            rows: vec![row],
            truncated: false,
        }))
    }
}

/// Oracle that returns the same decision every time and counts calls.
pub struct FixedOracle {
    pub decision: Result<RetryDecision, String>,
    pub calls: AtomicUsize,
}

impl FixedOracle {
    pub fn answering(decision: RetryDecision) -> Self {
        Self {
            decision: Ok(decision),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            decision: Err(message.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DecisionOracle for FixedOracle {
    async fn decide(
        &self,
        _kind: ErrorKind,
        _raw_message: &str,
        _history: &[QueryAttempt],
    ) -> Result<RetryDecision, QueryLoopError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.decision {
            Ok(d) => Ok(d.clone()),
            Err(msg) => Err(QueryLoopError::collaborator("oracle", msg)),
        }
    }
}

/// Formatter that counts calls and echoes the row count.
#[derive(Default)]
pub struct CountingFormatter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ResponseFormatter for CountingFormatter {
    async fn format_response(
        &self,
        rows: &QueryRows,
        _request: &str,
    ) -> Result<String, QueryLoopError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} row(s)", rows.len()))
    }
}
