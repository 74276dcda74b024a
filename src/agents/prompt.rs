// src/agents/prompt.rs — Prompt templates (minijinja)

use std::sync::LazyLock;

use minijinja::{context, Environment};
use serde::Serialize;

use crate::infra::errors::QueryLoopError;

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const ORACLE_TEMPLATE: &str = include_str!("prompts/oracle.md");
const RESPONDER_TEMPLATE: &str = include_str!("prompts/responder.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(build_engine);

// SAFETY: templates are compiled into the binary and covered by tests.
#[allow(clippy::expect_used)]
fn build_engine() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_template("generator", GENERATOR_TEMPLATE)
        .expect("generator template should be valid");
    env.add_template("oracle", ORACLE_TEMPLATE)
        .expect("oracle template should be valid");
    env.add_template("responder", RESPONDER_TEMPLATE)
        .expect("responder template should be valid");
    env
}

/// One line of attempt history shown to the oracle.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryLine {
    pub number: u32,
    pub kind: String,
    pub message: String,
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s.trim()).filter(|s| !s.is_empty())
}

pub fn render_generator(
    question: &str,
    schema: &str,
    guidance: Option<&str>,
) -> Result<String, QueryLoopError> {
    let template = ENGINE.get_template("generator")?;
    Ok(template.render(context! {
        question => question.trim(),
        schema => non_empty(schema),
        guidance => guidance.and_then(non_empty),
    })?)
}

pub struct OraclePrompt<'a> {
    pub question: &'a str,
    pub retry_count: u32,
    pub sql: &'a str,
    pub kind: &'a str,
    pub message: &'a str,
    pub history: Vec<HistoryLine>,
}

pub fn render_oracle(input: &OraclePrompt<'_>) -> Result<String, QueryLoopError> {
    let template = ENGINE.get_template("oracle")?;
    Ok(template.render(context! {
        question => input.question,
        retry_count => input.retry_count,
        sql => input.sql,
        kind => input.kind,
        message => input.message,
        history => input.history,
    })?)
}

pub fn render_responder(
    question: &str,
    data: &str,
    preview_count: usize,
    total_count: usize,
) -> Result<String, QueryLoopError> {
    let template = ENGINE.get_template("responder")?;
    Ok(template.render(context! {
        question => question,
        data => data,
        preview_count => preview_count,
        total_count => total_count,
    })?)
}
