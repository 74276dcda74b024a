// src/agents/responder.rs — Turn result rows into the final answer

use async_trait::async_trait;
use std::sync::Arc;

use super::prompt;
use super::{QueryRows, ResponseFormatter};
use crate::infra::errors::QueryLoopError;
use crate::provider::{ChatProvider, ChatRequest};

/// Rows shown in the plain summary.
const SAMPLE_ROWS: usize = 5;
/// Above this many rows the answer notes that only a sample was inspected.
const LARGE_RESULT: usize = 100;

const NO_DATA: &str = "No data found matching your criteria. This could mean:\n\
• The filters are too restrictive\n\
• The time period has no matching records\n\
• The database holds no data for this question";

fn value_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "NULL".into(),
        other => other.to_string(),
    }
}

/// Deterministic formatter; also the fallback when an LLM formatter fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFormatter;

impl PlainFormatter {
    pub fn render(rows: &QueryRows) -> String {
        if rows.is_empty() {
            return NO_DATA.to_string();
        }
        if let Some(v) = rows.scalar() {
            return format!("The result is: {}", value_text(v));
        }

        let mut out = format!(
            "Query returned {} rows with columns: {}\n\nSample data:\n",
            rows.len(),
            rows.columns.join(", ")
        );
        for (i, row) in rows.rows.iter().take(SAMPLE_ROWS).enumerate() {
            let line = serde_json::to_string(row).unwrap_or_default();
            out.push_str(&format!("{}. {line}\n", i + 1));
        }
        if rows.len() > LARGE_RESULT || rows.truncated {
            out.push_str(&format!(
                "\nNote: showing a sample of {}{} rows.",
                rows.len(),
                if rows.truncated { "+" } else { "" }
            ));
        }
        out.trim_end().to_string()
    }
}

#[async_trait]
impl ResponseFormatter for PlainFormatter {
    async fn format_response(
        &self,
        rows: &QueryRows,
        _request: &str,
    ) -> Result<String, QueryLoopError> {
        Ok(Self::render(rows))
    }
}

/// Narrative answer written by a chat model. Empty results and model
/// failures fall back to [`PlainFormatter`].
pub struct LlmFormatter {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl LlmFormatter {
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ResponseFormatter for LlmFormatter {
    async fn format_response(
        &self,
        rows: &QueryRows,
        request: &str,
    ) -> Result<String, QueryLoopError> {
        if rows.is_empty() {
            return Ok(NO_DATA.to_string());
        }

        let preview_len = if rows.len() > LARGE_RESULT { 10 } else { 20 };
        let preview: Vec<_> = rows.rows.iter().take(preview_len).collect();
        let data = serde_json::to_string_pretty(&preview).unwrap_or_default();
        let text = prompt::render_responder(request, &data, preview.len(), rows.len())?;

        match self
            .provider
            .chat(ChatRequest::single(&self.model, None, text).with_temperature(0.2))
            .await
        {
            Ok(resp) if !resp.content.trim().is_empty() => {
                let mut answer = resp.content.trim().to_string();
                if rows.len() > LARGE_RESULT {
                    answer.push_str(&format!(
                        "\n\nNote: insights drawn from {} total rows.",
                        rows.len()
                    ));
                }
                Ok(answer)
            }
            Ok(_) => Ok(PlainFormatter::render(rows)),
            Err(e) => {
                tracing::warn!("Response generation failed, using plain output: {e}");
                Ok(PlainFormatter::render(rows))
            }
        }
    }
}
