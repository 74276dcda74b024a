// src/agents/generator.rs — LLM-backed query generator

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use super::prompt;
use super::QueryGenerator;
use crate::infra::errors::QueryLoopError;
use crate::provider::{ChatProvider, ChatRequest};

static SQL_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"(?is)```sql(.*?)```").expect("sql fence regex")
});

static ANY_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"(?s)```(.*?)```").expect("code fence regex")
});

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: static literal regex pattern; compilation cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)^\s*(here is the sql|here's the sql|sure|the query is|sql)\s*:").expect("prefix regex")
});

/// Extract a bare SQL statement from model output: fenced block first, then
/// the first statement only, then without a conversational lead-in.
pub fn clean_sql_output(text: &str) -> String {
    if text.contains("```") {
        if let Some(caps) = SQL_FENCE_RE.captures(text) {
            return caps[1].trim().to_string();
        }
        if let Some(caps) = ANY_FENCE_RE.captures(text) {
            return caps[1].trim().to_string();
        }
    }

    let mut sql = text.to_string();
    if let Some((first, _)) = sql.split_once(';') {
        sql = format!("{first};");
    }
    PREFIX_RE.replace(&sql, "").trim().to_string()
}

pub struct LlmGenerator {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl QueryGenerator for LlmGenerator {
    async fn generate(
        &self,
        request: &str,
        context: &str,
        guidance: Option<&str>,
    ) -> Result<String, QueryLoopError> {
        let prompt = prompt::render_generator(request, context, guidance)?;
        let chat = ChatRequest::single(&self.model, None, prompt)
            .with_temperature(0.0)
            .with_max_tokens(1024);

        let response = self
            .provider
            .chat(chat)
            .await
            .map_err(|e| QueryLoopError::Generation(e.to_string()))?;

        let sql = clean_sql_output(&response.content);
        tracing::debug!(
            model = %self.model,
            tokens = response.usage.total(),
            retry = guidance.is_some(),
            "Generated candidate: {sql}"
        );
        if sql.is_empty() {
            return Err(QueryLoopError::Generation("model returned no SQL".into()));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatResponse;
    use std::sync::Mutex;

    // ─── clean_sql_output ───────────────────────────────────────

    #[test]
    fn test_clean_sql_fence() {
        let out = clean_sql_output("Here you go:\n```sql\nSELECT 1;\n```\nEnjoy!");
        assert_eq!(out, "SELECT 1;");
    }

    #[test]
    fn test_clean_generic_fence() {
        assert_eq!(clean_sql_output("```\nSELECT a FROM t\n```"), "SELECT a FROM t");
    }

    #[test]
    fn test_clean_first_statement_only() {
        assert_eq!(
            clean_sql_output("SELECT 1; SELECT 2;"),
            "SELECT 1;"
        );
    }

    #[test]
    fn test_clean_conversational_prefix() {
        assert_eq!(clean_sql_output("Sure: SELECT 1"), "SELECT 1");
        assert_eq!(clean_sql_output("Here is the SQL: SELECT 1"), "SELECT 1");
        assert_eq!(clean_sql_output("  SELECT 1  "), "SELECT 1");
    }

    // ─── LlmGenerator ───────────────────────────────────────────

    struct EchoProvider {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn id(&self) -> &str {
            "echo"
        }
        fn name(&self) -> &str {
            "Echo"
        }
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, QueryLoopError> {
            self.prompts
                .lock()
                .unwrap()
                .push(req.messages[0].content.clone());
            Ok(ChatResponse {
                content: self.reply.clone(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_generate_cleans_and_passes_guidance() {
        let provider = Arc::new(EchoProvider {
            reply: "```sql\nSELECT region FROM sales_data\n```".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let g = LlmGenerator::new(provider.clone(), "m");
        let sql = g
            .generate("regions", "CREATE TABLE sales_data (region TEXT);", Some("use region"))
            .await
            .unwrap();
        assert_eq!(sql, "SELECT region FROM sales_data");
        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("use region"));
        assert!(prompts[0].contains("CREATE TABLE sales_data"));
    }

    #[tokio::test]
    async fn test_generate_empty_reply_is_error() {
        let provider = Arc::new(EchoProvider {
            reply: "   ".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let g = LlmGenerator::new(provider, "m");
        let err = g.generate("q", "", None).await.unwrap_err();
        assert!(matches!(err, QueryLoopError::Generation(_)));
    }
}
