// src/provider/openai_compat.rs — Generic OpenAI-compatible provider
//
// Works against OpenAI itself and any server exposing `/chat/completions`
// (Ollama, vLLM, Groq, OpenRouter, ...).

use async_trait::async_trait;
use std::time::Duration;

use super::{ChatProvider, ChatRequest, ChatResponse, TokenUsage};
use crate::infra::errors::QueryLoopError;

/// Per-request HTTP timeout. Stage timeouts in the orchestrator are tighter
/// or equal in normal configurations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAICompatProvider {
    id_str: String,
    name_str: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id_str: id.into(),
            name_str: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &ChatRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            messages.push(serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            }));
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }

    fn parse_response(resp: &serde_json::Value) -> ChatResponse {
        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };
        ChatResponse { content, usage }
    }
}

/// Map an HTTP failure status onto a provider error.
fn status_error(provider: &str, status: reqwest::StatusCode, body: String, retry_after_ms: u64) -> QueryLoopError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return QueryLoopError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms,
        };
    }
    QueryLoopError::Provider {
        provider: provider.to_string(),
        message: format!("HTTP {status}: {body}"),
        retriable: status.is_server_error(),
    }
}

#[async_trait]
impl ChatProvider for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id_str
    }

    fn name(&self) -> &str {
        &self.name_str
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, QueryLoopError> {
        let body = Self::request_body(&request);

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "User-Agent",
                format!("queryloop/{}", env!("CARGO_PKG_VERSION")),
            )
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| QueryLoopError::Provider {
            provider: self.id_str.clone(),
            message: e.to_string(),
            retriable: e.is_timeout() || e.is_connect(),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(0);
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(&self.id_str, status, error_body, retry_after_ms));
        }

        let resp: serde_json::Value =
            response.json().await.map_err(|e| QueryLoopError::Provider {
                provider: self.id_str.clone(),
                message: e.to_string(),
                retriable: false,
            })?;

        Ok(Self::parse_response(&resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use serde_json::json;

    #[test]
    fn test_request_body_includes_system_first() {
        let mut req = ChatRequest::single("gpt-4o-mini", Some("sys".into()), "question")
            .with_temperature(0.0);
        req.messages.push(Message::assistant("prior"));
        let body = OpenAICompatProvider::request_body(&req);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "question");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["temperature"], json!(0.0));
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_response() {
        let resp = json!({
            "choices": [{"message": {"content": "SELECT 1"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed = OpenAICompatProvider::parse_response(&resp);
        assert_eq!(parsed.content, "SELECT 1");
        assert_eq!(parsed.usage.total(), 15);
    }

    #[test]
    fn test_parse_response_missing_fields() {
        let parsed = OpenAICompatProvider::parse_response(&json!({}));
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.usage.total(), 0);
    }

    #[test]
    fn test_status_errors() {
        let e = status_error("p", reqwest::StatusCode::TOO_MANY_REQUESTS, String::new(), 2000);
        assert!(matches!(e, QueryLoopError::RateLimited { retry_after_ms: 2000, .. }));

        let e = status_error("p", reqwest::StatusCode::BAD_GATEWAY, "upstream".into(), 0);
        assert!(e.is_retriable());

        let e = status_error("p", reqwest::StatusCode::UNAUTHORIZED, "bad key".into(), 0);
        assert!(!e.is_retriable());
        assert!(e.to_string().contains("401"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = OpenAICompatProvider::new("local", "Local", None, "http://localhost:11434/v1/");
        assert_eq!(p.base_url, "http://localhost:11434/v1");
        assert_eq!(p.id(), "local");
    }
}
