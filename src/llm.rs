//! LLM adapters.
//!
//! The agent only sees the `Llm` trait. The default adapter talks to an
//! OpenAI-compatible chat-completions endpoint; tests use `FakeLlm` with a
//! scripted set of replies.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{debug, info};

pub const API_KEY_ENV_VAR: &str = "TABLETALK_API_KEY";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4";

#[async_trait]
pub trait Llm: Send + Sync {
    /// Adapter label, logged once per generation.
    fn type_name(&self) -> &str;

    /// One completion for a fully rendered prompt.
    async fn call(&self, prompt: &str) -> Result<String>;

    /// Completion with markdown code fences stripped, when present.
    async fn generate_code(&self, prompt: &str) -> Result<String> {
        let raw = self.call(prompt).await?;
        Ok(strip_code_fences(&raw))
    }
}

/// `gpt-…` adapter over the chat-completions API.
pub struct OpenAiLlm {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiLlm {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Built from the environment when no adapter is injected.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV_VAR).map_err(|_| {
            AgentError::InvalidConfiguration(format!(
                "no LLM configured and {} is not set",
                API_KEY_ENV_VAR
            ))
        })?;
        info!("using the default OpenAI adapter from the environment");
        Ok(Self::new(&api_key))
    }
}

#[async_trait]
impl Llm for OpenAiLlm {
    fn type_name(&self) -> &str {
        "openai"
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Llm("no content in LLM response".to_string()))?;
        debug!(bytes = content.len(), "received completion");
        Ok(content.to_string())
    }
}

/// Scripted adapter for tests: returns its replies in order and records
/// every prompt it sees.
pub struct FakeLlm {
    replies: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn new<S: Into<String>>(replies: Vec<S>) -> Self {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Llm for FakeLlm {
    fn type_name(&self) -> &str {
        "fake"
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop())
            .ok_or_else(|| AgentError::Llm("fake adapter ran out of replies".to_string()))
    }
}

/// Strip one markdown code fence when the reply is wrapped in one. The
/// language tag on the opening fence is ignored.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```python\nx = 1\n```"), "x = 1");
        assert_eq!(strip_code_fences("```\nx = 1\n```"), "x = 1");
        assert_eq!(strip_code_fences("x = 1"), "x = 1");
        assert_eq!(strip_code_fences("  x = 1\n"), "x = 1");
    }

    #[tokio::test]
    async fn fake_llm_replays_in_order_and_records_prompts() {
        let llm = FakeLlm::new(vec!["first", "second"]);
        assert_eq!(llm.call("a").await.unwrap(), "first");
        assert_eq!(llm.call("b").await.unwrap(), "second");
        assert!(llm.call("c").await.is_err());
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.prompts()[0], "a");
    }

    #[tokio::test]
    async fn generate_code_strips_fences() {
        let llm = FakeLlm::new(vec!["```python\nresult = 1\n```"]);
        assert_eq!(llm.generate_code("p").await.unwrap(), "result = 1");
    }
}
