//! LLM client abstraction and the OpenRouter-backed implementation.
//!
//! The `LlmClient` trait is the seam between orchestration logic and the
//! network. Tests substitute `MockLlmClient` instead of monkeypatching a
//! process-wide singleton, so every component takes the client as an
//! injected dependency.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure: connection, timeout, or non-2xx status.
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The API answered but carried no choices.
    #[error("llm returned no choices")]
    EmptyResponse,
    /// JSON mode produced output that could not be parsed at all.
    #[error("llm returned unparsable JSON: {raw}")]
    MalformedJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait LlmClient: Send + Sync {
    /// Free-text completion.
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// Completion expecting a JSON object in the response body. Transport
    /// failures and malformed output surface as distinguishable errors.
    async fn complete_json(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Value, LlmError>;
}

/// Chat-completions client for OpenRouter (or any OpenAI-compatible API).
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "llm completion request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        let answer = resp
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?
            .message
            .content;
        Ok(answer)
    }

    async fn complete_json(
        &self,
        prompt: &str,
        system_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Value, LlmError> {
        let text = self
            .complete(prompt, system_prompt, temperature, max_tokens)
            .await?;
        let stripped = strip_code_fences(&text);
        serde_json::from_str(stripped).map_err(|source| LlmError::MalformedJson {
            raw: text.clone(),
            source,
        })
    }
}

/// Models often wrap JSON in a markdown code block despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }
    trimmed.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fences() {
        let fenced = "```json\n{\"ok\": true}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"ok\": true}");
    }

    #[test]
    fn strips_bare_code_fences() {
        let fenced = "```\n{\"ok\": true}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"ok\": true}");
    }

    #[test]
    fn leaves_plain_json_untouched() {
        assert_eq!(strip_code_fences(" {\"ok\": true} "), "{\"ok\": true}");
    }
}
