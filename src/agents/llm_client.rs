// LLM HTTP client (§4.6 transport). Shaped directly after the pack's
// `OpenRouterClient::chat_completion`: a thin `reqwest` wrapper posting a
// chat-completion request with bearer auth and returning token usage plus
// latency alongside the raw text. The concrete provider is an out-of-scope
// external collaborator (§1) — only this call surface is in scope.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::FraudError;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LlmCallOutput {
    pub model: String,
    pub content: String,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
        }
    }

    pub async fn chat_completion(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<LlmCallOutput, FraudError> {
        let Some(api_key) = &self.api_key else {
            return Err(FraudError::TransientIo("no LLM_API_KEY configured".into()));
        };

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system", content: system.to_string() },
                ChatMessage { role: "user", content: user.to_string() },
            ],
            max_tokens,
            temperature,
        };

        let started = Instant::now();
        let resp = self
            .http
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FraudError::TransientIo(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FraudError::TransientIo(format!("llm http status {}", resp.status())));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| FraudError::AgentMalformed(format!("unparsable llm response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FraudError::AgentMalformed("llm returned no choices".into()))?;

        let usage = parsed.usage.unwrap_or_default();

        Ok(LlmCallOutput {
            model: model.to_string(),
            content: choice.message.content,
            usage: LlmUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
