//! OpenAI-compatible chat-completions transport.
//!
//! Both supported providers (DeepSeek and OpenRouter) speak the same wire
//! protocol; only base URL, default model, and throttling temperament
//! differ. Errors are classified so the gateway can distinguish retryable
//! transport failures from fatal misconfiguration.

use async_trait::async_trait;
use phishguard_core::{
    GenerateRequest, GenerateResponse, LlmConfig, LlmProvider, PhishGuardError, Result, TokenUsage,
};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::json_repair::parse_json_object;

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
const DEEPSEEK_MODEL: &str = "deepseek-chat";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_MODEL: &str = "deepseek/deepseek-chat-v3-0324:free";

/// Chat-completions transport for any OpenAI-compatible endpoint.
#[derive(Debug)]
pub struct OpenAiCompatTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider_name: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiCompatTransport {
    /// Build the transport configured by [`LlmConfig`].
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(PhishGuardError::Config(
                "LLM API key must be set".to_string(),
            ));
        }
        let (base_url, model, provider_name) = match config.provider {
            LlmProvider::DeepSeek => (DEEPSEEK_BASE_URL, DEEPSEEK_MODEL, "deepseek"),
            LlmProvider::OpenRouter => (OPENROUTER_BASE_URL, OPENROUTER_MODEL, "openrouter"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PhishGuardError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone().unwrap_or_else(|| model.to_string()),
            provider_name,
        })
    }
}

#[async_trait]
impl phishguard_core::LlmTransport for OpenAiCompatTransport {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let start = Instant::now();

        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.require_structured {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PhishGuardError::Transport("llm request timeout".to_string())
                } else {
                    PhishGuardError::Transport(format!("llm request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => PhishGuardError::RateLimited {
                    retry_after_secs: retry_after,
                },
                401 | 403 | 404 => PhishGuardError::FatalProvider(format!(
                    "{} returned {status}: {text}",
                    self.provider_name
                )),
                _ => PhishGuardError::Transport(format!(
                    "{} returned {status}: {text}",
                    self.provider_name
                )),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PhishGuardError::Transport(format!("llm response body: {e}")))?;

        let text = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let structured = if request.require_structured {
            parse_json_object(&text)
        } else {
            None
        };

        debug!(
            provider = self.provider_name,
            tokens_in = usage.input,
            tokens_out = usage.output,
            "llm call complete"
        );

        Ok(GenerateResponse {
            text,
            structured,
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &'static str {
        self.provider_name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
