//! Provider-agnostic LLM gateway for PhishGuard
//!
//! Wraps any [`LlmTransport`] with the operational concerns every model call
//! shares: a process-wide requests-per-minute throttle, retry with
//! exponential backoff on transient transport errors, structured-output
//! enforcement with a single repair re-prompt, and authoritative token
//! accounting.

pub mod json_repair;
pub mod providers;
pub mod rate;

use phishguard_core::{
    GenerateRequest, GenerateResponse, LlmConfig, LlmTransport, PhishGuardError, Result,
    TokenUsage,
};
use rate::RequestRateLimiter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use providers::OpenAiCompatTransport;

/// Cumulative session usage across all gateway calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayUsage {
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub requests: u64,
}

/// The gateway every pipeline stage calls models through.
pub struct LlmGateway {
    transport: Arc<dyn LlmTransport>,
    limiter: RequestRateLimiter,
    max_retries: u32,
    tokens_input: AtomicU64,
    tokens_output: AtomicU64,
    requests: AtomicU64,
}

impl LlmGateway {
    pub fn new(transport: Arc<dyn LlmTransport>, config: &LlmConfig) -> Self {
        Self {
            transport,
            limiter: RequestRateLimiter::new(config.max_rpm),
            max_retries: config.max_retries.max(1),
            tokens_input: AtomicU64::new(0),
            tokens_output: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    /// Build the gateway with the HTTP transport selected by `config`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let transport = OpenAiCompatTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Issue one model call with retry, throttling, and structured-output
    /// enforcement.
    ///
    /// # Errors
    ///
    /// Returns [`PhishGuardError::FatalProvider`] immediately on
    /// non-recoverable provider errors, [`PhishGuardError::Parse`] when a
    /// structured reply cannot be parsed even after one repair re-prompt,
    /// and the last transport error once all retries are exhausted.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            self.limiter.acquire().await;

            match self.transport.generate(request).await {
                Ok(response) => {
                    self.record_usage(&response.usage);
                    if request.require_structured && response.structured.is_none() {
                        return self.repair_structured(request, response).await;
                    }
                    return Ok(response);
                }
                Err(e) if e.is_fatal() => {
                    warn!(provider = self.transport.name(), error = %e, "fatal provider error");
                    return Err(e);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = backoff_delay(attempt);
                    debug!(
                        provider = self.transport.name(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient llm error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| PhishGuardError::Transport("retries exhausted".to_string())))
    }

    /// One repair re-prompt when the first reply was not parseable JSON.
    /// The lenient parser already ran inside the transport; this is the last
    /// line before a typed parse failure.
    async fn repair_structured(
        &self,
        request: &GenerateRequest,
        first: GenerateResponse,
    ) -> Result<GenerateResponse> {
        warn!(
            provider = self.transport.name(),
            "structured output unparseable, re-prompting once"
        );
        let repair_request = GenerateRequest {
            user_prompt: format!(
                "{}\n\nJawaban sebelumnya bukan JSON valid. Ulangi jawaban sebagai SATU \
                 JSON object valid saja, tanpa markdown dan tanpa teks lain.",
                request.user_prompt
            ),
            ..request.clone()
        };

        self.limiter.acquire().await;
        let mut second = self.transport.generate(&repair_request).await?;
        self.record_usage(&second.usage);

        if second.structured.is_none() {
            second.structured = json_repair::parse_json_object(&second.text);
        }
        if second.structured.is_none() {
            return Err(PhishGuardError::Parse(format!(
                "unparseable structured output after repair: {}",
                second.text.chars().take(120).collect::<String>()
            )));
        }

        // Charge both calls against the reply the caller sees.
        let mut usage = first.usage;
        usage.add(&second.usage);
        second.usage = usage;
        second.latency_ms += first.latency_ms;
        Ok(second)
    }

    fn record_usage(&self, usage: &TokenUsage) {
        self.tokens_input.fetch_add(usage.input, Ordering::Relaxed);
        self.tokens_output.fetch_add(usage.output, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative token and request counters for this gateway's lifetime.
    #[must_use]
    pub fn usage_stats(&self) -> GatewayUsage {
        GatewayUsage {
            tokens_input: self.tokens_input.load(Ordering::Relaxed),
            tokens_output: self.tokens_output.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }

    pub fn reset_usage_stats(&self) {
        self.tokens_input.store(0, Ordering::Relaxed);
        self.tokens_output.store(0, Ordering::Relaxed);
        self.requests.store(0, Ordering::Relaxed);
    }
}

/// Exponential backoff: 2s, 4s, 8s, capped at 10s.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = (1u64 << attempt.min(8)).clamp(2, 10);
    Duration::from_secs(secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
