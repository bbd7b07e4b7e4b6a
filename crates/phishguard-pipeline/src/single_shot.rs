//! Single-shot classifier, stage 2 of the detection pipeline.
//!
//! One low-temperature model call producing a structured verdict plus the
//! routing decision. The classifier is a router, not a final judge: only a
//! high-confidence SAFE verdict finalises here. PHISHING always escalates to
//! the debate, however confident — a confident-but-wrong PHISHING label
//! floods admins with false alerts.

use crate::prompts::{analysis_prompt, MessageContext, SINGLE_SHOT_SYSTEM_PROMPT};
use phishguard_core::{
    CoarseClass, GenerateRequest, Label, Result, SingleShotVerdict, TokenUsage,
};
use phishguard_llm::json_repair::{normalize_confidence, normalize_label};
use phishguard_llm::LlmGateway;
use std::sync::Arc;
use tracing::{debug, warn};

/// SAFE verdicts at or above this confidence finalise without a debate.
const HIGH_CONFIDENCE_SAFE: f64 = 0.90;
/// Below this confidence any verdict escalates.
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.70;
/// With high triage risk, escalate below this confidence.
const MODERATE_CONFIDENCE_THRESHOLD: f64 = 0.80;
/// Triage risk score considered high for routing purposes.
const HIGH_TRIAGE_RISK: u8 = 50;

const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 500;

pub struct SingleShotClassifier {
    gateway: Arc<LlmGateway>,
}

impl SingleShotClassifier {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Classify one message.
    ///
    /// Degrades to a fallback verdict (SUSPICIOUS, forced escalation) on any
    /// recoverable model failure.
    ///
    /// # Errors
    ///
    /// Only fatal provider errors (bad credentials, unknown model) propagate;
    /// silently converting those into fallbacks would poison every result.
    pub async fn classify(&self, ctx: &MessageContext<'_>) -> Result<SingleShotVerdict> {
        let request = GenerateRequest {
            system_prompt: SINGLE_SHOT_SYSTEM_PROMPT.to_string(),
            user_prompt: analysis_prompt(ctx),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            require_structured: true,
        };

        let response = match self.gateway.generate(&request).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "single-shot model call failed, using fallback verdict");
                return Ok(fallback_verdict(ctx.triage.class));
            }
        };

        let Some(structured) = response.structured else {
            // require_structured should guarantee this; a transport that
            // violates it degrades like any other model failure.
            return Ok(fallback_verdict(ctx.triage.class));
        };

        let label = structured["classification"]
            .as_str()
            .and_then(normalize_label)
            .unwrap_or(Label::Suspicious);
        let confidence = normalize_confidence(structured.get("confidence"));
        let reasoning = structured["reasoning"].as_str().unwrap_or("").to_string();
        let risk_factors = structured["risk_factors"]
            .as_array()
            .map(|factors| {
                factors
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let (escalate, escalation_reason) =
            routing_decision(label, confidence, ctx.triage.risk_score);

        debug!(
            %label,
            confidence,
            escalate,
            "single-shot verdict"
        );

        Ok(SingleShotVerdict {
            label,
            confidence,
            reasoning,
            risk_factors,
            escalate,
            escalation_reason,
            usage: response.usage,
            latency_ms: response.latency_ms,
            fallback: false,
        })
    }
}

/// The routing contract: when does a verdict escalate to the debate?
///
/// - PHISHING: always, regardless of confidence.
/// - SUSPICIOUS: always.
/// - SAFE: finalises only at confidence >= 0.90.
/// - Additionally, high triage risk with merely moderate confidence
///   escalates.
#[must_use]
pub fn routing_decision(label: Label, confidence: f64, triage_risk: u8) -> (bool, String) {
    match label {
        Label::Phishing => (
            true,
            format!(
                "PHISHING classification always requires debate verification (confidence {:.0}%)",
                confidence * 100.0
            ),
        ),
        Label::Suspicious => (
            true,
            "SUSPICIOUS classification requires multi-agent verification".to_string(),
        ),
        Label::Safe => {
            if confidence >= HIGH_CONFIDENCE_SAFE {
                (false, String::new())
            } else if confidence < LOW_CONFIDENCE_THRESHOLD {
                (
                    true,
                    format!(
                        "Low confidence ({:.0}%) requires multi-agent verification",
                        confidence * 100.0
                    ),
                )
            } else if triage_risk >= HIGH_TRIAGE_RISK
                && confidence < MODERATE_CONFIDENCE_THRESHOLD
            {
                (
                    true,
                    format!(
                        "High triage risk ({triage_risk}) with moderate confidence ({:.0}%)",
                        confidence * 100.0
                    ),
                )
            } else {
                (
                    true,
                    format!(
                        "SAFE confidence {:.0}% below finalisation threshold",
                        confidence * 100.0
                    ),
                )
            }
        }
    }
}

/// Verdict used when the model call fails: SUSPICIOUS, forced escalation,
/// slightly more confident when triage already saw high risk.
#[must_use]
pub fn fallback_verdict(triage_class: CoarseClass) -> SingleShotVerdict {
    let confidence = if triage_class == CoarseClass::HighRisk {
        0.6
    } else {
        0.5
    };
    SingleShotVerdict {
        label: Label::Suspicious,
        confidence,
        reasoning: "Fallback classification due to model error".to_string(),
        risk_factors: vec!["llm_error".to_string()],
        escalate: true,
        escalation_reason: "Model error - requires multi-agent verification".to_string(),
        usage: TokenUsage::default(),
        latency_ms: 0,
        fallback: true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
