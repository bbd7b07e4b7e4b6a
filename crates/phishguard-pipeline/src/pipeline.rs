//! The three-stage detection pipeline.
//!
//! Stage 1 (triage) is deterministic and free; a SAFE triage terminates the
//! pipeline with no model call. Stage 2 (single-shot) is one model call that
//! either finalises a confident SAFE or routes onward. Stage 3 (debate) is
//! the only stage that may confirm PHISHING or SUSPICIOUS.
//!
//! The pipeline accepts pre-computed URL checks from the chat adapter and
//! does not re-check them; when absent it runs the checker itself before
//! triage. Persistence is fire-and-forget: a slow sink never delays the
//! returned result.

use crate::orchestrator::DebateOrchestrator;
use crate::prompts::{DebateContext, MessageContext};
use crate::single_shot::SingleShotClassifier;
use chrono::Utc;
use phishguard_core::{
    Action, BaselineSnapshot, ChatMessage, DebateRecord, DetectionResult, DetectionSink,
    DetectionTrace, Label, PipelineConfig, Result, SenderProfile, SingleShotVerdict, Stage,
    TokenUsage, TriageReport, UrlCheckResult,
};
use phishguard_detection::{TriageEngine, UrlExtractor, UrlSecurityChecker};
use phishguard_llm::LlmGateway;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// SUSPICIOUS at or above this confidence warns users; below it, the message
/// is flagged for admin review instead.
const WARN_CONFIDENCE_THRESHOLD: f64 = 0.60;

pub struct DetectionPipeline {
    triage: TriageEngine,
    checker: Arc<UrlSecurityChecker>,
    single_shot: SingleShotClassifier,
    orchestrator: DebateOrchestrator,
    extractor: UrlExtractor,
    sink: Option<Arc<dyn DetectionSink>>,
}

impl std::fmt::Debug for DetectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionPipeline").finish_non_exhaustive()
    }
}

impl DetectionPipeline {
    /// Build the pipeline. Configuration validation failure is the only
    /// fatal construction error.
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<LlmGateway>,
        checker: Arc<UrlSecurityChecker>,
    ) -> Result<Self> {
        config.validate()?;
        let sequential = config.llm.debate_is_sequential();
        Ok(Self {
            triage: TriageEngine::new(config.triage.clone()),
            checker,
            single_shot: SingleShotClassifier::new(gateway.clone()),
            orchestrator: DebateOrchestrator::new(config.mad.clone(), gateway, sequential),
            extractor: UrlExtractor::new(),
            sink: None,
        })
    }

    /// Attach a persistence collaborator. Writes are best-effort and never
    /// block [`DetectionPipeline::analyze`].
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DetectionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Analyze one message and return exactly one detection result.
    ///
    /// `precomputed` carries URL check results the adapter already ran
    /// (recommended, since checks are slow); when absent the pipeline runs
    /// the checker itself.
    ///
    /// # Errors
    ///
    /// Only fatal provider errors (effectively configuration failures
    /// surfacing at first use) propagate; every recoverable failure degrades
    /// into the result's trace.
    pub async fn analyze(
        &self,
        message: &ChatMessage,
        sender: &SenderProfile,
        baseline: Option<&BaselineSnapshot>,
        precomputed: Option<&HashMap<String, UrlCheckResult>>,
    ) -> Result<DetectionResult> {
        let started = Instant::now();
        let urls = self.extractor.extract_urls(&message.text);

        let computed;
        let url_checks: &HashMap<String, UrlCheckResult> = match precomputed {
            Some(map) => map,
            None => {
                computed = if urls.is_empty() {
                    HashMap::new()
                } else {
                    self.checker.check_urls(&urls).await
                };
                &computed
            }
        };

        // Stage 1: rule-based triage.
        let triage = self
            .triage
            .analyze(&message.text, message.sent_at, baseline, url_checks);
        if triage.skip_llm {
            return Ok(self.finalize(
                message,
                Label::Safe,
                1.0,
                Stage::Triage,
                triage,
                None,
                None,
                TokenUsage::default(),
                started,
            ));
        }

        // Stage 2: single-shot classification.
        let ctx = MessageContext {
            message,
            sender,
            baseline,
            triage: &triage,
            url_checks,
        };
        let verdict = self.single_shot.classify(&ctx).await?;
        let mut usage = verdict.usage;

        if !verdict.escalate {
            let (label, confidence) = (verdict.label, verdict.confidence);
            return Ok(self.finalize(
                message,
                label,
                confidence,
                Stage::SingleShot,
                triage,
                Some(verdict),
                None,
                usage,
                started,
            ));
        }

        // Stage 3: multi-agent debate — the only stage that may confirm
        // PHISHING or SUSPICIOUS.
        let debate_ctx = DebateContext {
            message: ctx,
            single_shot: &verdict,
        };
        let debate = self.orchestrator.run(&debate_ctx).await?;
        usage.add(&debate.usage);

        let label = debate.decision.to_label();
        let confidence = debate.confidence;
        Ok(self.finalize(
            message,
            label,
            confidence,
            Stage::Mad,
            triage,
            Some(verdict),
            Some(debate),
            usage,
            started,
        ))
    }

    /// Convenience entry point: classify bare text with no sender context.
    pub async fn quick_check(&self, text: &str) -> Result<(Label, Action)> {
        let message = ChatMessage::new("quick-check", text, Utc::now(), "unknown");
        let sender = SenderProfile::new("unknown");
        let result = self.analyze(&message, &sender, None, None).await?;
        Ok((result.label, result.action))
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        message: &ChatMessage,
        label: Label,
        confidence: f64,
        stage: Stage,
        triage: TriageReport,
        single_shot: Option<SingleShotVerdict>,
        debate: Option<DebateRecord>,
        usage: TokenUsage,
        started: Instant,
    ) -> DetectionResult {
        let action = select_action(label, confidence);
        let result = DetectionResult {
            id: Uuid::new_v4(),
            message_id: message.id.clone(),
            label,
            confidence,
            stage,
            action,
            usage,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            trace: DetectionTrace {
                triage,
                single_shot,
                debate,
            },
        };

        info!(
            message_id = %result.message_id,
            %label,
            confidence,
            %stage,
            ?action,
            tokens = result.usage.total(),
            duration_ms = result.duration_ms,
            "detection complete"
        );

        self.dispatch_to_sink(&result);
        result
    }

    fn dispatch_to_sink(&self, result: &DetectionResult) {
        let Some(sink) = &self.sink else {
            return;
        };
        let sink = sink.clone();
        let result = result.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.persist_result(&result).await {
                warn!(message_id = %result.message_id, error = %e, "failed to persist result");
            }
            let requests = llm_request_count(&result);
            if let Err(e) = sink
                .accumulate_usage(
                    result.timestamp.date_naive(),
                    result.stage,
                    result.usage,
                    requests,
                )
                .await
            {
                warn!(error = %e, "failed to accumulate usage");
            }
        });
    }
}

/// Map the final label and confidence to an operational action.
///
/// SAFE never acts; PHISHING is always flagged for review regardless of
/// confidence (the bot never deletes); SUSPICIOUS warns when confident
/// enough, otherwise it is flagged.
#[must_use]
pub fn select_action(label: Label, confidence: f64) -> Action {
    match label {
        Label::Safe => Action::None,
        Label::Phishing => Action::FlagReview,
        Label::Suspicious => {
            if confidence >= WARN_CONFIDENCE_THRESHOLD {
                Action::Warn
            } else {
                Action::FlagReview
            }
        }
    }
}

/// Number of model calls reflected in a result, for usage accounting.
fn llm_request_count(result: &DetectionResult) -> u32 {
    let single_shot = match &result.trace.single_shot {
        Some(verdict) if !verdict.fallback => 1,
        _ => 0,
    };
    let debate = result
        .trace
        .debate
        .as_ref()
        .map(|d| d.rounds.iter().map(Vec::len).sum::<usize>())
        .unwrap_or(0);
    single_shot + debate as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use phishguard_core::{
        Expansion, GenerateRequest, GenerateResponse, LlmConfig, LlmTransport, PhishGuardError,
        RedirectResolver, UrlCheckerConfig,
    };
    use phishguard_detection::TrustedDomains;
    use std::time::Duration;

    struct PanickingTransport;

    #[async_trait]
    impl LlmTransport for PanickingTransport {
        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> phishguard_core::Result<GenerateResponse> {
            panic!("triage-terminated messages must not reach the model");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct NoopResolver;

    #[async_trait]
    impl RedirectResolver for NoopResolver {
        async fn resolve(
            &self,
            url: &str,
            _max_redirects: u32,
            _timeout: Duration,
        ) -> phishguard_core::Result<Expansion> {
            Ok(Expansion {
                final_url: url.to_string(),
                chain: Vec::new(),
            })
        }
    }

    fn pipeline_with_transport(transport: Arc<dyn LlmTransport>) -> DetectionPipeline {
        let llm_config = LlmConfig {
            api_key: "test".to_string(),
            max_rpm: 0,
            max_retries: 1,
            ..LlmConfig::default()
        };
        let gateway = Arc::new(LlmGateway::new(transport, &llm_config));
        let checker = Arc::new(UrlSecurityChecker::new(
            UrlCheckerConfig::default(),
            TrustedDomains::new(),
            Arc::new(NoopResolver),
            None,
        ));
        DetectionPipeline::new(PipelineConfig::default(), gateway, checker).unwrap()
    }

    #[test]
    fn action_mapping_matches_policy() {
        assert_eq!(select_action(Label::Safe, 1.0), Action::None);
        assert_eq!(select_action(Label::Safe, 0.5), Action::None);
        assert_eq!(select_action(Label::Phishing, 0.99), Action::FlagReview);
        assert_eq!(select_action(Label::Phishing, 0.51), Action::FlagReview);
        assert_eq!(select_action(Label::Suspicious, 0.60), Action::Warn);
        assert_eq!(select_action(Label::Suspicious, 0.59), Action::FlagReview);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = PipelineConfig::default();
        config.mad.max_rounds = 0;

        let llm_config = LlmConfig {
            api_key: "test".to_string(),
            ..LlmConfig::default()
        };
        let gateway = Arc::new(LlmGateway::new(Arc::new(PanickingTransport), &llm_config));
        let checker = Arc::new(UrlSecurityChecker::new(
            UrlCheckerConfig::default(),
            TrustedDomains::new(),
            Arc::new(NoopResolver),
            None,
        ));
        let err = DetectionPipeline::new(config, gateway, checker).unwrap_err();
        assert!(matches!(err, PhishGuardError::Config(_)));
    }

    #[tokio::test]
    async fn triage_terminated_message_issues_no_model_call() {
        let pipeline = pipeline_with_transport(Arc::new(PanickingTransport));
        let message = ChatMessage::new(
            "m1",
            "Jangan lupa deadline besok",
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
            "u1",
        );
        let sender = SenderProfile::new("u1");

        let result = pipeline.analyze(&message, &sender, None, None).await.unwrap();
        assert_eq!(result.label, Label::Safe);
        assert_eq!(result.stage, Stage::Triage);
        assert_eq!(result.action, Action::None);
        assert_eq!(result.usage.total(), 0);
        assert_eq!(result.confidence, 1.0);
        assert!(result.trace.single_shot.is_none());
        assert!(result.trace.debate.is_none());
    }

    #[tokio::test]
    async fn trusted_url_message_terminates_in_triage() {
        let pipeline = pipeline_with_transport(Arc::new(PanickingTransport));
        let message = ChatMessage::new(
            "m2",
            "Materi di classroom.google.com/c/abc",
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
            "u1",
        );
        let sender = SenderProfile::new("u1");

        let result = pipeline.analyze(&message, &sender, None, None).await.unwrap();
        assert_eq!(result.label, Label::Safe);
        assert_eq!(result.stage, Stage::Triage);
        assert_eq!(result.usage.total(), 0);
    }

    #[test]
    fn request_count_skips_fallback_verdicts() {
        let result = DetectionResult {
            id: Uuid::new_v4(),
            message_id: "m".to_string(),
            label: Label::Suspicious,
            confidence: 0.5,
            stage: Stage::Mad,
            action: Action::FlagReview,
            usage: TokenUsage::default(),
            duration_ms: 0,
            timestamp: Utc::now(),
            trace: DetectionTrace {
                triage: TriageReport::safe(),
                single_shot: Some(crate::single_shot::fallback_verdict(
                    phishguard_core::CoarseClass::HighRisk,
                )),
                debate: None,
            },
        };
        assert_eq!(llm_request_count(&result), 0);
    }
}
