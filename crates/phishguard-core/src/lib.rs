//! Core types, traits, and errors for PhishGuard
//!
//! This crate contains foundational types shared across all PhishGuard
//! components: the message/sender data model, the result records produced by
//! each detection stage (triage report, single-shot verdict, debate record,
//! final detection result), the configuration surface, and the traits that
//! abstract external collaborators (LLM transport, redirect resolution,
//! reputation lookup, persistence).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Final classification label for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Safe,
    Suspicious,
    Phishing,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Suspicious => write!(f, "SUSPICIOUS"),
            Self::Phishing => write!(f, "PHISHING"),
        }
    }
}

/// Categorical judgment emitted by a debate agent.
///
/// Agents vote `Legitimate` rather than `Safe`; the pipeline normalises the
/// aggregated stance to a [`Label`] at its boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stance {
    Phishing,
    Suspicious,
    Legitimate,
}

impl Stance {
    /// Normalise the stance to the pipeline's label vocabulary.
    #[must_use]
    pub fn to_label(self) -> Label {
        match self {
            Self::Phishing => Label::Phishing,
            Self::Suspicious => Label::Suspicious,
            Self::Legitimate => Label::Safe,
        }
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phishing => write!(f, "PHISHING"),
            Self::Suspicious => write!(f, "SUSPICIOUS"),
            Self::Legitimate => write!(f, "LEGITIMATE"),
        }
    }
}

/// Coarse risk class assigned by the rule-based triage stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoarseClass {
    Safe,
    LowRisk,
    HighRisk,
}

/// Operational action recommended for a classified message.
///
/// Execution is the chat adapter's concern; the pipeline never deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    Warn,
    FlagReview,
}

/// Which pipeline stage produced the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    SingleShot,
    Mad,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Triage => write!(f, "triage"),
            Self::SingleShot => write!(f, "single_shot"),
            Self::Mad => write!(f, "mad"),
        }
    }
}

/// Why the debate orchestrator stopped running rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Consensus,
    MaxRounds,
    Timeout,
}

/// How strongly the final debate round agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    Unanimous,
    StrongMajority,
    Majority,
    Weighted,
}

// ---------------------------------------------------------------------------
// Message and sender
// ---------------------------------------------------------------------------

/// An inbound chat message, as delivered by the chat adapter.
///
/// Immutable inside the core; one message produces exactly one
/// [`DetectionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Stable message identifier from the source chat.
    pub id: String,
    /// Raw message text.
    pub text: String,
    /// When the message was sent.
    pub sent_at: DateTime<Utc>,
    /// Sender identifier in the source chat.
    pub sender_id: String,
}

impl ChatMessage {
    pub fn new(id: &str, text: &str, sent_at: DateTime<Utc>, sender_id: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            sent_at,
            sender_id: sender_id.to_string(),
        }
    }
}

/// Metadata about a message sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderProfile {
    pub id: String,
    pub username: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl SenderProfile {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            username: None,
            joined_at: None,
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }
}

/// Per-sender behavioral statistics, loaded from storage as a snapshot.
///
/// The snapshot is read once per message and treated as immutable for that
/// message's pipeline run. A missing or insufficient baseline is a
/// first-class state: anomaly detection produces nothing against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    /// Average message length in characters.
    pub avg_message_length: f64,
    /// Standard deviation of message length, when known.
    pub length_std_dev: Option<f64>,
    /// Hours of day (0-23) when the sender typically posts.
    pub typical_hours: Vec<u8>,
    /// Fraction of historical messages containing a URL.
    pub url_sharing_rate: f64,
    /// Typical emoji-per-character rate.
    pub emoji_rate: f64,
    /// Total messages observed for this sender.
    pub total_messages: u64,
}

impl BaselineSnapshot {
    /// Whether the baseline has enough observations to support anomaly
    /// detection.
    #[must_use]
    pub fn is_sufficient(&self, min_messages: u64) -> bool {
        self.total_messages >= min_messages
    }
}

// ---------------------------------------------------------------------------
// URL checking
// ---------------------------------------------------------------------------

/// Which layer of the URL security checker produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckSource {
    #[serde(rename = "whitelist")]
    Whitelist,
    #[serde(rename = "heuristic")]
    Heuristic,
    #[serde(rename = "external")]
    External,
    #[serde(rename = "heuristic+external")]
    HeuristicExternal,
    #[serde(rename = "expand_failed")]
    ExpandFailed,
}

impl std::fmt::Display for CheckSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Whitelist => write!(f, "whitelist"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::External => write!(f, "external"),
            Self::HeuristicExternal => write!(f, "heuristic+external"),
            Self::ExpandFailed => write!(f, "expand_failed"),
        }
    }
}

/// Verdict for a single URL from the URL security checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCheckResult {
    /// The URL as it appeared in the message (normalised form).
    pub url: String,
    /// Final URL after following redirects, when the original was a known
    /// shortener and expansion succeeded. `None` otherwise.
    pub expanded_url: Option<String>,
    /// Ordered redirect hops taken during expansion.
    pub redirect_chain: Vec<String>,
    /// Whether the URL is considered malicious.
    pub is_malicious: bool,
    /// Risk score in [0.0, 1.0].
    pub risk_score: f64,
    /// Which checker layer decided.
    pub source: CheckSource,
    /// Human-readable risk factors that contributed to the score.
    pub risk_factors: Vec<String>,
    /// Additional evidence (engine counts, reputation, notes).
    pub details: HashMap<String, String>,
}

impl UrlCheckResult {
    /// Build the trusted-domain verdict. Enforces the invariant that a
    /// whitelist verdict carries zero risk.
    #[must_use]
    pub fn trusted(url: &str, expanded_url: Option<String>, redirect_chain: Vec<String>) -> Self {
        Self {
            url: url.to_string(),
            expanded_url,
            redirect_chain,
            is_malicious: false,
            risk_score: 0.0,
            source: CheckSource::Whitelist,
            risk_factors: Vec::new(),
            details: HashMap::new(),
        }
    }

    /// A URL is treated as trusted by triage when the checker bypassed it via
    /// the trust set, or found it clean with negligible risk.
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.source == CheckSource::Whitelist || (!self.is_malicious && self.risk_score <= 0.10)
    }
}

// ---------------------------------------------------------------------------
// Triage report
// ---------------------------------------------------------------------------

/// A single rule-based red flag raised during triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageFlag {
    /// Stable flag identifier (e.g. `phishing_keywords`, `shortened_url`).
    pub id: String,
    pub description: String,
    /// Severity 1-10.
    pub severity: u8,
    /// The value that matched (domain, keyword list, ratio).
    pub matched: String,
}

impl TriageFlag {
    pub fn new(id: &str, description: &str, severity: u8, matched: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            severity,
            matched: matched.to_string(),
        }
    }
}

/// Kind of behavioral deviation detected against the sender baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    TimeAnomaly,
    LengthAnomaly,
    FirstTimeUrl,
    EmojiAnomaly,
}

impl AnomalyKind {
    /// The triage flag identifier for this anomaly.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeAnomaly => "time_anomaly",
            Self::LengthAnomaly => "length_anomaly",
            Self::FirstTimeUrl => "first_time_url",
            Self::EmojiAnomaly => "emoji_anomaly",
        }
    }
}

/// A detected behavioral deviation with its strength in [0.0, 1.0].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralAnomaly {
    pub kind: AnomalyKind,
    pub description: String,
    pub deviation_score: f64,
    pub baseline_value: String,
    pub current_value: String,
}

/// Per-URL expansion evidence carried in the triage report so downstream
/// prompts can cite what a shortener resolved to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionEvidence {
    pub is_shortened: bool,
    pub expanded_url: Option<String>,
    pub final_host: Option<String>,
    pub success: bool,
    pub source: CheckSource,
}

/// Complete result of the rule-based triage stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    /// Aggregate risk score, clamped to [0, 100].
    pub risk_score: u8,
    pub class: CoarseClass,
    /// Set only when `class` is `Safe`: the pipeline may finish without any
    /// model call.
    pub skip_llm: bool,
    pub urls_found: Vec<String>,
    pub whitelisted_urls: Vec<String>,
    pub non_whitelisted_urls: Vec<String>,
    /// Expansion evidence keyed by original URL.
    pub expanded_urls: HashMap<String, ExpansionEvidence>,
    /// Red flags in discovery order.
    pub flags: Vec<TriageFlag>,
    pub anomalies: Vec<BehavioralAnomaly>,
    /// Flag identifiers in discovery order, deduplicated.
    pub triggered_flags: Vec<String>,
}

impl TriageReport {
    /// An empty SAFE report (no URLs, no flags).
    #[must_use]
    pub fn safe() -> Self {
        Self {
            risk_score: 0,
            class: CoarseClass::Safe,
            skip_llm: true,
            urls_found: Vec::new(),
            whitelisted_urls: Vec::new(),
            non_whitelisted_urls: Vec::new(),
            expanded_urls: HashMap::new(),
            flags: Vec::new(),
            anomalies: Vec::new(),
            triggered_flags: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Token accounting
// ---------------------------------------------------------------------------

/// Input/output token counts charged against model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

// ---------------------------------------------------------------------------
// Single-shot verdict
// ---------------------------------------------------------------------------

/// Result of the single-shot classification stage.
///
/// The classifier is a router, not a final judge: only a high-confidence
/// `Safe` verdict finalises here; everything else escalates to the debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleShotVerdict {
    pub label: Label,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_factors: Vec<String>,
    /// Whether the verdict routes the message into the debate stage.
    pub escalate: bool,
    pub escalation_reason: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// True when the model call failed and this is the synthesized fallback.
    pub fallback: bool,
}

// ---------------------------------------------------------------------------
// Debate records
// ---------------------------------------------------------------------------

/// Role of a debate agent. The first three belong to the three-agent roster,
/// the rest to the five-agent roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    ContentAnalyzer,
    SecurityValidator,
    SocialContext,
    Detector,
    Critic,
    Defender,
    FactChecker,
    Judge,
}

impl AgentRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentAnalyzer => "content_analyzer",
            Self::SecurityValidator => "security_validator",
            Self::SocialContext => "social_context",
            Self::Detector => "detector",
            Self::Critic => "critic",
            Self::Defender => "defender",
            Self::FactChecker => "fact_checker",
            Self::Judge => "judge",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One agent's structured reply within a debate round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub role: AgentRole,
    pub stance: Stance,
    pub confidence: f64,
    pub arguments: Vec<String>,
    pub evidence: HashMap<String, serde_json::Value>,
    /// 1-based round number this response belongs to.
    pub round: u32,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

impl AgentResponse {
    /// The synthesized response used when an agent fails all retries.
    #[must_use]
    pub fn unavailable(role: AgentRole, round: u32) -> Self {
        Self {
            role,
            stance: Stance::Suspicious,
            confidence: 0.5,
            arguments: vec!["agent unavailable".to_string()],
            evidence: HashMap::new(),
            round,
            usage: TokenUsage::default(),
            latency_ms: 0,
        }
    }
}

/// Complete record of a multi-agent debate: every round's responses plus the
/// weighted-voting outcome computed from the final round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRecord {
    /// Ordered rounds; each holds the parallel agent responses.
    pub rounds: Vec<Vec<AgentResponse>>,
    pub stop_reason: StopReason,
    /// Earliest round (1-based) in which consensus held, if any.
    pub consensus_round: Option<u32>,
    pub consensus_reached: bool,
    pub consensus_kind: ConsensusKind,
    /// Aggregated stance from the final round.
    pub decision: Stance,
    pub confidence: f64,
    /// Weighted phishing probability `p` from the aggregator.
    pub weighted_score: f64,
    /// Final-round vote per agent role.
    pub agent_votes: HashMap<AgentRole, Stance>,
    pub usage: TokenUsage,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Detection result
// ---------------------------------------------------------------------------

/// Structured per-stage evidence attached to a detection result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionTrace {
    pub triage: TriageReport,
    pub single_shot: Option<SingleShotVerdict>,
    pub debate: Option<DebateRecord>,
}

/// Final output of the detection pipeline for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub id: Uuid,
    pub message_id: String,
    pub label: Label,
    /// Always >= 0.5 (it is `max(p, 1-p)` of the aggregated probability).
    pub confidence: f64,
    pub stage: Stage,
    pub action: Action,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub trace: DetectionTrace,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which agent roster the debate stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MadMode {
    Three,
    Five,
}

/// Supported LLM providers. Both speak the OpenAI-compatible
/// chat-completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    DeepSeek,
    OpenRouter,
}

/// Debate stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MadConfig {
    pub mode: MadMode,
    /// Hard cap on debate rounds.
    pub max_rounds: u32,
    /// Stop as soon as a round reaches consensus.
    pub early_termination: bool,
    /// Optional total debate time budget in milliseconds. When exceeded, no
    /// new round starts; the in-flight round completes.
    pub max_total_time_ms: Option<u64>,
    /// Mean-confidence threshold for a strong-majority consensus.
    pub consensus_majority_confidence: f64,
    /// Worker pool bound for per-round agent fan-out.
    pub concurrency: usize,
}

impl Default for MadConfig {
    fn default() -> Self {
        Self {
            mode: MadMode::Three,
            max_rounds: 2,
            early_termination: true,
            max_total_time_ms: None,
            consensus_majority_confidence: 0.75,
            concurrency: 3,
        }
    }
}

/// Triage stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Risk score boundary between LOW_RISK and HIGH_RISK.
    pub low_risk_threshold: u32,
    /// Score bonus per trust-set URL reached through a shortener.
    pub shortener_whitelist_bonus: i32,
    /// Minimum observed messages before behavioral anomalies activate.
    pub baseline_min_messages: u64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            low_risk_threshold: 30,
            shortener_whitelist_bonus: -10,
            baseline_min_messages: 5,
        }
    }
}

/// URL security checker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCheckerConfig {
    /// Per-URL expansion timeout in milliseconds.
    pub expand_timeout_ms: u64,
    /// Redirect hop cap during expansion.
    pub max_redirects: u32,
    /// TTL for cached per-URL check results, in seconds.
    pub cache_ttl_secs: u64,
    /// Worker pool bound for per-URL fan-out.
    pub concurrency: usize,
    /// Reputation lookups per rate-limit window.
    pub reputation_batch_size: usize,
    /// Delay between reputation batches, in milliseconds.
    pub reputation_batch_delay_ms: u64,
}

impl Default for UrlCheckerConfig {
    fn default() -> Self {
        Self {
            expand_timeout_ms: 10_000,
            max_redirects: 10,
            cache_ttl_secs: 3600,
            concurrency: 4,
            reputation_batch_size: 4,
            reputation_batch_delay_ms: 15_000,
        }
    }
}

/// LLM gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    /// Override the provider's default endpoint.
    pub base_url: Option<String>,
    /// Override the provider's default model.
    pub model: Option<String>,
    /// Process-wide requests-per-minute throttle.
    pub max_rpm: u32,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Attempts per call, including the first.
    pub max_retries: u32,
    /// Serialize debate agent calls instead of running them in parallel.
    /// `None` derives the behavior from the provider (the burst-sensitive
    /// free-tier endpoint defaults to sequential).
    pub serialize_debate: Option<bool>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::DeepSeek,
            api_key: String::new(),
            base_url: None,
            model: None,
            max_rpm: 60,
            timeout_ms: 45_000,
            max_retries: 3,
            serialize_debate: None,
        }
    }
}

impl LlmConfig {
    /// Whether debate calls should run sequentially within a round.
    #[must_use]
    pub fn debate_is_sequential(&self) -> bool {
        self.serialize_debate
            .unwrap_or(self.provider == LlmProvider::OpenRouter)
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mad: MadConfig,
    pub triage: TriageConfig,
    pub url_checker: UrlCheckerConfig,
    pub llm: LlmConfig,
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. Unparseable values fall back silently;
    /// semantic problems are reported by [`PipelineConfig::validate`].
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(mode) = std::env::var("MAD_MODE") {
            match mode.trim().to_lowercase().as_str() {
                "three" | "mad3" | "3" => cfg.mad.mode = MadMode::Three,
                "five" | "mad5" | "5" => cfg.mad.mode = MadMode::Five,
                _ => {}
            }
        }
        if let Some(v) = env_parse::<u32>("MAD_MAX_ROUNDS") {
            cfg.mad.max_rounds = v.max(1);
        }
        if let Ok(v) = std::env::var("MAD_EARLY_TERMINATION") {
            cfg.mad.early_termination = matches!(
                v.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            );
        }
        if let Some(v) = env_parse::<u64>("MAD_MAX_TOTAL_TIME_MS") {
            cfg.mad.max_total_time_ms = Some(v);
        }
        if let Some(v) = env_parse::<f64>("CONSENSUS_MAJORITY_CONFIDENCE") {
            cfg.mad.consensus_majority_confidence = v;
        }

        if let Some(v) = env_parse::<u32>("TRIAGE_LOW_RISK_THRESHOLD") {
            cfg.triage.low_risk_threshold = v;
        }
        if let Some(v) = env_parse::<i32>("SHORTENER_WHITELIST_BONUS") {
            cfg.triage.shortener_whitelist_bonus = v;
        }

        if let Some(v) = env_parse::<u64>("EXPAND_TIMEOUT_MS") {
            cfg.url_checker.expand_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>("MAX_REDIRECTS") {
            cfg.url_checker.max_redirects = v;
        }

        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            match provider.trim().to_lowercase().as_str() {
                "deepseek" => cfg.llm.provider = LlmProvider::DeepSeek,
                "openrouter" => cfg.llm.provider = LlmProvider::OpenRouter,
                _ => {}
            }
        }
        if let Some(v) = env_parse::<u32>("LLM_MAX_RPM") {
            cfg.llm.max_rpm = v;
        }
        let key_var = match cfg.llm.provider {
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
        };
        if let Ok(key) = std::env::var(key_var) {
            cfg.llm.api_key = key;
        }

        cfg
    }

    /// Validate the configuration. Construction-time validation failure is
    /// the only fatal error class in the system.
    pub fn validate(&self) -> Result<()> {
        if self.mad.max_rounds == 0 {
            return Err(PhishGuardError::Config(
                "MAD_MAX_ROUNDS must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mad.consensus_majority_confidence) {
            return Err(PhishGuardError::Config(format!(
                "CONSENSUS_MAJORITY_CONFIDENCE must be in [0,1], got {}",
                self.mad.consensus_majority_confidence
            )));
        }
        if self.mad.concurrency == 0 || self.url_checker.concurrency == 0 {
            return Err(PhishGuardError::Config(
                "worker pool sizes must be at least 1".to_string(),
            ));
        }
        if self.url_checker.max_redirects == 0 {
            return Err(PhishGuardError::Config(
                "MAX_REDIRECTS must be at least 1".to_string(),
            ));
        }
        if self.triage.low_risk_threshold == 0 || self.triage.low_risk_threshold > 100 {
            return Err(PhishGuardError::Config(format!(
                "TRIAGE_LOW_RISK_THRESHOLD must be in [1,100], got {}",
                self.triage.low_risk_threshold
            )));
        }
        if self.llm.max_retries == 0 {
            return Err(PhishGuardError::Config(
                "llm.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Core error type.
#[derive(thiserror::Error, Debug)]
pub enum PhishGuardError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Transient transport failure (timeout, 5xx, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider rejected the request for throttling reasons.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Structured model output could not be parsed even after repair.
    #[error("structured output parse error: {0}")]
    Parse(String),

    /// Non-recoverable provider error (bad credentials, unknown model).
    /// Silently degrading these would poison evaluations.
    #[error("fatal provider error: {0}")]
    FatalProvider(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PhishGuardError {
    /// Whether the gateway should retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
    }

    /// Whether this error must surface instead of degrading to a fallback.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalProvider(_) | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, PhishGuardError>;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Parameters for one structured model call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// When set, the transport must honor structured output either natively
    /// or by re-prompting once on parse failure.
    pub require_structured: bool,
}

/// Raw result of one model call. Token counts are authoritative for
/// accounting.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub structured: Option<serde_json::Value>,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

/// Provider-agnostic LLM transport.
#[async_trait::async_trait]
pub trait LlmTransport: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// Result of following a URL's redirect chain.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub final_url: String,
    /// Hops after the original URL, in order.
    pub chain: Vec<String>,
}

/// Follows HTTP redirects for URL expansion (HEAD with GET fallback).
#[async_trait::async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &str, max_redirects: u32, timeout: Duration)
        -> Result<Expansion>;
}

/// Aggregate verdict counts from an external reputation service.
#[derive(Debug, Clone, Default)]
pub struct ReputationReport {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
    pub undetected: u32,
    /// Community reputation; strongly negative values indicate abuse.
    pub reputation: Option<i64>,
}

impl ReputationReport {
    #[must_use]
    pub fn engines_total(&self) -> u32 {
        self.malicious + self.suspicious + self.harmless + self.undetected
    }
}

/// External URL/domain reputation lookup. Failures are non-fatal; the
/// checker degrades to heuristic-only.
#[async_trait::async_trait]
pub trait ReputationProvider: Send + Sync {
    async fn check_url(&self, url: &str) -> Result<ReputationReport>;

    async fn check_domain(&self, host: &str) -> Result<ReputationReport>;

    /// Whether the provider has credentials and should be consulted.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Persistence collaborator. All writes are best-effort and must not block
/// the return of a [`DetectionResult`].
#[async_trait::async_trait]
pub trait DetectionSink: Send + Sync {
    async fn persist_result(&self, result: &DetectionResult) -> Result<()>;

    async fn accumulate_usage(
        &self,
        day: NaiveDate,
        stage: Stage,
        usage: TokenUsage,
        requests: u32,
    ) -> Result<()>;

    async fn load_baseline(&self, sender_id: &str) -> Result<Option<BaselineSnapshot>>;
}

// ===========================================================================
// Tests
// ===========================================================================
