//! Role-specialised debate agents.
//!
//! Each agent is one model call per round yielding a structured
//! `{stance, confidence, key_arguments, evidence}` reply. Round 1 is an
//! independent analysis; later rounds inject every other agent's previous
//! reply so stances can be revised. Temperature is held constant across
//! rounds — diversity of stance comes from cross-agent context, not from
//! sampling noise.
//!
//! The Security Validator is the only agent whose prompt presents URL
//! checker results as objective evidence; the others argue from content and
//! context.

use crate::prompts::{push_baseline_section, push_triage_section, push_url_check_section, DebateContext};
use phishguard_core::{AgentResponse, AgentRole, GenerateRequest, GenerateResponse, Result};
use phishguard_llm::json_repair::{normalize_confidence, normalize_stance};
use phishguard_llm::LlmGateway;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 450;

/// The exact reply schema every agent must produce.
const OUTPUT_SCHEMA: &str = r#"{"stance":"PHISHING|SUSPICIOUS|LEGITIMATE","confidence":0.0,"key_arguments":["arg1","arg2"],"evidence":{"key":"value"}}"#;

/// One debate agent: a role plus the gateway it calls through.
pub struct DebateAgent {
    role: AgentRole,
    gateway: Arc<LlmGateway>,
}

impl DebateAgent {
    pub fn new(role: AgentRole, gateway: Arc<LlmGateway>) -> Self {
        Self { role, gateway }
    }

    #[must_use]
    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Round 1: independent analysis.
    ///
    /// # Errors
    ///
    /// Propagates gateway errors; the orchestrator synthesizes the fallback
    /// response for non-fatal failures.
    pub async fn analyze(&self, ctx: &DebateContext<'_>, round: u32) -> Result<AgentResponse> {
        let prompt = self.round_one_prompt(ctx);
        self.query(prompt, round).await
    }

    /// Rounds >= 2: deliberate over every other agent's previous reply.
    pub async fn deliberate(
        &self,
        ctx: &DebateContext<'_>,
        own: &AgentResponse,
        others: &[AgentResponse],
        round: u32,
    ) -> Result<AgentResponse> {
        let prompt = self.deliberation_prompt(ctx, own, others);
        self.query(prompt, round).await
    }

    async fn query(&self, user_prompt: String, round: u32) -> Result<AgentResponse> {
        let request = GenerateRequest {
            system_prompt: self.system_prompt(),
            user_prompt,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            require_structured: true,
        };
        let response = self.gateway.generate(&request).await?;
        let parsed = self.parse_response(response, round);
        debug!(role = %self.role, stance = %parsed.stance, confidence = parsed.confidence, round, "agent reply");
        Ok(parsed)
    }

    /// Turn a structured gateway reply into an [`AgentResponse`]. A missing
    /// stance caps confidence at 0.6 and records why.
    fn parse_response(&self, response: GenerateResponse, round: u32) -> AgentResponse {
        let structured = response.structured.unwrap_or_default();

        let stance_raw = structured.get("stance").and_then(|v| v.as_str());
        let stance = normalize_stance(stance_raw);
        let mut confidence = normalize_confidence(structured.get("confidence"));
        let stance_missing = stance_raw.is_none();
        if stance_missing {
            confidence = confidence.min(0.6);
        }

        let mut arguments: Vec<String> = structured
            .get("key_arguments")
            .and_then(|v| v.as_array())
            .map(|args| {
                args.iter()
                    .map(|a| match a.as_str() {
                        Some(s) => s.to_string(),
                        None => a.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        if stance_missing && arguments.is_empty() {
            arguments.push("Model response missing required 'stance' field".to_string());
        }

        let evidence: HashMap<String, serde_json::Value> = structured
            .get("evidence")
            .and_then(|v| v.as_object())
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        AgentResponse {
            role: self.role,
            stance,
            confidence,
            arguments,
            evidence,
            round,
            usage: response.usage,
            latency_ms: response.latency_ms,
        }
    }

    fn system_prompt(&self) -> String {
        let body = match self.role {
            AgentRole::ContentAnalyzer => {
                "Kamu adalah Content Analyzer agent dalam sistem deteksi phishing.\n\
                 Peran: menganalisis konten pesan, pola linguistik, dan deviasi perilaku.\n\
                 Fokus: konsistensi gaya bahasa dengan baseline, taktik social engineering \
                 (urgensi, otoritas palsu, ketakutan), relevansi konteks akademik, anomali \
                 struktur pesan, dan bahasa Indonesia yang tidak wajar."
            }
            AgentRole::SecurityValidator => {
                "Kamu adalah Security Validator agent dalam sistem deteksi phishing.\n\
                 Peran: memverifikasi URL, reputasi domain, dan bukti keamanan eksternal.\n\
                 Fokus: struktur URL (obfuscation, pola mencurigakan), reputasi domain, \
                 verifikasi tujuan link setelah ekspansi, HTTPS vs HTTP, dan analisis TLD. \
                 Hasil URL checker adalah bukti objektif; beri bobot tinggi."
            }
            AgentRole::SocialContext => {
                "Kamu adalah Social Context Evaluator agent dalam sistem deteksi phishing.\n\
                 Peran: mengevaluasi konteks sosial dan perilaku khusus grup akademik.\n\
                 Fokus: pola perilaku historis pengirim, kesesuaian waktu posting, relevansi \
                 dengan aktivitas akademik berjalan, dan apakah konten masuk akal untuk grup \
                 mahasiswa."
            }
            AgentRole::Detector => {
                "Kamu adalah Detector Agent untuk deteksi phishing. Prioritasmu menemukan \
                 indikasi serangan secara cepat berdasarkan pola social engineering, ancaman \
                 URL, dan anomali pesan."
            }
            AgentRole::Critic => {
                "Kamu adalah Critic Agent dalam debat deteksi phishing. Peranmu menguji \
                 ketahanan argumen, mencari lompatan logika, dan menurunkan keyakinan jika \
                 bukti tidak cukup."
            }
            AgentRole::Defender => {
                "Kamu adalah Defender Agent dalam debat deteksi phishing. Peranmu membela \
                 kemungkinan LEGITIMATE secara rasional, namun tetap patuh pada bukti \
                 objektif keamanan."
            }
            AgentRole::FactChecker => {
                "Kamu adalah Fact Checker Agent untuk verifikasi klaim phishing. Fokus pada \
                 validasi fakta: URL evidence, metadata, dan konsistensi data."
            }
            AgentRole::Judge => {
                "Kamu adalah Judge Agent dalam sistem debat phishing. Peranmu menyeimbangkan \
                 deteksi agresif dan pencegahan false alarm, lalu memberi putusan paling \
                 defensible."
            }
        };
        format!(
            "{body}\n\nWAJIB output JSON valid persis dengan schema:\n{OUTPUT_SCHEMA}"
        )
    }

    fn round_one_prompt(&self, ctx: &DebateContext<'_>) -> String {
        let mut parts = vec![format!("=== Round 1: {} ===", self.role), String::new()];
        self.push_shared_context(&mut parts, ctx);
        parts.push(String::new());
        parts.push("Tugas:".to_string());
        match self.role {
            AgentRole::ContentAnalyzer => {
                parts.push("- Analisis konten pesan dan pola linguistiknya.".to_string());
                parts.push(
                    "- Bandingkan gaya pesan dengan baseline pengirim bila tersedia.".to_string(),
                );
            }
            AgentRole::SecurityValidator => {
                parts.push("- Analisis keamanan setiap URL dan tujuannya.".to_string());
                parts.push(
                    "- Gunakan hasil URL checker sebagai bukti objektif utama.".to_string(),
                );
            }
            AgentRole::SocialContext => {
                parts.push(
                    "- Evaluasi apakah pesan masuk akal untuk konteks grup akademik.".to_string(),
                );
                parts.push("- Pertimbangkan riwayat perilaku dan waktu posting.".to_string());
            }
            AgentRole::Detector => {
                parts.push(
                    "- Berikan deteksi awal seagresif mungkin berbasis indikator risiko."
                        .to_string(),
                );
                parts.push("- Jika ada >=2 indikator kuat, utamakan PHISHING.".to_string());
            }
            AgentRole::Critic => {
                parts.push("- Cari alasan kenapa pesan bisa saja bukan phishing.".to_string());
                parts.push(
                    "- Identifikasi kelemahan bukti atau kemungkinan false positive.".to_string(),
                );
            }
            AgentRole::Defender => {
                parts.push(
                    "- Cari penjelasan valid jika pesan ini normal/legitimate.".to_string(),
                );
                parts.push(
                    "- Jika tidak bisa dipertahankan, turunkan stance ke SUSPICIOUS/PHISHING."
                        .to_string(),
                );
            }
            AgentRole::FactChecker => {
                parts.push(
                    "- Verifikasi klaim berbasis data faktual (URL checks, triage flags)."
                        .to_string(),
                );
                parts.push("- Pisahkan fakta, asumsi, dan ketidakpastian.".to_string());
            }
            AgentRole::Judge => {
                parts.push(
                    "- Putuskan verdict awal yang paling seimbang dan defensible.".to_string(),
                );
                parts.push(
                    "- Pertimbangkan cost false negative dan false positive.".to_string(),
                );
            }
        }
        parts.push(String::new());
        parts.push("Berikan stance Anda dalam JSON sesuai schema.".to_string());
        parts.join("\n")
    }

    fn deliberation_prompt(
        &self,
        ctx: &DebateContext<'_>,
        own: &AgentResponse,
        others: &[AgentResponse],
    ) -> String {
        let mut parts = vec![
            format!("=== Deliberasi: {} ===", self.role),
            String::new(),
            format!("Pesan: \"{}\"", ctx.message.message.text),
            String::new(),
            "Stance Anda di round sebelumnya:".to_string(),
            format!("- Stance: {}", own.stance),
            format!("- Confidence: {:.0}%", own.confidence * 100.0),
            format!("- Argumen: {:?}", own.arguments),
            String::new(),
            "Stance agent lain:".to_string(),
        ];
        for other in others {
            parts.push(format!(
                "- {}: {} ({:.0}%)",
                other.role,
                other.stance,
                other.confidence * 100.0
            ));
            parts.push(format!("  Argumen: {:?}", other.arguments));
        }

        if self.role == AgentRole::SecurityValidator && !ctx.message.url_checks.is_empty() {
            parts.push(String::new());
            push_url_check_section(&mut parts, ctx.message.url_checks);
        }

        parts.push(String::new());
        parts.push(
            "Pertimbangkan argumen agent lain. Apakah ada blind spot dalam analisis Anda?"
                .to_string(),
        );
        parts.push(
            "Anda boleh mempertahankan atau mengubah stance jika ada bukti kuat.".to_string(),
        );
        parts.push(String::new());
        parts.push("Output JSON dengan schema yang sama.".to_string());
        parts.join("\n")
    }

    /// Message, sender, triage, and prior-stage context shared by every
    /// round-1 prompt.
    fn push_shared_context(&self, parts: &mut Vec<String>, ctx: &DebateContext<'_>) {
        let message = &ctx.message;
        parts.push(format!("Pesan: \"{}\"", message.message.text));
        parts.push(format!(
            "Waktu: {}",
            message.message.sent_at.format("%Y-%m-%d %H:%M")
        ));
        if let Some(username) = &message.sender.username {
            parts.push(format!("Pengirim: @{username}"));
        }
        parts.push(String::new());

        push_baseline_section(parts, message.baseline);
        parts.push(String::new());
        push_triage_section(parts, message.triage);

        // Only the Security Validator receives URL checker results as
        // objective evidence.
        if self.role == AgentRole::SecurityValidator {
            parts.push(String::new());
            push_url_check_section(parts, message.url_checks);
        }

        parts.push(String::new());
        parts.push(format!(
            "Single-shot: {} ({:.0}%)",
            ctx.single_shot.label,
            ctx.single_shot.confidence * 100.0
        ));
        parts.push(
            "Catatan: pesan ini dieskalasi ke debat karena dianggap berisiko atau belum \
             meyakinkan di tahap sebelumnya."
                .to_string(),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
