//! Prompt construction for the single-shot classifier.
//!
//! Prompts are written in Indonesian for the academic-group deployment; the
//! structured-output contract is restated at the end of every prompt.

use phishguard_core::{
    BaselineSnapshot, ChatMessage, SenderProfile, SingleShotVerdict, TriageReport, UrlCheckResult,
};
use std::collections::HashMap;

/// Everything a model stage knows about one message.
#[derive(Clone, Copy)]
pub struct MessageContext<'a> {
    pub message: &'a ChatMessage,
    pub sender: &'a SenderProfile,
    pub baseline: Option<&'a BaselineSnapshot>,
    pub triage: &'a TriageReport,
    pub url_checks: &'a HashMap<String, UrlCheckResult>,
}

/// Debate-stage context: the message context plus the routing verdict.
#[derive(Clone, Copy)]
pub struct DebateContext<'a> {
    pub message: MessageContext<'a>,
    pub single_shot: &'a SingleShotVerdict,
}

/// System prompt for the single-shot classifier.
pub const SINGLE_SHOT_SYSTEM_PROMPT: &str = "\
Kamu adalah sistem deteksi phishing untuk grup chat akademik Indonesia.
Tugasmu: Menganalisis apakah pesan dari akun mahasiswa terverifikasi menunjukkan tanda-tanda akun yang disusupi atau upaya phishing.

Konteks:
- Grup: mahasiswa dan dosen di lingkungan kampus Indonesia
- Konten tipikal: diskusi akademik, informasi akademik, pengumuman event kampus
- Model ancaman: akun mahasiswa yang dikompromikan mengirimkan link phishing

Kriteria Phishing:
1. URL mencurigakan (shortened, TLD aneh, domain mirip tapi beda)
2. Taktik social engineering (urgensi berlebihan, otoritas palsu, ketakutan)
3. Permintaan data sensitif (password, OTP, transfer uang)
4. Perilaku tidak konsisten dengan baseline pengguna
5. Konteks tidak relevan dengan aktivitas akademik

Kriteria Legitimate:
1. URL dari domain terpercaya (kampus, Google, GitHub, dll)
2. Konteks sesuai aktivitas akademik
3. Gaya pesan konsisten dengan pengguna
4. Tidak ada indikator social engineering
5. URL shortener tidak otomatis berbahaya jika expanded URL mengarah ke domain terpercaya

Output dalam format JSON strict:
{
  \"classification\": \"SAFE\" | \"SUSPICIOUS\" | \"PHISHING\",
  \"confidence\": 0.0-1.0,
  \"reasoning\": \"penjelasan singkat dalam Bahasa Indonesia\",
  \"risk_factors\": [\"faktor1\", \"faktor2\"]
}

PENTING:
- Berikan confidence tinggi (>0.85) hanya jika sangat yakin
- Gunakan \"SUSPICIOUS\" jika ragu antara SAFE dan PHISHING
- Jangan memberi label PHISHING hanya karena URL shortener jika evidence expand/trusted mendukung LEGITIMATE
- Pertimbangkan konteks grup akademik Indonesia";

/// Build the user prompt for one single-shot classification.
#[must_use]
pub fn analysis_prompt(ctx: &MessageContext<'_>) -> String {
    let mut parts = vec!["=== Permintaan Analisis Pesan ===".to_string(), String::new()];

    match &ctx.sender.username {
        Some(username) => parts.push(format!("Pengirim: @{username}")),
        None => parts.push(format!("Pengirim: {}", ctx.sender.id)),
    }
    if let Some(joined) = ctx.sender.joined_at {
        parts.push(format!("Bergabung: {}", joined.format("%Y-%m-%d")));
    }
    parts.push(String::new());

    push_baseline_section(&mut parts, ctx.baseline);
    parts.push(String::new());

    parts.push("Pesan Saat Ini:".to_string());
    parts.push(format!(
        "- Waktu: {}",
        ctx.message.sent_at.format("%Y-%m-%d %H:%M")
    ));
    parts.push(format!(
        "- Panjang: {} karakter",
        ctx.message.text.chars().count()
    ));
    parts.push("- Isi pesan:".to_string());
    parts.push(format!("  \"{}\"", ctx.message.text));
    parts.push(String::new());

    push_triage_section(&mut parts, ctx.triage);
    push_url_check_section(&mut parts, ctx.url_checks);

    parts.push(String::new());
    parts.push("Analisis pesan ini dan berikan klasifikasi dalam format JSON.".to_string());
    parts.join("\n")
}

/// Baseline lines shared by the classifier and debate prompts.
pub fn push_baseline_section(parts: &mut Vec<String>, baseline: Option<&BaselineSnapshot>) {
    match baseline {
        Some(baseline) if baseline.total_messages > 0 => {
            parts.push("Perilaku Baseline:".to_string());
            parts.push(format!(
                "- Rata-rata panjang pesan: {:.0} karakter",
                baseline.avg_message_length
            ));
            if let (Some(min), Some(max)) = (
                baseline.typical_hours.iter().min(),
                baseline.typical_hours.iter().max(),
            ) {
                parts.push(format!("- Jam posting tipikal: {min:02}:00 - {max:02}:00"));
            }
            parts.push(format!(
                "- Frekuensi share URL: {:.0}% per pesan",
                baseline.url_sharing_rate * 100.0
            ));
            parts.push(format!(
                "- Total pesan historis: {}",
                baseline.total_messages
            ));
        }
        _ => parts.push("Perilaku Baseline: (belum cukup data)".to_string()),
    }
}

/// Triage evidence lines shared by the classifier and debate prompts.
pub fn push_triage_section(parts: &mut Vec<String>, triage: &TriageReport) {
    parts.push("Hasil Triage (rule-based):".to_string());
    parts.push(format!("- Risk Score: {}/100", triage.risk_score));
    if !triage.triggered_flags.is_empty() {
        parts.push(format!("- Red Flags: {}", triage.triggered_flags.join(", ")));
    }
    if !triage.urls_found.is_empty() {
        parts.push(format!("- URLs ditemukan: {:?}", triage.urls_found));
    }
    if !triage.whitelisted_urls.is_empty() {
        parts.push(format!("- URLs whitelisted: {:?}", triage.whitelisted_urls));
    }
    if !triage.expanded_urls.is_empty() {
        parts.push("- Evidence ekspansi URL:".to_string());
        let mut entries: Vec<_> = triage.expanded_urls.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (original, evidence) in entries {
            match &evidence.expanded_url {
                Some(expanded) => parts.push(format!(
                    "  - {original} -> {expanded} (domain: {}, source: {})",
                    evidence.final_host.as_deref().unwrap_or("unknown"),
                    evidence.source
                )),
                None => parts.push(format!(
                    "  - {original} -> gagal expand (source: {})",
                    evidence.source
                )),
            }
        }
    }
}

/// External URL checker evidence lines.
pub fn push_url_check_section(
    parts: &mut Vec<String>,
    url_checks: &HashMap<String, UrlCheckResult>,
) {
    if url_checks.is_empty() {
        return;
    }
    parts.push("Hasil URL checker:".to_string());
    let mut entries: Vec<_> = url_checks.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (url, check) in entries {
        parts.push(format!(
            "- {url}: malicious={}, risk={:.2}, source={}",
            check.is_malicious, check.risk_score, check.source
        ));
        if !check.risk_factors.is_empty() {
            parts.push(format!("  faktor: {}", check.risk_factors.join(", ")));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use phishguard_core::TriageReport;

    fn message() -> ChatMessage {
        ChatMessage::new(
            "m1",
            "Cek bit.ly/materi ya",
            Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap(),
            "u1",
        )
    }

    #[test]
    fn prompt_contains_message_and_triage_evidence() {
        let message = message();
        let sender = SenderProfile::new("u1").with_username("budi");
        let mut triage = TriageReport::safe();
        triage.risk_score = 25;
        triage.triggered_flags = vec!["shortened_url".to_string()];
        triage.urls_found = vec!["https://bit.ly/materi".to_string()];

        let ctx = MessageContext {
            message: &message,
            sender: &sender,
            baseline: None,
            triage: &triage,
            url_checks: &HashMap::new(),
        };
        let prompt = analysis_prompt(&ctx);

        assert!(prompt.contains("@budi"));
        assert!(prompt.contains("Cek bit.ly/materi ya"));
        assert!(prompt.contains("Risk Score: 25/100"));
        assert!(prompt.contains("shortened_url"));
        assert!(prompt.contains("belum cukup data"));
    }

    #[test]
    fn prompt_includes_baseline_when_present() {
        let message = message();
        let sender = SenderProfile::new("u1");
        let triage = TriageReport::safe();
        let baseline = BaselineSnapshot {
            avg_message_length: 80.0,
            length_std_dev: None,
            typical_hours: vec![9, 10, 20],
            url_sharing_rate: 0.25,
            emoji_rate: 0.0,
            total_messages: 42,
        };

        let ctx = MessageContext {
            message: &message,
            sender: &sender,
            baseline: Some(&baseline),
            triage: &triage,
            url_checks: &HashMap::new(),
        };
        let prompt = analysis_prompt(&ctx);

        assert!(prompt.contains("80 karakter"));
        assert!(prompt.contains("09:00 - 20:00"));
        assert!(prompt.contains("Total pesan historis: 42"));
    }

    #[test]
    fn url_check_section_lists_verdicts() {
        let mut checks = HashMap::new();
        checks.insert(
            "https://hadiah.tk/klaim".to_string(),
            phishguard_core::UrlCheckResult {
                url: "https://hadiah.tk/klaim".to_string(),
                expanded_url: None,
                redirect_chain: Vec::new(),
                is_malicious: true,
                risk_score: 0.55,
                source: phishguard_core::CheckSource::Heuristic,
                risk_factors: vec!["Critical-risk TLD (Free TLD)".to_string()],
                details: HashMap::new(),
            },
        );

        let mut parts = Vec::new();
        push_url_check_section(&mut parts, &checks);
        let text = parts.join("\n");
        assert!(text.contains("malicious=true"));
        assert!(text.contains("risk=0.55"));
        assert!(text.contains("Critical-risk TLD"));
    }
}
