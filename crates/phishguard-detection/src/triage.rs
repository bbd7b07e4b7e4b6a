//! Rule-based triage, stage 1 of the detection pipeline.
//!
//! Aggregates deny-list red flags, URL checker evidence, and behavioral
//! deviations into a risk score in [0, 100] and a coarse class. Trivially
//! safe traffic (score 0 with only trusted URLs, or no URLs) terminates here
//! with no model call.
//!
//! A shortener is not itself a strong phishing indicator — lecturers use
//! them constantly. What matters is the destination: a shortener resolving
//! into the trust set removes risk, an unknown destination is mildly
//! suspicious, and a failed expansion is a distinct, slightly stronger
//! signal.
//!
//! Triage is purely CPU-bound: it never expands URLs itself and never calls
//! a model. Expansion evidence arrives via the pre-computed
//! [`UrlCheckResult`]s.

use crate::behavior::BehaviorAnalyzer;
use crate::denylist::{is_shortener_url, DenyList};
use crate::trustlist::TrustedDomains;
use crate::url_extract::{host_of, UrlExtractor};
use chrono::{DateTime, Utc};
use phishguard_core::{
    AnomalyKind, BaselineSnapshot, CheckSource, CoarseClass, ExpansionEvidence, TriageConfig,
    TriageFlag, TriageReport, UrlCheckResult,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Score weight in points for a red flag identifier. Unknown flags weigh 10.
#[must_use]
pub fn flag_weight(flag_id: &str) -> i64 {
    match flag_id {
        "blacklisted_domain" => 50,
        "phishing_keywords" => 20,
        "authority_impersonation" => 20,
        "suspicious_tld" => 15,
        "urgency_keywords" => 15,
        "shortened_url_expand_failed" => 15,
        "shortened_url" => 10,
        "caps_lock_abuse" => 10,
        "excessive_punctuation" => 5,
        _ => 10,
    }
}

/// Score weight in points for a behavioral anomaly, before deviation scaling.
#[must_use]
pub fn anomaly_weight(kind: AnomalyKind) -> i64 {
    match kind {
        AnomalyKind::TimeAnomaly => 10,
        AnomalyKind::LengthAnomaly => 10,
        AnomalyKind::FirstTimeUrl => 10,
        AnomalyKind::EmojiAnomaly => 5,
    }
}

/// The rule-based triage engine.
pub struct TriageEngine {
    config: TriageConfig,
    extractor: UrlExtractor,
    trustlist: TrustedDomains,
    denylist: DenyList,
    behavior: BehaviorAnalyzer,
}

impl TriageEngine {
    #[must_use]
    pub fn new(config: TriageConfig) -> Self {
        Self::with_lists(config, TrustedDomains::new(), DenyList::new())
    }

    /// Build with deployment-specific trust and deny lists.
    #[must_use]
    pub fn with_lists(config: TriageConfig, trustlist: TrustedDomains, denylist: DenyList) -> Self {
        Self {
            config,
            extractor: UrlExtractor::new(),
            trustlist,
            denylist,
            behavior: BehaviorAnalyzer::new(),
        }
    }

    /// Run triage over one message. Deterministic for a fixed
    /// (text, timestamp, baseline, url_checks) input.
    #[must_use]
    pub fn analyze(
        &self,
        text: &str,
        sent_at: DateTime<Utc>,
        baseline: Option<&BaselineSnapshot>,
        url_checks: &HashMap<String, UrlCheckResult>,
    ) -> TriageReport {
        let urls = self.extractor.extract_urls(text);
        let has_urls = !urls.is_empty();

        // Collect expansion evidence and destination hosts from the checker.
        let mut expanded_urls: HashMap<String, ExpansionEvidence> = HashMap::new();
        for url in &urls {
            let Some(check) = url_checks.get(url) else {
                continue;
            };
            let shortened = is_shortener_url(url);
            if !shortened && check.expanded_url.is_none() {
                continue;
            }
            let final_host = check.expanded_url.as_deref().and_then(host_of);
            expanded_urls.insert(
                url.clone(),
                ExpansionEvidence {
                    is_shortened: shortened,
                    expanded_url: check.expanded_url.clone(),
                    final_host,
                    success: check.source != CheckSource::ExpandFailed,
                    source: check.source,
                },
            );
        }

        // Partition URLs into trusted and untrusted. A URL counts as trusted
        // when the local trust set matches it, the checker bypassed it, or
        // its expanded destination lands in the trust set.
        let mut whitelisted_urls = Vec::new();
        let mut non_whitelisted_urls = Vec::new();
        let mut shortener_whitelisted = 0usize;
        for url in &urls {
            let check = url_checks.get(url);
            let destination_trusted = expanded_urls
                .get(url)
                .and_then(|e| e.final_host.as_deref())
                .is_some_and(|host| self.trustlist.contains_host(host));

            let trusted = self.trustlist.is_trusted_url(url)
                || check.is_some_and(UrlCheckResult::is_trusted)
                || destination_trusted;

            if trusted {
                if is_shortener_url(url)
                    && (destination_trusted
                        || check.is_some_and(|c| c.source == CheckSource::Whitelist))
                {
                    shortener_whitelisted += 1;
                }
                whitelisted_urls.push(url.clone());
            } else {
                non_whitelisted_urls.push(url.clone());
            }
        }

        // Red flags from untrusted URLs, with shortener flags adjusted by
        // expansion evidence.
        let mut flags: Vec<TriageFlag> = Vec::new();
        for url in &non_whitelisted_urls {
            let url_flags = self.denylist.analyze_url(url);
            match expanded_urls.get(url) {
                Some(evidence) => {
                    for flag in url_flags {
                        if flag.id == "shortened_url" {
                            flags.push(adjust_shortener_flag(&flag, evidence));
                        } else {
                            flags.push(flag);
                        }
                    }
                    // The expanded destination gets its own deny-list pass.
                    if evidence.success {
                        if let Some(host) = &evidence.final_host {
                            flags.extend(self.denylist.analyze_url(&format!("https://{host}")));
                        }
                    }
                }
                None => flags.extend(url_flags),
            }
        }

        // Red flags from the message text.
        flags.extend(self.denylist.analyze_text(text));

        // Behavioral deviations against the sender baseline.
        let anomalies = self.behavior.analyze_all(
            text,
            sent_at,
            has_urls,
            baseline,
            self.config.baseline_min_messages,
        );

        // Risk score: flag weights, deviation-scaled anomaly weights, and
        // the bonus for shorteners that resolved into the trust set.
        let mut risk: i64 = flags.iter().map(|flag| flag_weight(&flag.id)).sum();
        for anomaly in &anomalies {
            risk += (anomaly_weight(anomaly.kind) as f64 * anomaly.deviation_score).floor() as i64;
        }
        risk += i64::from(self.config.shortener_whitelist_bonus) * shortener_whitelisted as i64;
        let risk_score = risk.clamp(0, 100) as u8;

        // Triggered flag identifiers in discovery order, deduplicated.
        let mut seen = HashSet::new();
        let mut triggered_flags = Vec::new();
        for id in flags
            .iter()
            .map(|flag| flag.id.clone())
            .chain(anomalies.iter().map(|a| a.kind.as_str().to_string()))
        {
            if seen.insert(id.clone()) {
                triggered_flags.push(id);
            }
        }

        let all_whitelisted = non_whitelisted_urls.is_empty() && !whitelisted_urls.is_empty();
        let (class, skip_llm) = if risk_score == 0 {
            if all_whitelisted || !has_urls {
                (CoarseClass::Safe, true)
            } else {
                (CoarseClass::LowRisk, false)
            }
        } else if u32::from(risk_score) < self.config.low_risk_threshold {
            (CoarseClass::LowRisk, false)
        } else {
            (CoarseClass::HighRisk, false)
        };

        debug!(
            risk_score,
            ?class,
            urls = urls.len(),
            flags = triggered_flags.len(),
            "triage complete"
        );

        TriageReport {
            risk_score,
            class,
            skip_llm,
            urls_found: urls,
            whitelisted_urls,
            non_whitelisted_urls,
            expanded_urls,
            flags,
            anomalies,
            triggered_flags,
        }
    }
}

/// Replace the generic shortener flag with an evidence-aware variant.
fn adjust_shortener_flag(flag: &TriageFlag, evidence: &ExpansionEvidence) -> TriageFlag {
    if !evidence.success {
        return TriageFlag::new(
            "shortened_url_expand_failed",
            "Shortened URL could not be expanded (destination unknown)",
            5,
            &flag.matched,
        );
    }
    match &evidence.final_host {
        Some(host) => TriageFlag::new(
            "shortened_url",
            &format!("Shortened URL resolves to {host} (not whitelisted, needs review)"),
            3,
            &format!("{} -> {host}", flag.matched),
        ),
        None => flag.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use phishguard_core::CheckSource;

    fn engine() -> TriageEngine {
        TriageEngine::new(TriageConfig::default())
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn heuristic_check_result(url: &str, expanded: Option<&str>, risk: f64) -> UrlCheckResult {
        UrlCheckResult {
            url: url.to_string(),
            expanded_url: expanded.map(str::to_string),
            redirect_chain: Vec::new(),
            is_malicious: risk >= 0.5,
            risk_score: risk,
            source: CheckSource::Heuristic,
            risk_factors: Vec::new(),
            details: HashMap::new(),
        }
    }

    #[test]
    fn plain_academic_message_is_safe() {
        let report = engine().analyze("Jangan lupa deadline besok", noon(), None, &HashMap::new());
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.class, CoarseClass::Safe);
        assert!(report.skip_llm);
        assert!(report.urls_found.is_empty());
    }

    #[test]
    fn trusted_url_only_is_safe() {
        let report = engine().analyze(
            "Materi di classroom.google.com/c/abc",
            noon(),
            None,
            &HashMap::new(),
        );
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.class, CoarseClass::Safe);
        assert!(report.skip_llm);
        assert_eq!(report.whitelisted_urls.len(), 1);
        assert!(report.non_whitelisted_urls.is_empty());
    }

    #[test]
    fn shortener_resolving_to_trust_set_is_safe_with_bonus() {
        let url = "https://bit.ly/materi-kuliah";
        let mut checks = HashMap::new();
        checks.insert(
            url.to_string(),
            UrlCheckResult::trusted(
                url,
                Some("https://docs.google.com/document/d/1".to_string()),
                vec!["https://docs.google.com/document/d/1".to_string()],
            ),
        );

        let report = engine().analyze("Cek bit.ly/materi-kuliah", noon(), None, &checks);
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.class, CoarseClass::Safe);
        assert!(report.skip_llm);
        assert_eq!(report.whitelisted_urls, vec![url.to_string()]);
        let evidence = &report.expanded_urls[url];
        assert!(evidence.is_shortened);
        assert!(evidence.success);
        assert_eq!(evidence.final_host.as_deref(), Some("docs.google.com"));
    }

    #[test]
    fn phishing_lure_with_shortener_to_free_tld_is_high_risk() {
        let url = "https://bit.ly/verify";
        let mut checks = HashMap::new();
        checks.insert(
            url.to_string(),
            heuristic_check_result(url, Some("https://akun-verif.tk/login"), 0.5),
        );

        let report = engine().analyze(
            "URGENT!!! Akun diblokir! Verifikasi bit.ly/verify",
            noon(),
            None,
            &checks,
        );
        assert_eq!(report.class, CoarseClass::HighRisk);
        assert!(report.risk_score >= 30);
        assert!(report.triggered_flags.contains(&"urgency_keywords".to_string()));
        assert!(report.triggered_flags.contains(&"phishing_keywords".to_string()));
        assert!(report.triggered_flags.contains(&"shortened_url".to_string()));
        assert!(report.triggered_flags.contains(&"suspicious_tld".to_string()));
        assert!(!report.skip_llm);
    }

    #[test]
    fn expand_failure_contributes_distinct_flag() {
        let url = "https://bit.ly/broken";
        let mut checks = HashMap::new();
        let mut check = heuristic_check_result(url, None, 0.2);
        check.source = CheckSource::ExpandFailed;
        checks.insert(url.to_string(), check);

        let report = engine().analyze("Silakan cek bit.ly/broken ya", noon(), None, &checks);
        assert!(report
            .triggered_flags
            .contains(&"shortened_url_expand_failed".to_string()));
        assert!(!report
            .triggered_flags
            .contains(&"shortened_url".to_string()));
        // 15 points: LOW_RISK.
        assert_eq!(report.risk_score, 15);
        assert_eq!(report.class, CoarseClass::LowRisk);
    }

    #[test]
    fn risk_exactly_at_threshold_is_high_risk() {
        // phishing_keywords (20) + shortened_url (10) = 30.
        let report = engine().analyze(
            "Info transfer lewat bit.ly/bayar-ukt",
            noon(),
            None,
            &HashMap::new(),
        );
        assert_eq!(report.risk_score, 30);
        assert_eq!(report.class, CoarseClass::HighRisk);
    }

    #[test]
    fn zero_risk_with_unknown_url_is_low_risk_not_safe() {
        let report = engine().analyze(
            "Materi tambahan di example.com/materi",
            noon(),
            None,
            &HashMap::new(),
        );
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.class, CoarseClass::LowRisk);
        assert!(!report.skip_llm);
        assert_eq!(report.non_whitelisted_urls.len(), 1);
    }

    #[test]
    fn behavioral_anomalies_scale_by_deviation() {
        let baseline = BaselineSnapshot {
            avg_message_length: 40.0,
            length_std_dev: Some(10.0),
            typical_hours: vec![9, 10, 11],
            url_sharing_rate: 0.3,
            emoji_rate: 0.0,
            total_messages: 40,
        };
        // 03:00 is six hours from the nearest typical hour: deviation 0.5,
        // contributing floor(10 * 0.5) = 5 points.
        let at_3am = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let report = engine().analyze("halo semua, ada info?", at_3am, Some(&baseline), &HashMap::new());
        assert!(report
            .triggered_flags
            .contains(&"time_anomaly".to_string()));
        assert_eq!(report.risk_score, 5);
        assert_eq!(report.class, CoarseClass::LowRisk);
    }

    #[test]
    fn missing_baseline_contributes_nothing() {
        let at_3am = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let report = engine().analyze("halo semua, ada info?", at_3am, None, &HashMap::new());
        assert!(report.anomalies.is_empty());
        assert_eq!(report.risk_score, 0);
    }

    #[test]
    fn bonus_never_drives_score_negative() {
        let url = "https://bit.ly/materi";
        let mut checks = HashMap::new();
        checks.insert(
            url.to_string(),
            UrlCheckResult::trusted(url, Some("https://drive.google.com/x".to_string()), Vec::new()),
        );
        let report = engine().analyze("Cek bit.ly/materi", noon(), None, &checks);
        // 0 flags - 10 bonus, clamped to 0.
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.class, CoarseClass::Safe);
    }

    #[test]
    fn triage_is_deterministic() {
        let baseline = BaselineSnapshot {
            avg_message_length: 60.0,
            length_std_dev: None,
            typical_hours: vec![8, 9, 19],
            url_sharing_rate: 0.0,
            emoji_rate: 0.01,
            total_messages: 25,
        };
        let mut checks = HashMap::new();
        checks.insert(
            "https://bit.ly/x".to_string(),
            heuristic_check_result("https://bit.ly/x", Some("https://shop.xyz/promo"), 0.3),
        );
        let text = "PROMO khusus! Cek bit.ly/x segera, gratis!";
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 2, 30, 0).unwrap();

        let first = engine().analyze(text, at, Some(&baseline), &checks);
        let second = engine().analyze(text, at, Some(&baseline), &checks);

        let a = serde_json::to_value(&first).unwrap();
        let b = serde_json::to_value(&second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn triggered_flags_preserve_discovery_order() {
        let report = engine().analyze(
            "MENANG undian 50 JUTA! hadiah.tk/klaim",
            noon(),
            None,
            &HashMap::new(),
        );
        // URL flags are discovered before text flags.
        let tld_pos = report
            .triggered_flags
            .iter()
            .position(|f| f == "suspicious_tld")
            .unwrap();
        let phishing_pos = report
            .triggered_flags
            .iter()
            .position(|f| f == "phishing_keywords")
            .unwrap();
        assert!(tld_pos < phishing_pos);
        assert_eq!(report.class, CoarseClass::HighRisk);
    }
}
