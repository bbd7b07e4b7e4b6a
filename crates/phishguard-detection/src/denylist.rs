//! Deny-list red-flag analysis.
//!
//! Rule tables for the triage stage: known URL shorteners, a suspicious-TLD
//! tariff, Indonesian urgency and phishing keyword sets, authority
//! impersonation patterns, and text-shape checks (caps-lock abuse, excessive
//! punctuation).

use crate::url_extract::host_of;
use phishguard_core::TriageFlag;
use regex::Regex;
use std::collections::HashSet;

/// Known URL shortener hosts. A shortener is a mild signal on its own; the
/// destination domain is what matters.
pub const SHORTENER_DOMAINS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "goo.gl",
    "t.co",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "adf.ly",
    "j.mp",
    "tr.im",
    "shorte.st",
    "cutt.ly",
    "rb.gy",
    "shorturl.at",
    "s.id",
    "linktr.ee",
    "rebrand.ly",
    "tiny.cc",
    "lnkd.in",
];

/// Suspicion tier of a top-level domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TldSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl TldSeverity {
    /// Additive heuristic risk contribution for this tier.
    #[must_use]
    pub fn risk_contribution(&self) -> f64 {
        match self {
            Self::Critical => 0.40,
            Self::High => 0.30,
            Self::Medium => 0.20,
            Self::Low => 0.10,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

/// Suspicious TLD tariff: (tld, severity, category).
const SUSPICIOUS_TLDS: &[(&str, TldSeverity, &str)] = &[
    // Free registrations, heavily abused in phishing campaigns
    (".tk", TldSeverity::Critical, "Free TLD"),
    (".ml", TldSeverity::Critical, "Free TLD"),
    (".ga", TldSeverity::Critical, "Free TLD"),
    (".cf", TldSeverity::Critical, "Free TLD"),
    (".gq", TldSeverity::Critical, "Free TLD"),
    (".xyz", TldSeverity::High, "Cheap generic"),
    (".top", TldSeverity::High, "Cheap generic"),
    (".click", TldSeverity::High, "Cheap generic"),
    (".link", TldSeverity::High, "Cheap generic"),
    (".icu", TldSeverity::High, "Cheap generic"),
    (".work", TldSeverity::Medium, "Generic"),
    (".monster", TldSeverity::Medium, "Generic"),
    (".rest", TldSeverity::Medium, "Generic"),
    (".buzz", TldSeverity::Medium, "Generic"),
    (".quest", TldSeverity::Medium, "Generic"),
    (".online", TldSeverity::Low, "Generic"),
    (".site", TldSeverity::Low, "Generic"),
    (".space", TldSeverity::Low, "Generic"),
    (".info", TldSeverity::Low, "Generic"),
];

/// Urgency keywords (Indonesian plus borrowed English).
const URGENCY_KEYWORDS: &[&str] = &[
    "segera",
    "mendesak",
    "urgent",
    "buruan",
    "cepat",
    "sekarang juga",
    "hari ini",
    "batas waktu",
    "deadline",
    "jangan sampai",
    "terlewat",
    "kesempatan terakhir",
    "limited",
    "terbatas",
    "akan berakhir",
    "expired",
    "hanya hari ini",
    "promo",
    "gratis",
    "hadiah",
    "verifikasi",
    "diblokir",
    "ditangguhkan",
];

/// Phishing indicator keywords (Indonesian).
const PHISHING_KEYWORDS: &[&str] = &[
    "verifikasi akun",
    "konfirmasi data",
    "update data",
    "akun diblokir",
    "akun ditangguhkan",
    "akun bermasalah",
    "transfer",
    "kirim uang",
    "bayar",
    "pembayaran",
    "hadiah",
    "menang",
    "pemenang",
    "undian",
    "lottery",
    "klik link",
    "klik disini",
    "klik sekarang",
    "login sekarang",
    "masuk sekarang",
    "password",
    "kata sandi",
    "pin",
    "otp",
    "data pribadi",
    "nomor rekening",
    "kartu kredit",
    "beasiswa penuh",
    "lowongan kerja",
    "gaji tinggi",
    "investasi",
    "keuntungan besar",
    "cuan",
    "pinjaman",
    "modal",
    "utang",
    "amanah",
    "dana",
    "keuangan",
    "cair",
];

/// Authority impersonation patterns (campus officialdom).
const AUTHORITY_PATTERNS: &[&str] = &[
    r"dari\s+(pihak\s+)?(kampus|universitas|uir|rektorat|dekanat)",
    r"(admin|operator)\s+(resmi|official)",
    r"pengumuman\s+(penting|resmi)",
    r"surat\s+edaran",
];

/// Suspicious keywords when found in a URL path (not the host).
pub const SUSPICIOUS_PATH_KEYWORDS: &[&str] = &[
    "login",
    "signin",
    "verify",
    "secure",
    "account",
    "update",
    "confirm",
    "bank",
    "paypal",
    "password",
    "credential",
];

/// Look up the suspicion tier of a host's TLD.
#[must_use]
pub fn tld_severity(host: &str) -> Option<(TldSeverity, &'static str)> {
    SUSPICIOUS_TLDS
        .iter()
        .find(|(tld, _, _)| host.ends_with(tld))
        .map(|(_, severity, category)| (*severity, *category))
}

/// Whether a host is a known URL shortener.
#[must_use]
pub fn is_shortener_host(host: &str) -> bool {
    SHORTENER_DOMAINS.contains(&host)
}

/// Whether a URL's host is a known URL shortener.
#[must_use]
pub fn is_shortener_url(url: &str) -> bool {
    host_of(url).is_some_and(|host| is_shortener_host(&host))
}

/// Checks messages and URLs against the deny-list rule tables.
pub struct DenyList {
    blacklisted_domains: HashSet<String>,
    authority_patterns: Vec<Regex>,
}

impl Default for DenyList {
    fn default() -> Self {
        Self::new()
    }
}

impl DenyList {
    #[must_use]
    pub fn new() -> Self {
        Self::with_blacklist(HashSet::new())
    }

    /// Build with additional blacklisted domains (e.g. from reports).
    #[must_use]
    pub fn with_blacklist(custom: HashSet<String>) -> Self {
        let authority_patterns = AUTHORITY_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("invalid authority pattern"))
            .collect();
        Self {
            blacklisted_domains: custom.into_iter().map(|d| d.to_lowercase()).collect(),
            authority_patterns,
        }
    }

    pub fn blacklist(&mut self, domain: &str) {
        self.blacklisted_domains.insert(domain.to_lowercase());
    }

    #[must_use]
    pub fn is_blacklisted(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.blacklisted_domains.contains(&host))
    }

    /// Red flags for a single URL: blacklisted domain, shortener, suspicious
    /// TLD. Discovery order is preserved.
    #[must_use]
    pub fn analyze_url(&self, url: &str) -> Vec<TriageFlag> {
        let mut flags = Vec::new();
        let Some(host) = host_of(url) else {
            return flags;
        };

        if self.blacklisted_domains.contains(&host) {
            flags.push(TriageFlag::new(
                "blacklisted_domain",
                "URL domain is blacklisted",
                10,
                &host,
            ));
        }

        if is_shortener_host(&host) {
            flags.push(TriageFlag::new(
                "shortened_url",
                "URL uses shortener service (hides destination)",
                6,
                &host,
            ));
        }

        if let Some((severity, category)) = tld_severity(&host) {
            flags.push(TriageFlag::new(
                "suspicious_tld",
                &format!("URL uses suspicious TLD ({} / {})", severity.as_str(), category),
                5,
                url,
            ));
        }

        flags
    }

    /// Red flags for message text: urgency keywords (two or more), phishing
    /// keywords, caps-lock abuse, excessive punctuation, authority
    /// impersonation.
    #[must_use]
    pub fn analyze_text(&self, text: &str) -> Vec<TriageFlag> {
        let mut flags = Vec::new();
        let lower = text.to_lowercase();

        let urgency_count = URGENCY_KEYWORDS
            .iter()
            .filter(|keyword| lower.contains(*keyword))
            .count();
        if urgency_count >= 2 {
            flags.push(TriageFlag::new(
                "urgency_keywords",
                &format!("Multiple urgency keywords detected ({urgency_count})"),
                (4 + urgency_count).min(8) as u8,
                &urgency_count.to_string(),
            ));
        }

        let phishing_hits: Vec<&str> = PHISHING_KEYWORDS
            .iter()
            .filter(|keyword| lower.contains(*keyword))
            .copied()
            .collect();
        if !phishing_hits.is_empty() {
            let preview = phishing_hits
                .iter()
                .take(3)
                .copied()
                .collect::<Vec<_>>()
                .join(", ");
            flags.push(TriageFlag::new(
                "phishing_keywords",
                &format!("Phishing indicator keywords: {preview}"),
                (5 + phishing_hits.len()).min(9) as u8,
                &phishing_hits.join(", "),
            ));
        }

        let caps = caps_ratio(text);
        if caps > 0.5 {
            flags.push(TriageFlag::new(
                "caps_lock_abuse",
                &format!("Excessive caps lock usage ({:.0}%)", caps * 100.0),
                4,
                &format!("{:.0}%", caps * 100.0),
            ));
        }

        if has_excessive_punctuation(text) {
            flags.push(TriageFlag::new(
                "excessive_punctuation",
                "Excessive exclamation/question marks",
                3,
                "",
            ));
        }

        if let Some(pattern) = self
            .authority_patterns
            .iter()
            .find(|pattern| pattern.is_match(&lower))
        {
            flags.push(TriageFlag::new(
                "authority_impersonation",
                "Potential authority impersonation detected",
                7,
                pattern.as_str(),
            ));
        }

        flags
    }
}

/// Fraction of letters that are uppercase.
#[must_use]
pub fn caps_ratio(text: &str) -> f64 {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64
}

/// Three or more consecutive `!`/`?`, or more than five in total.
#[must_use]
pub fn has_excessive_punctuation(text: &str) -> bool {
    let mut run = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if c == '!' || c == '?' {
            run += 1;
            total += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    total > 5
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn flag_ids(flags: &[TriageFlag]) -> Vec<&str> {
        flags.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn shortener_host_detection() {
        assert!(is_shortener_url("https://bit.ly/abc"));
        assert!(is_shortener_url("https://s.id/xyz"));
        assert!(!is_shortener_url("https://example.com/bit.ly"));
    }

    #[test]
    fn tld_severity_tiers() {
        assert_eq!(tld_severity("hadiah.tk").unwrap().0, TldSeverity::Critical);
        assert_eq!(tld_severity("shop.xyz").unwrap().0, TldSeverity::High);
        assert_eq!(tld_severity("promo.buzz").unwrap().0, TldSeverity::Medium);
        assert_eq!(tld_severity("blog.site").unwrap().0, TldSeverity::Low);
        assert!(tld_severity("example.com").is_none());
    }

    #[test]
    fn tld_risk_contributions() {
        assert_eq!(TldSeverity::Critical.risk_contribution(), 0.40);
        assert_eq!(TldSeverity::High.risk_contribution(), 0.30);
        assert_eq!(TldSeverity::Medium.risk_contribution(), 0.20);
        assert_eq!(TldSeverity::Low.risk_contribution(), 0.10);
    }

    #[test]
    fn url_flags_for_shortener() {
        let deny = DenyList::new();
        let flags = deny.analyze_url("https://bit.ly/verify");
        assert_eq!(flag_ids(&flags), vec!["shortened_url"]);
    }

    #[test]
    fn url_flags_for_critical_tld() {
        let deny = DenyList::new();
        let flags = deny.analyze_url("https://hadiah.tk/klaim");
        assert_eq!(flag_ids(&flags), vec!["suspicious_tld"]);
    }

    #[test]
    fn url_flags_for_blacklisted_domain() {
        let mut deny = DenyList::new();
        deny.blacklist("evil.example.com");
        let flags = deny.analyze_url("https://evil.example.com/x");
        assert_eq!(flag_ids(&flags), vec!["blacklisted_domain"]);
        assert!(deny.is_blacklisted("https://evil.example.com/y"));
    }

    #[test]
    fn single_urgency_keyword_is_not_flagged() {
        let deny = DenyList::new();
        let flags = deny.analyze_text("Jangan lupa deadline besok");
        assert!(flags.is_empty());
    }

    #[test]
    fn multiple_urgency_keywords_flagged() {
        let deny = DenyList::new();
        let flags = deny.analyze_text("URGENT! Segera verifikasi sebelum batas waktu");
        assert!(flag_ids(&flags).contains(&"urgency_keywords"));
    }

    #[test]
    fn phishing_keywords_flagged() {
        let deny = DenyList::new();
        let flags = deny.analyze_text("Akun diblokir, segera verifikasi akun Anda");
        assert!(flag_ids(&flags).contains(&"phishing_keywords"));
    }

    #[test]
    fn caps_lock_abuse_flagged() {
        let deny = DenyList::new();
        let flags = deny.analyze_text("MENANG UNDIAN BESAR KLIK");
        assert!(flag_ids(&flags).contains(&"caps_lock_abuse"));
    }

    #[test]
    fn caps_ratio_ignores_non_letters() {
        assert_eq!(caps_ratio("123 !!!"), 0.0);
        assert!(caps_ratio("ABC def") > 0.49);
    }

    #[test]
    fn excessive_punctuation_consecutive() {
        assert!(has_excessive_punctuation("URGENT!!! sekarang"));
        assert!(has_excessive_punctuation("a! b! c! d! e! f!"));
        assert!(!has_excessive_punctuation("halo! apa kabar?"));
    }

    #[test]
    fn authority_impersonation_flagged() {
        let deny = DenyList::new();
        let flags = deny.analyze_text("Pengumuman resmi dari pihak kampus untuk semua mahasiswa");
        assert!(flag_ids(&flags).contains(&"authority_impersonation"));
    }

    #[test]
    fn clean_academic_text_has_no_flags() {
        let deny = DenyList::new();
        let flags = deny.analyze_text("Materi kuliah minggu depan sudah diupload ke elearning");
        assert!(flags.is_empty());
    }
}
