//! Four-layer URL security checker.
//!
//! Layer 1 expands known shorteners by following redirects. Layer 2 bypasses
//! URLs whose *final* host is in the trust set — expansion runs first
//! precisely so a shortener cannot hide a trusted (or untrusted) destination.
//! Layer 3 accumulates an additive heuristic risk from URL structure.
//! Layer 4 consults an external reputation service when one is configured.
//!
//! The final risk is `max(heuristic, external)` and the malicious flag is the
//! logical OR. Results are cached per URL for a bounded time; lookups never
//! raise into the pipeline.

use crate::denylist::{is_shortener_host, tld_severity, SUSPICIOUS_PATH_KEYWORDS};
use crate::trustlist::TrustedDomains;
use crate::url_extract::{analyze_url, host_of};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use phishguard_core::{
    CheckSource, RedirectResolver, ReputationProvider, ReputationReport, UrlCheckResult,
    UrlCheckerConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Heuristic risk threshold above which a URL is flagged malicious.
const HEURISTIC_MALICIOUS_THRESHOLD: f64 = 0.5;

/// Outcome of the structural heuristic layer.
#[derive(Debug, Clone)]
pub struct HeuristicVerdict {
    pub risk_score: f64,
    pub is_malicious: bool,
    pub risk_factors: Vec<String>,
}

/// Accumulate additive structural risk for one URL, clamped to [0, 1].
#[must_use]
pub fn heuristic_check(url: &str) -> HeuristicVerdict {
    let info = analyze_url(url);
    let host = info.host.as_str();
    let url_lower = url.to_lowercase();

    let mut risk: f64 = 0.0;
    let mut factors = Vec::new();

    if is_ip_literal(host) {
        factors.push("IP address instead of domain".to_string());
        risk += 0.30;
    }

    if host.starts_with("xn--") || host.contains(".xn--") {
        factors.push("Punycode/IDN domain (potential homograph attack)".to_string());
        risk += 0.25;
    }

    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    if url.contains('@') || path.contains('!') {
        factors.push("Unusual characters in URL".to_string());
        risk += 0.20;
    }

    if is_shortener_host(host) {
        factors.push("URL shortener detected".to_string());
        risk += 0.20;
    }

    if host.matches('.').count() > 3 {
        factors.push("Excessive subdomains".to_string());
        risk += 0.15;
    }

    if let Some((severity, category)) = tld_severity(host) {
        factors.push(format!("{}-risk TLD ({category})", severity.as_str()));
        risk += severity.risk_contribution();
    }

    for keyword in SUSPICIOUS_PATH_KEYWORDS {
        if url_lower.contains(keyword) && !host.contains(keyword) {
            factors.push(format!("Suspicious keyword: {keyword}"));
            risk += 0.10;
            break;
        }
    }

    if !info.is_https {
        factors.push("No HTTPS".to_string());
        risk += 0.10;
    }

    if has_numeric_pattern(host) {
        factors.push("Numeric pattern in domain".to_string());
        risk += 0.10;
    }

    let risk_score = risk.min(1.0);
    HeuristicVerdict {
        risk_score,
        is_malicious: risk_score >= HEURISTIC_MALICIOUS_THRESHOLD,
        risk_factors: factors,
    }
}

/// Combine an external reputation report into (risk, malicious).
///
/// Analysis risk is `(malicious + 0.5 * suspicious) / engines_total`; a
/// strongly negative community reputation adds a penalty factor.
#[must_use]
pub fn external_risk(report: &ReputationReport) -> (f64, bool) {
    let total = report.engines_total();
    let analysis_risk = if total > 0 {
        (f64::from(report.malicious) + 0.5 * f64::from(report.suspicious)) / f64::from(total)
    } else {
        0.0
    };

    let reputation = report.reputation.unwrap_or(0);
    let reputation_factor = if reputation < -20 {
        (((100 - reputation) as f64) / 200.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let risk = analysis_risk.max(reputation_factor).min(1.0);
    let malicious = report.malicious >= 3 || reputation < -50 || analysis_risk > 0.15;
    (risk, malicious)
}

fn is_ip_literal(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);
    let parts: Vec<&str> = host.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 3 && p.bytes().all(|b| b.is_ascii_digit()))
}

fn has_numeric_pattern(host: &str) -> bool {
    let label = host.split('.').next().unwrap_or("");
    label
        .as_bytes()
        .windows(2)
        .any(|w| w[0].is_ascii_digit() && w[1].is_ascii_digit())
}

struct CacheEntry {
    result: UrlCheckResult,
    expires_at: Instant,
}

/// The URL security checker. Cheap to share behind an `Arc`; the internal
/// cache serialises writes while keeping reads lock-free.
pub struct UrlSecurityChecker {
    config: UrlCheckerConfig,
    trustlist: TrustedDomains,
    resolver: Arc<dyn RedirectResolver>,
    reputation: Option<Arc<dyn ReputationProvider>>,
    cache: DashMap<String, CacheEntry>,
}

impl UrlSecurityChecker {
    pub fn new(
        config: UrlCheckerConfig,
        trustlist: TrustedDomains,
        resolver: Arc<dyn RedirectResolver>,
        reputation: Option<Arc<dyn ReputationProvider>>,
    ) -> Self {
        Self {
            config,
            trustlist,
            resolver,
            reputation,
            cache: DashMap::new(),
        }
    }

    /// Check a single URL through all four layers. Never errors: network and
    /// parse failures degrade to heuristic-only verdicts.
    pub async fn check_url(&self, url: &str) -> UrlCheckResult {
        if let Some(entry) = self.cache.get(url) {
            if Instant::now() < entry.expires_at {
                debug!(url, "URL check cache hit");
                return entry.result.clone();
            }
            drop(entry);
            self.cache.remove(url);
        }

        let result = self.evaluate(url).await;
        self.cache.insert(
            url.to_string(),
            CacheEntry {
                result: result.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );
        result
    }

    /// Check many URLs with bounded concurrency. When an external reputation
    /// provider is configured, lookups run in batches separated by the
    /// configured delay to respect the provider's quota.
    pub async fn check_urls(&self, urls: &[String]) -> HashMap<String, UrlCheckResult> {
        if urls.is_empty() {
            return HashMap::new();
        }

        let throttled = self
            .reputation
            .as_ref()
            .is_some_and(|provider| provider.is_configured());
        if !throttled {
            return self.check_batch(urls).await;
        }

        let mut results = HashMap::new();
        for (index, batch) in urls.chunks(self.config.reputation_batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.reputation_batch_delay_ms))
                    .await;
            }
            results.extend(self.check_batch(batch).await);
        }
        results
    }

    async fn check_batch(&self, urls: &[String]) -> HashMap<String, UrlCheckResult> {
        stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let result = self.check_url(&url).await;
                (url, result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    async fn evaluate(&self, url: &str) -> UrlCheckResult {
        let host = host_of(url).unwrap_or_default();

        // Layer 1: expansion. Only known shorteners are expanded.
        let mut expanded_url = None;
        let mut redirect_chain = Vec::new();
        if is_shortener_host(&host) {
            match self
                .resolver
                .resolve(
                    url,
                    self.config.max_redirects,
                    Duration::from_millis(self.config.expand_timeout_ms),
                )
                .await
            {
                Ok(expansion) => {
                    if expansion.final_url != url {
                        info!(url, expanded = %expansion.final_url, "URL expanded");
                        expanded_url = Some(expansion.final_url);
                    }
                    redirect_chain = expansion.chain;
                }
                Err(e) => {
                    warn!(url, error = %e, "URL expansion failed");
                    let heuristic = heuristic_check(url);
                    let mut details = HashMap::new();
                    details.insert("error".to_string(), e.to_string());
                    return UrlCheckResult {
                        url: url.to_string(),
                        expanded_url: None,
                        redirect_chain: Vec::new(),
                        is_malicious: heuristic.is_malicious,
                        risk_score: heuristic.risk_score,
                        source: CheckSource::ExpandFailed,
                        risk_factors: heuristic.risk_factors,
                        details,
                    };
                }
            }
        }

        // Layer 2: trust set, evaluated against the final URL.
        let final_url = expanded_url.clone().unwrap_or_else(|| url.to_string());
        if self.trustlist.is_trusted_url(&final_url) {
            info!(url, final_url = %final_url, "trusted domain");
            return UrlCheckResult::trusted(url, expanded_url, redirect_chain);
        }

        // Layer 3: heuristic on both forms; the riskier verdict wins.
        let mut heuristic = heuristic_check(url);
        if let Some(expanded) = &expanded_url {
            let expanded_heuristic = heuristic_check(expanded);
            if expanded_heuristic.risk_score > heuristic.risk_score {
                heuristic = expanded_heuristic;
            }
        }

        // Layer 4: external reputation, when configured. Failures degrade to
        // heuristic-only.
        if let Some(provider) = self
            .reputation
            .as_ref()
            .filter(|provider| provider.is_configured())
        {
            match provider.check_url(&final_url).await {
                Ok(report) => {
                    let (ext_risk, ext_malicious) = external_risk(&report);
                    let mut details = HashMap::new();
                    details.insert("malicious_engines".to_string(), report.malicious.to_string());
                    details.insert(
                        "suspicious_engines".to_string(),
                        report.suspicious.to_string(),
                    );
                    details.insert(
                        "engines_total".to_string(),
                        report.engines_total().to_string(),
                    );
                    if let Some(reputation) = report.reputation {
                        details.insert("reputation".to_string(), reputation.to_string());
                    }

                    let source = if heuristic.risk_factors.is_empty() {
                        CheckSource::External
                    } else {
                        CheckSource::HeuristicExternal
                    };
                    return UrlCheckResult {
                        url: url.to_string(),
                        expanded_url,
                        redirect_chain,
                        is_malicious: ext_malicious || heuristic.is_malicious,
                        risk_score: heuristic.risk_score.max(ext_risk),
                        source,
                        risk_factors: heuristic.risk_factors,
                        details,
                    };
                }
                Err(e) => {
                    warn!(url, error = %e, "reputation lookup failed, heuristic stands alone");
                }
            }
        }

        UrlCheckResult {
            url: url.to_string(),
            expanded_url,
            redirect_chain,
            is_malicious: heuristic.is_malicious,
            risk_score: heuristic.risk_score,
            source: CheckSource::Heuristic,
            risk_factors: heuristic.risk_factors,
            details: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use phishguard_core::{Expansion, PhishGuardError, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Resolver backed by a static map; counts how many times it runs.
    struct FakeResolver {
        redirects: HashMap<String, String>,
        fail: bool,
        calls: AtomicU32,
    }

    impl FakeResolver {
        fn new(redirects: &[(&str, &str)]) -> Self {
            Self {
                redirects: redirects
                    .iter()
                    .map(|(from, to)| ((*from).to_string(), (*to).to_string()))
                    .collect(),
                fail: false,
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                redirects: HashMap::new(),
                fail: true,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RedirectResolver for FakeResolver {
        async fn resolve(
            &self,
            url: &str,
            _max_redirects: u32,
            _timeout: Duration,
        ) -> Result<Expansion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PhishGuardError::Transport("expansion timeout".to_string()));
            }
            match self.redirects.get(url) {
                Some(target) => Ok(Expansion {
                    final_url: target.clone(),
                    chain: vec![target.clone()],
                }),
                None => Ok(Expansion {
                    final_url: url.to_string(),
                    chain: Vec::new(),
                }),
            }
        }
    }

    struct FakeReputation {
        report: ReputationReport,
    }

    #[async_trait]
    impl ReputationProvider for FakeReputation {
        async fn check_url(&self, _url: &str) -> Result<ReputationReport> {
            Ok(self.report.clone())
        }

        async fn check_domain(&self, _host: &str) -> Result<ReputationReport> {
            Ok(self.report.clone())
        }
    }

    fn checker_with(
        resolver: FakeResolver,
        reputation: Option<FakeReputation>,
    ) -> UrlSecurityChecker {
        UrlSecurityChecker::new(
            UrlCheckerConfig::default(),
            TrustedDomains::new(),
            Arc::new(resolver),
            reputation.map(|r| Arc::new(r) as Arc<dyn ReputationProvider>),
        )
    }

    // -- Heuristic layer --

    #[test]
    fn heuristic_critical_tld() {
        let verdict = heuristic_check("https://hadiah.tk/klaim");
        assert!((verdict.risk_score - 0.40).abs() < 1e-9);
        assert!(!verdict.is_malicious);
    }

    #[test]
    fn heuristic_ip_literal_with_login_path_is_malicious() {
        // 0.30 IP + 0.10 keyword + 0.10 no-HTTPS + 0.10 numeric = 0.60
        let verdict = heuristic_check("http://192.168.0.1/login");
        assert!(verdict.is_malicious);
        assert!((verdict.risk_score - 0.60).abs() < 1e-9);
    }

    #[test]
    fn heuristic_punycode_host() {
        let verdict = heuristic_check("https://xn--gogle-55a.com/x");
        assert!(verdict
            .risk_factors
            .iter()
            .any(|f| f.contains("Punycode")));
    }

    #[test]
    fn heuristic_shortener_contribution() {
        let verdict = heuristic_check("https://bit.ly/abc");
        assert!((verdict.risk_score - 0.20).abs() < 1e-9);
        assert_eq!(verdict.risk_factors, vec!["URL shortener detected"]);
    }

    #[test]
    fn heuristic_unusual_characters() {
        let verdict = heuristic_check("https://example.com/a!b");
        assert!(verdict
            .risk_factors
            .iter()
            .any(|f| f.contains("Unusual characters")));
    }

    #[test]
    fn heuristic_excessive_subdomains() {
        let verdict = heuristic_check("https://a.b.c.d.example.com/x");
        assert!(verdict
            .risk_factors
            .iter()
            .any(|f| f.contains("Excessive subdomains")));
    }

    #[test]
    fn heuristic_clean_url_scores_zero() {
        let verdict = heuristic_check("https://example.com/materi");
        assert_eq!(verdict.risk_score, 0.0);
        assert!(verdict.risk_factors.is_empty());
        assert!(!verdict.is_malicious);
    }

    #[test]
    fn heuristic_risk_is_clamped() {
        // IP + punycode-free stacking cannot exceed 1.0.
        let verdict = heuristic_check("http://10.0.0.1/verify@login!x.tk");
        assert!(verdict.risk_score <= 1.0);
    }

    // -- External layer --

    #[test]
    fn external_risk_from_engine_counts() {
        let report = ReputationReport {
            malicious: 5,
            suspicious: 2,
            harmless: 60,
            undetected: 3,
            reputation: Some(0),
        };
        let (risk, malicious) = external_risk(&report);
        // (5 + 1) / 70
        assert!((risk - 6.0 / 70.0).abs() < 1e-9);
        assert!(malicious); // 5 engines >= 3
    }

    #[test]
    fn external_risk_from_negative_reputation() {
        let report = ReputationReport {
            malicious: 0,
            suspicious: 0,
            harmless: 10,
            undetected: 0,
            reputation: Some(-80),
        };
        let (risk, malicious) = external_risk(&report);
        // (100 - (-80)) / 200 = 0.9
        assert!((risk - 0.9).abs() < 1e-9);
        assert!(malicious); // reputation < -50
    }

    #[test]
    fn external_risk_clean_report() {
        let report = ReputationReport {
            malicious: 0,
            suspicious: 0,
            harmless: 70,
            undetected: 5,
            reputation: Some(40),
        };
        let (risk, malicious) = external_risk(&report);
        assert_eq!(risk, 0.0);
        assert!(!malicious);
    }

    // -- Checker layers --

    #[tokio::test]
    async fn direct_trusted_host_bypasses_everything() {
        let checker = checker_with(FakeResolver::new(&[]), None);
        let result = checker
            .check_url("https://classroom.google.com/c/abc")
            .await;
        assert_eq!(result.source, CheckSource::Whitelist);
        assert_eq!(result.risk_score, 0.0);
        assert!(!result.is_malicious);
        assert!(result.expanded_url.is_none());
    }

    #[tokio::test]
    async fn shortener_expanding_to_trusted_is_whitelisted() {
        let resolver = FakeResolver::new(&[(
            "https://bit.ly/materi-kuliah",
            "https://docs.google.com/document/d/1",
        )]);
        let checker = checker_with(resolver, None);
        let result = checker.check_url("https://bit.ly/materi-kuliah").await;
        assert_eq!(result.source, CheckSource::Whitelist);
        assert_eq!(result.risk_score, 0.0);
        assert_eq!(
            result.expanded_url.as_deref(),
            Some("https://docs.google.com/document/d/1")
        );
        assert_eq!(result.redirect_chain.len(), 1);
    }

    #[tokio::test]
    async fn shortener_expanding_to_critical_tld_is_risky() {
        let resolver =
            FakeResolver::new(&[("https://bit.ly/verify", "https://akun-verif.tk/login")]);
        let checker = checker_with(resolver, None);
        let result = checker.check_url("https://bit.ly/verify").await;
        assert_eq!(result.source, CheckSource::Heuristic);
        // Expanded form: 0.40 critical TLD + 0.10 login keyword = 0.50.
        assert!(result.risk_score >= 0.5);
        assert!(result.is_malicious);
    }

    #[tokio::test]
    async fn expansion_failure_is_a_distinct_signal() {
        let checker = checker_with(FakeResolver::failing(), None);
        let result = checker.check_url("https://bit.ly/broken").await;
        assert_eq!(result.source, CheckSource::ExpandFailed);
        assert!(result.expanded_url.is_none());
        assert!(result.details.contains_key("error"));
    }

    #[tokio::test]
    async fn non_shortener_is_not_expanded() {
        let resolver = FakeResolver::new(&[]);
        let checker = checker_with(resolver, None);
        let result = checker.check_url("https://scholarship.xyz/apply").await;
        assert_eq!(result.source, CheckSource::Heuristic);
        assert!(result.expanded_url.is_none());
        // High-tier TLD contribution.
        assert!((result.risk_score - 0.30).abs() < 1e-9);
    }

    #[tokio::test]
    async fn external_reputation_combines_with_heuristic() {
        let reputation = FakeReputation {
            report: ReputationReport {
                malicious: 4,
                suspicious: 0,
                harmless: 56,
                undetected: 10,
                reputation: Some(-10),
            },
        };
        let checker = checker_with(FakeResolver::new(&[]), Some(reputation));
        let result = checker.check_url("https://shop.xyz/promo").await;
        assert_eq!(result.source, CheckSource::HeuristicExternal);
        assert!(result.is_malicious); // 4 engines >= 3
        // Heuristic 0.30 beats analysis risk 4/70.
        assert!((result.risk_score - 0.30).abs() < 1e-9);
        assert_eq!(result.details.get("malicious_engines").unwrap(), "4");
    }

    #[tokio::test]
    async fn clean_host_with_external_only_evidence() {
        let reputation = FakeReputation {
            report: ReputationReport {
                malicious: 0,
                suspicious: 0,
                harmless: 70,
                undetected: 0,
                reputation: Some(10),
            },
        };
        let checker = checker_with(FakeResolver::new(&[]), Some(reputation));
        let result = checker.check_url("https://unknown-campus.org/page").await;
        assert_eq!(result.source, CheckSource::External);
        assert!(!result.is_malicious);
    }

    #[tokio::test]
    async fn repeated_checks_hit_the_cache() {
        let resolver = Arc::new(FakeResolver::new(&[(
            "https://bit.ly/x",
            "https://docs.google.com/d/2",
        )]));
        let checker = UrlSecurityChecker::new(
            UrlCheckerConfig::default(),
            TrustedDomains::new(),
            resolver.clone(),
            None,
        );

        let first = checker.check_url("https://bit.ly/x").await;
        let second = checker.check_url("https://bit.ly/x").await;
        assert_eq!(first.source, second.source);
        assert_eq!(first.risk_score, second.risk_score);
        assert_eq!(first.expanded_url, second.expanded_url);

        // The resolver ran exactly once; the second check came from cache.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_urls_returns_entry_per_url() {
        let checker = checker_with(FakeResolver::new(&[]), None);
        let urls = vec![
            "https://docs.google.com/d/1".to_string(),
            "https://hadiah.tk/klaim".to_string(),
        ];
        let results = checker.check_urls(&urls).await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results["https://docs.google.com/d/1"].source,
            CheckSource::Whitelist
        );
        assert_eq!(
            results["https://hadiah.tk/klaim"].source,
            CheckSource::Heuristic
        );
    }

    #[tokio::test]
    async fn empty_url_list_is_empty_map() {
        let checker = checker_with(FakeResolver::new(&[]), None);
        assert!(checker.check_urls(&[]).await.is_empty());
    }

    // -- helpers --

    #[test]
    fn ip_literal_detection() {
        assert!(is_ip_literal("192.168.0.1"));
        assert!(is_ip_literal("10.0.0.1:8080"));
        assert!(!is_ip_literal("example.com"));
        assert!(!is_ip_literal("1.2.3"));
    }

    #[test]
    fn numeric_pattern_detection() {
        assert!(has_numeric_pattern("bank12-login.com"));
        assert!(!has_numeric_pattern("web2print.com"));
        assert!(!has_numeric_pattern("example.com"));
    }
}
