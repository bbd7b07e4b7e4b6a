//! External reputation service client (VirusTotal API v3 compatible).
//!
//! Supplies raw engine verdict counts and community reputation; the risk
//! arithmetic lives in the URL security checker. Lookup failures are
//! non-fatal — the checker degrades to heuristic-only.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use phishguard_core::{PhishGuardError, ReputationProvider, ReputationReport, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// VirusTotal API v3 client.
pub struct VirusTotalClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VirusTotalClient {
    /// Build a client. An empty API key produces an unconfigured client
    /// that the checker will skip.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PhishGuardError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// URL identifier: URL-safe base64 without padding.
    #[must_use]
    pub fn url_id(url: &str) -> String {
        URL_SAFE_NO_PAD.encode(url.as_bytes())
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .header("x-apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| PhishGuardError::Transport(format!("reputation request: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(PhishGuardError::Transport("not found".to_string()));
        }
        if status.as_u16() == 429 {
            return Err(PhishGuardError::RateLimited {
                retry_after_secs: 60,
            });
        }
        if !status.is_success() {
            return Err(PhishGuardError::Transport(format!(
                "reputation service returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PhishGuardError::Transport(format!("reputation body: {e}")))
    }
}

#[async_trait]
impl ReputationProvider for VirusTotalClient {
    async fn check_url(&self, url: &str) -> Result<ReputationReport> {
        match self.get_json(&format!("urls/{}", Self::url_id(url))).await {
            Ok(body) => Ok(parse_analysis_stats(&body)),
            Err(e) => {
                // Unknown URL: fall back to domain reputation.
                warn!(url, error = %e, "URL lookup failed, falling back to domain");
                let host = Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .ok_or_else(|| PhishGuardError::Transport("no host in url".to_string()))?;
                self.check_domain(&host).await
            }
        }
    }

    async fn check_domain(&self, host: &str) -> Result<ReputationReport> {
        let body = self.get_json(&format!("domains/{host}")).await?;
        Ok(parse_analysis_stats(&body))
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Pull `last_analysis_stats` and `reputation` out of a v3 response body.
fn parse_analysis_stats(body: &Value) -> ReputationReport {
    let attrs = &body["data"]["attributes"];
    let stats = &attrs["last_analysis_stats"];
    let count = |key: &str| stats[key].as_u64().unwrap_or(0) as u32;

    ReputationReport {
        malicious: count("malicious"),
        suspicious: count("suspicious"),
        harmless: count("harmless"),
        undetected: count("undetected"),
        reputation: attrs["reputation"].as_i64(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_id_is_urlsafe_base64_without_padding() {
        // "ab" -> "YWI=" in standard base64; padding must be stripped.
        assert_eq!(VirusTotalClient::url_id("ab"), "YWI");
        assert_eq!(VirusTotalClient::url_id("abc"), "YWJj");
    }

    #[test]
    fn parses_analysis_stats() {
        let body = json!({
            "data": {
                "attributes": {
                    "last_analysis_stats": {
                        "malicious": 5,
                        "suspicious": 2,
                        "harmless": 60,
                        "undetected": 3
                    },
                    "reputation": -73
                }
            }
        });
        let report = parse_analysis_stats(&body);
        assert_eq!(report.malicious, 5);
        assert_eq!(report.suspicious, 2);
        assert_eq!(report.engines_total(), 70);
        assert_eq!(report.reputation, Some(-73));
    }

    #[test]
    fn missing_stats_parse_to_zeroes() {
        let report = parse_analysis_stats(&json!({}));
        assert_eq!(report.engines_total(), 0);
        assert!(report.reputation.is_none());
    }

    #[test]
    fn empty_key_is_unconfigured() {
        let client = VirusTotalClient::new("").unwrap();
        assert!(!client.is_configured());
        let client = VirusTotalClient::new("key").unwrap();
        assert!(client.is_configured());
    }
}
