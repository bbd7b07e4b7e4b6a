//! URL extraction and normalisation.
//!
//! Finds URL-like tokens in free text: absolute URLs with an explicit scheme,
//! bare `www.` hosts, and `host.tld/...` tokens. Chat messages have no
//! reliable code spans, so tokens inside code fences are extracted like any
//! other text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Trailing characters that are almost always prose punctuation, not part of
/// the URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']'];

/// Structural information about one extracted URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlInfo {
    /// The token as it appeared in the text.
    pub raw: String,
    /// Normalised form: default scheme imposed, trailing punctuation stripped.
    pub normalized: String,
    /// Lowercased host without a `www.` prefix or port.
    pub host: String,
    /// Effective top-level domain including the leading dot (e.g. `.tk`).
    pub tld: String,
    /// Number of path segments.
    pub path_depth: u32,
    /// Whether the (normalised) transport is HTTPS.
    pub is_https: bool,
}

/// Extracts and normalises URLs from message text.
pub struct UrlExtractor {
    pattern: Regex,
}

impl Default for UrlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlExtractor {
    pub fn new() -> Self {
        // Four alternatives: scheme-qualified, bare www., host.tld/path, and
        // a pathless host whose TLD is plausibly registered.
        let pattern = Regex::new(
            r#"(?i)https?://[^\s<>"{}|\\^`\[\]]+|www\.[^\s<>"{}|\\^`\[\]]+|(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}/[^\s<>"{}|\\^`\[\]]*|(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+(?:com|net|org|edu|gov|id|io|co|me|tv|cc|biz|info|online|site|space|xyz|top|click|link|icu|work|monster|rest|buzz|quest|tk|ml|ga|cf|gq)\b"#,
        )
        .expect("invalid URL extraction pattern");
        Self { pattern }
    }

    /// Extract all URLs from `text` as normalised strings, ordered by first
    /// appearance and deduplicated. No URLs is an empty list, never an error.
    #[must_use]
    pub fn extract_urls(&self, text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();
        for token in self.pattern.find_iter(text) {
            let normalized = normalize_url(token.as_str());
            if normalized.is_empty() {
                continue;
            }
            if seen.insert(normalized.clone()) {
                urls.push(normalized);
            }
        }
        urls
    }

    /// Extract URLs with structural analysis attached.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<UrlInfo> {
        self.extract_urls(text)
            .into_iter()
            .map(|normalized| analyze_url(&normalized))
            .collect()
    }

    /// Quick containment check without allocation of the full list.
    #[must_use]
    pub fn has_urls(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Impose the default scheme and strip trailing prose punctuation.
#[must_use]
pub fn normalize_url(token: &str) -> String {
    let trimmed = token.trim().trim_end_matches(TRAILING_PUNCTUATION);
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Analyse a normalised URL's structure. Unparseable URLs degrade to an
/// empty host rather than an error.
#[must_use]
pub fn analyze_url(normalized: &str) -> UrlInfo {
    let (host, path, is_https) = match Url::parse(normalized) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or("").to_lowercase(),
            parsed.path().to_string(),
            parsed.scheme() == "https",
        ),
        Err(_) => (String::new(), String::new(), false),
    };

    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let tld = host
        .rsplit('.')
        .next()
        .filter(|part| !part.is_empty() && *part != host)
        .map(|part| format!(".{part}"))
        .unwrap_or_default();

    let trimmed_path = path.trim_matches('/');
    let path_depth = if trimmed_path.is_empty() {
        0
    } else {
        trimmed_path.split('/').count() as u32
    };

    UrlInfo {
        raw: normalized.to_string(),
        normalized: normalized.to_string(),
        host,
        tld,
        path_depth,
        is_https,
    }
}

/// Lowercased host of a URL, without `www.` prefix or port. Accepts bare
/// hosts by imposing the default scheme first.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    let candidate = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    let parsed = Url::parse(&candidate).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_absolute_url() {
        let extractor = UrlExtractor::new();
        let urls = extractor.extract_urls("cek https://example.com/page ya");
        assert_eq!(urls, vec!["https://example.com/page"]);
    }

    #[test]
    fn extracts_www_url_with_default_scheme() {
        let extractor = UrlExtractor::new();
        let urls = extractor.extract_urls("lihat www.example.com sekarang");
        assert_eq!(urls, vec!["https://www.example.com"]);
    }

    #[test]
    fn extracts_bare_host_with_path() {
        let extractor = UrlExtractor::new();
        let urls = extractor.extract_urls("materi di classroom.google.com/c/abc");
        assert_eq!(urls, vec!["https://classroom.google.com/c/abc"]);
    }

    #[test]
    fn strips_trailing_punctuation() {
        let extractor = UrlExtractor::new();
        let urls = extractor.extract_urls("buka https://example.com/x.");
        assert_eq!(urls, vec!["https://example.com/x"]);

        let urls = extractor.extract_urls("cek (https://example.com/y)!");
        assert_eq!(urls, vec!["https://example.com/y"]);
    }

    #[test]
    fn no_urls_yields_empty_list() {
        let extractor = UrlExtractor::new();
        assert!(extractor.extract_urls("Jangan lupa deadline besok").is_empty());
        assert!(!extractor.has_urls("halo semua"));
    }

    #[test]
    fn deduplicates_preserving_order() {
        let extractor = UrlExtractor::new();
        let urls = extractor
            .extract_urls("https://a.com/1 lalu https://b.com/2 lalu https://a.com/1 lagi");
        assert_eq!(urls, vec!["https://a.com/1", "https://b.com/2"]);
    }

    #[test]
    fn bare_host_with_registered_tld_is_extracted() {
        let extractor = UrlExtractor::new();
        let urls = extractor.extract_urls("Beasiswa S2 Jepang, gratis! scholarship.xyz");
        assert_eq!(urls, vec!["https://scholarship.xyz"]);
    }

    #[test]
    fn bare_token_with_unknown_tld_is_not_extracted() {
        // File names and prose abbreviations must not look like URLs.
        let extractor = UrlExtractor::new();
        assert!(extractor.extract_urls("jalankan main.py dulu").is_empty());
        assert!(extractor.extract_urls("tanya di forum baik-baik").is_empty());
    }

    #[test]
    fn analyze_reports_host_tld_and_depth() {
        let info = analyze_url("https://sub.hadiah.tk/klaim/sekarang");
        assert_eq!(info.host, "sub.hadiah.tk");
        assert_eq!(info.tld, ".tk");
        assert_eq!(info.path_depth, 2);
        assert!(info.is_https);
    }

    #[test]
    fn analyze_flags_insecure_transport() {
        let info = analyze_url("http://example.com/login");
        assert!(!info.is_https);
        assert_eq!(info.path_depth, 1);
    }

    #[test]
    fn host_of_strips_www_and_handles_bare_hosts() {
        assert_eq!(host_of("https://www.Example.com/x"), Some("example.com".to_string()));
        assert_eq!(host_of("bit.ly/abc"), Some("bit.ly".to_string()));
        assert_eq!(host_of("https://docs.google.com:443/d"), Some("docs.google.com".to_string()));
    }

    #[test]
    fn url_inside_code_fence_is_still_extracted() {
        let extractor = UrlExtractor::new();
        let urls = extractor.extract_urls("```\nhttps://example.com/in-fence\n```");
        assert_eq!(urls, vec!["https://example.com/in-fence"]);
    }
}
