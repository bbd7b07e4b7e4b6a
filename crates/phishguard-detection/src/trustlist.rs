//! Trusted-domain set.
//!
//! Messages whose URLs all resolve into this set bypass the model stages
//! entirely. Matching is by registered suffix: `docs.google.com` matches the
//! `google.com` entry, and any `*.ac.id` host matches the Indonesian academic
//! suffix.

use crate::url_extract::host_of;
use std::collections::HashSet;

/// Academic platforms and institutions.
const ACADEMIC_DOMAINS: &[&str] = &[
    // Indonesian academic suffixes and institutions
    "ac.id",
    "uir.ac.id",
    "kemdikbud.go.id",
    "dikti.go.id",
    "lldikti.go.id",
    // Platforms
    "classroom.google.com",
    "docs.google.com",
    "drive.google.com",
    "forms.google.com",
    "scholar.google.com",
    "github.com",
    "gitlab.com",
    "stackoverflow.com",
    "medium.com",
    "researchgate.net",
    "academia.edu",
    "ieee.org",
    "acm.org",
    "springer.com",
    "sciencedirect.com",
];

/// Large corporate platforms commonly shared in academic groups.
const PLATFORM_DOMAINS: &[&str] = &[
    "google.com",
    "google.co.id",
    "youtube.com",
    "youtu.be",
    "microsoft.com",
    "office.com",
    "live.com",
    "outlook.com",
    "onedrive.com",
    "sharepoint.com",
];

/// Meeting platforms.
const MEETING_DOMAINS: &[&str] = &[
    "zoom.us",
    "meet.google.com",
    "teams.microsoft.com",
    "webex.com",
    "discord.com",
    "discord.gg",
];

/// Social and messaging platforms.
const SOCIAL_DOMAINS: &[&str] = &[
    "linkedin.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "facebook.com",
    "whatsapp.com",
    "wa.me",
    "telegram.org",
    "t.me",
];

/// Indonesian government suffix and services.
const GOV_DOMAINS: &[&str] = &["go.id", "kemenkeu.go.id", "pajak.go.id", "bps.go.id"];

/// Configured set of trusted registered suffixes.
#[derive(Debug, Clone)]
pub struct TrustedDomains {
    domains: HashSet<String>,
}

impl Default for TrustedDomains {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustedDomains {
    /// Build the default trust set.
    #[must_use]
    pub fn new() -> Self {
        let domains = ACADEMIC_DOMAINS
            .iter()
            .chain(PLATFORM_DOMAINS)
            .chain(MEETING_DOMAINS)
            .chain(SOCIAL_DOMAINS)
            .chain(GOV_DOMAINS)
            .map(|d| (*d).to_string())
            .collect();
        Self { domains }
    }

    /// Extend the default set with deployment-specific domains.
    #[must_use]
    pub fn with_custom(custom: impl IntoIterator<Item = String>) -> Self {
        let mut set = Self::new();
        for domain in custom {
            set.domains.insert(domain.to_lowercase());
        }
        set
    }

    /// Whether a host is trusted, by exact match or registered suffix.
    #[must_use]
    pub fn contains_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        if self.domains.contains(&host) {
            return true;
        }
        self.domains
            .iter()
            .any(|trusted| host.ends_with(&format!(".{trusted}")))
    }

    /// Whether a URL's host is trusted.
    #[must_use]
    pub fn is_trusted_url(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.contains_host(&host))
    }

    /// Partition URLs into (whitelisted, non-whitelisted), preserving order.
    #[must_use]
    pub fn partition<'a>(&self, urls: &'a [String]) -> (Vec<&'a String>, Vec<&'a String>) {
        urls.iter().partition(|url| self.is_trusted_url(url))
    }

    pub fn insert(&mut self, domain: &str) {
        self.domains.insert(domain.to_lowercase());
    }

    pub fn remove(&mut self, domain: &str) {
        self.domains.remove(&domain.to_lowercase());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
