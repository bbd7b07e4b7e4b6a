//! Rule-based detection engines for PhishGuard
//!
//! This crate provides the model-free half of the pipeline: URL extraction,
//! the trusted-domain and deny-list rule tables, behavioral anomaly
//! detection, shortened-URL expansion, the four-layer URL security checker,
//! and the rule-based triage stage that decides whether a message needs a
//! model at all.

pub mod behavior;
pub mod checker;
pub mod denylist;
pub mod expander;
pub mod reputation;
pub mod triage;
pub mod trustlist;
pub mod url_extract;

pub use behavior::BehaviorAnalyzer;
pub use checker::{external_risk, heuristic_check, HeuristicVerdict, UrlSecurityChecker};
pub use denylist::{is_shortener_host, is_shortener_url, DenyList, TldSeverity};
pub use expander::HttpRedirectResolver;
pub use reputation::VirusTotalClient;
pub use triage::TriageEngine;
pub use trustlist::TrustedDomains;
pub use url_extract::{UrlExtractor, UrlInfo};
