//! Shortened-URL expansion by following HTTP redirects.
//!
//! Issues HEAD requests hop by hop (falling back to GET when a server
//! rejects the method) so redirect chains are recorded without downloading
//! bodies. Relative `Location` headers are resolved against the current hop.

use async_trait::async_trait;
use phishguard_core::{Expansion, PhishGuardError, RedirectResolver, Result};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = "PhishGuard-URLChecker/1.0";

/// Follows redirect chains over live HTTP.
pub struct HttpRedirectResolver {
    client: reqwest::Client,
}

impl HttpRedirectResolver {
    /// Build the resolver. Automatic redirect following is disabled: each
    /// hop is taken manually so the chain can be recorded and capped.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PhishGuardError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// One request at `url`; returns the redirect target if the response is
    /// a redirection with a `Location` header.
    async fn next_hop(
        &self,
        url: &str,
        method: Method,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let response = self
            .client
            .request(method, url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_redirection() {
            // 405 means the server dislikes HEAD; the caller retries with GET.
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                return Err(PhishGuardError::Transport("method not allowed".to_string()));
            }
            return Ok(None);
        }

        let Some(location) = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(None);
        };

        let base = Url::parse(url)
            .map_err(|e| PhishGuardError::Transport(format!("invalid hop url: {e}")))?;
        let target = base
            .join(location)
            .map_err(|e| PhishGuardError::Transport(format!("invalid redirect target: {e}")))?;
        Ok(Some(target.to_string()))
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve(
        &self,
        url: &str,
        max_redirects: u32,
        timeout: Duration,
    ) -> Result<Expansion> {
        let mut current = url.to_string();
        let mut chain = Vec::new();

        for _ in 0..max_redirects {
            let hop = match self.next_hop(&current, Method::HEAD, timeout).await {
                Ok(hop) => hop,
                Err(e) if e.is_transient() => {
                    debug!(url = %current, error = %e, "HEAD failed, retrying hop with GET");
                    self.next_hop(&current, Method::GET, timeout).await?
                }
                Err(e) => return Err(e),
            };

            match hop {
                Some(next) => {
                    chain.push(next.clone());
                    current = next;
                }
                None => {
                    return Ok(Expansion {
                        final_url: current,
                        chain,
                    });
                }
            }
        }

        warn!(url, max_redirects, "redirect chain exceeded hop cap");
        Err(PhishGuardError::Transport("too many redirects".to_string()))
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> PhishGuardError {
    if error.is_timeout() {
        PhishGuardError::Transport("expansion timeout".to_string())
    } else {
        PhishGuardError::Transport(format!("expansion request failed: {error}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
