//! Domain-based trust filtering.
//!
//! Blacklist keywords win over the whitelist. A non-empty whitelist admits
//! only its domains and their subdomains.

use crate::config::TrustConfig;
use crate::types::CanonicalResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

/// Why a result was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Blacklisted,
    NotWhitelisted,
    InvalidUrl,
    MissingUrl,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Blacklisted => "blacklisted",
            DropReason::NotWhitelisted => "not_whitelisted",
            DropReason::InvalidUrl => "invalid_url",
            DropReason::MissingUrl => "missing_url",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrustOutcome {
    pub kept: Vec<CanonicalResult>,
    pub dropped: Vec<(CanonicalResult, DropReason)>,
}

#[derive(Debug, Clone)]
pub struct TrustFilter {
    whitelist: Vec<String>,
    blacklist: Vec<String>,
    keep_missing_url: bool,
}

impl TrustFilter {
    pub fn new(config: &TrustConfig) -> Self {
        let normalize = |entries: &[String]| -> Vec<String> {
            entries
                .iter()
                .map(|e| strip_www(e.trim().trim_end_matches('.')).to_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        };
        Self {
            whitelist: normalize(&config.whitelist),
            blacklist: normalize(&config.blacklist),
            keep_missing_url: config.keep_missing_url,
        }
    }

    /// Split `results` into trusted and dropped, preserving order.
    pub fn filter(&self, results: Vec<CanonicalResult>) -> TrustOutcome {
        let mut outcome = TrustOutcome::default();
        for result in results {
            match self.check(&result.url) {
                None => outcome.kept.push(result),
                Some(reason) => {
                    debug!(
                        url = %result.url,
                        title = %result.title,
                        reason = reason.as_str(),
                        "Dropping untrusted result"
                    );
                    outcome.dropped.push((result, reason));
                }
            }
        }
        if !outcome.dropped.is_empty() {
            info!(
                kept = outcome.kept.len(),
                dropped = outcome.dropped.len(),
                "Trust filter applied"
            );
        }
        outcome
    }

    /// `None` when the URL is trusted.
    pub fn check(&self, url: &str) -> Option<DropReason> {
        let url = url.trim();
        if url.is_empty() {
            return (!self.keep_missing_url).then_some(DropReason::MissingUrl);
        }
        let Some(domain) = domain_of(url) else {
            return Some(DropReason::InvalidUrl);
        };
        if self.blacklist.iter().any(|k| domain.contains(k.as_str())) {
            return Some(DropReason::Blacklisted);
        }
        if !self.whitelist.is_empty()
            && !self.whitelist.iter().any(|w| is_same_or_subdomain(&domain, w))
        {
            return Some(DropReason::NotWhitelisted);
        }
        None
    }
}

/// Lowercased host with a leading `www.` removed.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(strip_www(&host).to_string())
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn is_same_or_subdomain(domain: &str, entry: &str) -> bool {
    domain == entry
        || domain
            .strip_suffix(entry)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
