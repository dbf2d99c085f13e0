//! Shared HTTP plumbing for source connectors.
//!
//! Every connector owns one [`HttpSource`]: a `reqwest::Client` with the
//! connector's timeout and user agent, a [`RateLimiter`] on the shared clock,
//! and an [`ApiResponseCache`] keyed by request URL.

use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::{Clock, RateLimiter, SourceError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Wait used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

// ── API Response Cache ────────────────────────────────────────

struct CacheEntry {
    data: serde_json::Value,
    cached_at: Instant,
}

/// In-memory response cache with TTL and LRU eviction.
pub struct ApiResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ApiResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.data.clone())
    }

    pub fn insert(&self, key: String, data: serde_json::Value) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.lock();

        // Evict the oldest entry when full.
        if entries.len() >= self.max_entries
            && !entries.contains_key(&key)
            && let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, v)| v.cached_at)
                .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest_key);
        }

        entries.insert(
            key,
            CacheEntry {
                data,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ── HTTP Source ───────────────────────────────────────────────

/// Paced, cached JSON GET client for one upstream service.
pub struct HttpSource {
    name: &'static str,
    client: reqwest::Client,
    limiter: RateLimiter,
    cache: ApiResponseCache,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(
        name: &'static str,
        settings: &SourceSettings,
        sources: &SourcesConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .user_agent(sources.user_agent.as_str())
            .build()
            .map_err(|e| SourceError::Misconfigured {
                source_name: name.to_string(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            name,
            client,
            limiter: RateLimiter::new(Duration::from_millis(settings.min_interval_ms), clock),
            cache: ApiResponseCache::new(
                Duration::from_secs(sources.cache_ttl_secs),
                sources.cache_max_entries,
            ),
            timeout,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache(&self) -> &ApiResponseCache {
        &self.cache
    }

    /// GET `url` and decode the body as JSON. Successful bodies are cached.
    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<serde_json::Value, SourceError> {
        if let Some(cached) = self.cache.get(url) {
            debug!(source = self.name, "Cache hit");
            return Ok(cached);
        }

        self.limiter.acquire().await;

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(self.name, &e, self.timeout))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(status_error(self.name, status, retry_after.as_deref()));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(self.name, &e, self.timeout)
            } else {
                SourceError::Malformed {
                    source_name: self.name.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        self.cache.insert(url.to_string(), body.clone());
        Ok(body)
    }
}

/// Map a non-success HTTP status to a connector error.
pub fn status_error(source_name: &str, status: u16, retry_after: Option<&str>) -> SourceError {
    match status {
        429 => SourceError::RateLimited {
            source_name: source_name.to_string(),
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        _ => SourceError::Http {
            source_name: source_name.to_string(),
            status,
        },
    }
}

fn transport_error(source_name: &str, error: &reqwest::Error, timeout: Duration) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout {
            source_name: source_name.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        SourceError::Connection {
            source_name: source_name.to_string(),
            message: error.to_string(),
        }
    }
}

// ── JSON helpers ──────────────────────────────────────────────

pub(crate) fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Strip markup tags and collapse whitespace.
pub(crate) fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
