//! LLM-backed strategy and synthesis oracles.
//!
//! Both talk to an OpenAI-compatible `/chat/completions` endpoint through
//! [`ChatClient`]. Model replies are parsed tolerantly: code fences and
//! surrounding prose are ignored, the first well-formed JSON object wins.

use async_trait::async_trait;
use evidex_core::config::LlmConfig;
use evidex_core::research::{NarrativeSection, NarrativeSections, OracleStrategy, ProposedStrategy};
use evidex_core::retry::retry_with_backoff;
use evidex_core::{
    CanonicalResult, Clock, OracleError, RetryPolicy, SourceKind, StrategyOracle, SynthesisOracle,
    TaskInput, TokioClock,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 5;

// ── Chat client ───────────────────────────────────────────────

/// Minimal OpenAI-compatible chat completion client.
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    timeout: Duration,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, OracleError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .build()
            .map_err(|e| OracleError::Unavailable {
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            temperature: config.temperature,
            timeout,
            retry: RetryPolicy::none(),
            clock: Arc::new(TokioClock),
        })
    }

    /// Retry rate-limited and timed-out completions.
    pub fn with_retry(mut self, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        self.retry = policy;
        self.clock = clock;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one system+user exchange and return the assistant text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        // The caller owns cancellation by dropping this future.
        let never = CancellationToken::new();
        retry_with_backoff(self.clock.as_ref(), &self.retry, &never, None, || {
            self.complete_once(system, user)
        })
        .await
    }

    async fn complete_once(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "stream": false,
        });

        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                OracleError::Request {
                    message: format!("Request failed: {e}"),
                }
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|e| OracleError::Request {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !(200..300).contains(&status) {
            return Err(map_http_error(&self.base_url, status, &text, retry_after.as_deref()));
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| OracleError::Malformed {
            message: format!("Invalid JSON: {e}"),
        })?;
        parse_completion(&json)
    }
}

/// Map an HTTP status to the matching oracle error.
pub fn map_http_error(endpoint: &str, status: u16, body: &str, retry_after: Option<&str>) -> OracleError {
    match status {
        401 | 403 => {
            debug!(body = %body, status, "Authentication failed");
            OracleError::AuthFailed {
                endpoint: endpoint.to_string(),
            }
        }
        429 => OracleError::RateLimited {
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS),
        },
        status if status >= 500 => OracleError::Request {
            message: format!("Server error ({status}): {body}"),
        },
        _ => OracleError::Request {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

/// Assistant text of the first choice.
pub fn parse_completion(json: &Value) -> Result<String, OracleError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| OracleError::Malformed {
            message: "No choices[0].message.content in response".into(),
        })
}

/// First JSON object embedded in model output.
///
/// Accepts bare JSON, fenced blocks and JSON surrounded by prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let mut start = 0;
    while let Some(offset) = trimmed[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(&trimmed[open..])
            && let Ok(value @ Value::Object(_)) =
                serde_json::from_str::<Value>(&trimmed[open..open + close + 1])
        {
            return Some(value);
        }
        start = open + 1;
    }
    None
}

/// Byte offset of the brace closing the one at the start of `s`.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Strategy oracle ───────────────────────────────────────────

const STRATEGY_SYSTEM_PROMPT: &str = "You plan literature searches for evidence-based clinical questions. \
Reply with a single JSON object and nothing else, shaped as \
{\"refined_query\": string, \"strategies\": [{\"source\": string, \"query\": string, \"rationale\": string}]}. \
Use only the listed sources. PubMed queries may use MeSH terms and field tags.";

/// Strategy oracle backed by a chat model.
pub struct LlmStrategyOracle {
    chat: Arc<ChatClient>,
    sources: Vec<SourceKind>,
}

impl LlmStrategyOracle {
    /// `sources` are the kinds the model may propose.
    pub fn new(chat: Arc<ChatClient>, sources: Vec<SourceKind>) -> Self {
        Self { chat, sources }
    }

    pub fn build_prompt(&self, input: &TaskInput) -> String {
        let mut prompt = format!("Question: {}\n", input.effective_query());
        for (label, value) in [
            ("Population", input.pico.population()),
            ("Intervention", input.pico.intervention()),
            ("Comparison", input.pico.comparison()),
            ("Outcome", input.pico.outcome()),
            ("Focus", input.focus.as_deref()),
            ("Audience", input.audience.as_deref()),
        ] {
            if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
                prompt.push_str(&format!("{label}: {v}\n"));
            }
        }
        let mode = match input.mode {
            evidex_core::ResearchMode::Quick => "quick (2-4 strategies)",
            evidex_core::ResearchMode::Comprehensive => "comprehensive (4-8 strategies)",
        };
        prompt.push_str(&format!("Depth: {mode}\n"));
        let sources: Vec<&str> = self.sources.iter().map(|k| k.as_str()).collect();
        prompt.push_str(&format!("Available sources: {}\n", sources.join(", ")));
        prompt
    }
}

#[async_trait]
impl StrategyOracle for LlmStrategyOracle {
    async fn formulate_strategy(&self, input: &TaskInput) -> Result<OracleStrategy, OracleError> {
        let reply = self
            .chat
            .complete(STRATEGY_SYSTEM_PROMPT, &self.build_prompt(input))
            .await?;
        parse_strategy_reply(&reply)
    }
}

/// Parse a strategy reply. Entries with unknown sources or empty queries
/// are skipped.
pub fn parse_strategy_reply(reply: &str) -> Result<OracleStrategy, OracleError> {
    let value = extract_json_object(reply).ok_or_else(|| OracleError::Malformed {
        message: "no JSON object in strategy reply".into(),
    })?;

    let refined_query = value
        .get("refined_query")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string);

    let strategies = value
        .get("strategies")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let source = item.get("source").and_then(|v| v.as_str())?;
                    let Some(source_kind) = SourceKind::from_str_loose(source) else {
                        warn!(source, "Ignoring strategy for unknown source");
                        return None;
                    };
                    let query = item
                        .get("query")
                        .and_then(|v| v.as_str())
                        .map(str::trim)
                        .filter(|q| !q.is_empty())?;
                    Some(ProposedStrategy {
                        source_kind,
                        query: query.to_string(),
                        rationale: item
                            .get("rationale")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(OracleStrategy {
        refined_query,
        strategies,
    })
}

// ── Synthesis oracle ──────────────────────────────────────────

const SYNTHESIS_SYSTEM_PROMPT: &str = "You write concise evidence summaries for clinicians. \
Use only the numbered evidence provided, which contains titles and abstracts, never full texts. \
Cite items as [n]. Reply with a single JSON object shaped as \
{\"sections\": [{\"heading\": string, \"body\": string}]}.";

/// Synthesis oracle backed by a chat model.
pub struct LlmSynthesisOracle {
    chat: Arc<ChatClient>,
}

impl LlmSynthesisOracle {
    pub fn new(chat: Arc<ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl SynthesisOracle for LlmSynthesisOracle {
    async fn synthesize(
        &self,
        query: &str,
        curated: &[CanonicalResult],
    ) -> Result<NarrativeSections, OracleError> {
        if curated.is_empty() {
            return Err(OracleError::Unavailable {
                message: "no evidence to synthesize".into(),
            });
        }
        let prompt = format!("Question: {query}\n\nEvidence:\n{}", evidence_digest(curated));
        let reply = self.chat.complete(SYNTHESIS_SYSTEM_PROMPT, &prompt).await?;
        parse_synthesis_reply(&reply)
    }
}

/// Numbered snippet-only digest of the curated evidence.
pub fn evidence_digest(curated: &[CanonicalResult]) -> String {
    curated
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut meta = Vec::new();
            if let Some(ref j) = r.journal {
                meta.push(j.clone());
            }
            if let Some(ref d) = r.publication_date {
                meta.push(d.clone());
            }
            meta.push(format!("{:?}", r.study_type));
            let mut line = format!("[{}] {} ({})", i + 1, r.display_title(), meta.join("; "));
            if !r.snippet.trim().is_empty() {
                line.push_str(&format!("\n    {}", r.snippet.trim()));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a synthesis reply. Plain prose without JSON becomes one section.
pub fn parse_synthesis_reply(reply: &str) -> Result<NarrativeSections, OracleError> {
    if let Some(value) = extract_json_object(reply)
        && let Some(items) = value.get("sections").and_then(|s| s.as_array())
    {
        let sections: Vec<NarrativeSection> = items
            .iter()
            .filter_map(|s| {
                let body = s.get("body").and_then(|b| b.as_str())?.trim();
                if body.is_empty() {
                    return None;
                }
                let heading = s
                    .get("heading")
                    .and_then(|h| h.as_str())
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .unwrap_or("Summary");
                Some(NarrativeSection::new(heading, body))
            })
            .collect();
        return Ok(NarrativeSections::new(sections));
    }

    let prose = reply.trim();
    if prose.is_empty() {
        return Err(OracleError::Malformed {
            message: "empty synthesis reply".into(),
        });
    }
    Ok(NarrativeSections::new(vec![NarrativeSection::new(
        "Summary", prose,
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_bare() {
        let v = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_extract_json_fenced_with_prose() {
        let reply = "Here is the plan:\n```json\n{\"refined_query\": \"x\", \"note\": \"a } brace\"}\n```\nDone.";
        let v = extract_json_object(reply).unwrap();
        assert_eq!(v["refined_query"], "x");
        assert_eq!(v["note"], "a } brace");
    }

    #[test]
    fn test_extract_json_skips_broken_candidates() {
        let reply = "{not json} then {\"ok\": true}";
        assert_eq!(extract_json_object(reply).unwrap()["ok"], true);
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_parse_strategy_reply() {
        let reply = r#"Sure! {"refined_query": "arteriovenous CO2 gap septic shock",
            "strategies": [
              {"source": "pubmed", "query": "\"carbon dioxide\"[tiab] AND shock, septic[mh]", "rationale": "core"},
              {"source": "Semantic Scholar", "query": "CO2 gap septic shock prognosis"},
              {"source": "scopus", "query": "ignored"},
              {"source": "openalex", "query": "   "}
            ]}"#;
        let strategy = parse_strategy_reply(reply).unwrap();
        assert_eq!(
            strategy.refined_query.as_deref(),
            Some("arteriovenous CO2 gap septic shock")
        );
        assert_eq!(strategy.strategies.len(), 2);
        assert_eq!(strategy.strategies[0].source_kind, SourceKind::LiteratureIndex);
        assert_eq!(strategy.strategies[0].rationale, "core");
        assert_eq!(
            strategy.strategies[1].source_kind,
            SourceKind::AcademicAggregator
        );
        assert_eq!(strategy.strategies[1].rationale, "");
    }

    #[test]
    fn test_parse_strategy_reply_without_json() {
        assert!(matches!(
            parse_strategy_reply("I cannot help with that."),
            Err(OracleError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_synthesis_reply_sections() {
        let reply = r#"```json
{"sections": [
  {"heading": "Overview", "body": "An elevated gap predicts mortality [1]."},
  {"heading": "", "body": "Evidence is observational [2]."},
  {"heading": "Empty", "body": "  "}
]}
```"#;
        let sections = parse_synthesis_reply(reply).unwrap();
        assert_eq!(sections.sections.len(), 2);
        assert_eq!(sections.sections[0].heading, "Overview");
        assert_eq!(sections.sections[1].heading, "Summary");
    }

    #[test]
    fn test_parse_synthesis_reply_prose_fallback() {
        let sections = parse_synthesis_reply("The gap is prognostic.").unwrap();
        assert_eq!(sections.sections.len(), 1);
        assert_eq!(sections.sections[0].body, "The gap is prognostic.");
        assert!(parse_synthesis_reply("   ").is_err());
    }

    #[test]
    fn test_parse_completion() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(parse_completion(&json).unwrap(), "hi");
        assert!(parse_completion(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            map_http_error("https://api", 401, "", None),
            OracleError::AuthFailed { .. }
        ));
        assert!(matches!(
            map_http_error("https://api", 429, "", Some("7")),
            OracleError::RateLimited { retry_after_secs: 7 }
        ));
        assert!(matches!(
            map_http_error("https://api", 429, "", None),
            OracleError::RateLimited {
                retry_after_secs: DEFAULT_RATE_LIMIT_WAIT_SECS
            }
        ));
        assert!(matches!(
            map_http_error("https://api", 502, "bad gateway", None),
            OracleError::Request { .. }
        ));
    }

    #[test]
    fn test_evidence_digest_is_numbered() {
        let r = CanonicalResult::new(SourceKind::LiteratureIndex, "CO2 gap study", "https://x.org")
            .unwrap()
            .with_snippet("Mortality was higher.")
            .with_journal(Some("Crit Care".into()));
        let digest = evidence_digest(&[r]);
        assert!(digest.starts_with("[1] CO2 gap study (Crit Care; Unknown)"));
        assert!(digest.contains("Mortality was higher."));
    }

    #[test]
    fn test_strategy_prompt_lists_pico_and_sources() {
        let chat = Arc::new(ChatClient::new(&LlmConfig::default()).unwrap());
        let oracle = LlmStrategyOracle::new(
            chat,
            vec![SourceKind::LiteratureIndex, SourceKind::WebSearch],
        );
        let input = TaskInput::new("CO2 gap").with_pico(evidex_core::Pico {
            population: Some("septic shock".into()),
            ..Default::default()
        });
        let prompt = oracle.build_prompt(&input);
        assert!(prompt.contains("Population: septic shock"));
        assert!(prompt.contains("literature_index, web_search"));
        assert!(!prompt.contains("Comparison"));
    }
}
