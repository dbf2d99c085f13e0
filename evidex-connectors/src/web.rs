//! Web search connector using the DuckDuckGo instant answers API.
//!
//! No API key required. Results are the abstract (main answer), then the
//! `Results` and `RelatedTopics` entries, with topic groups flattened.

use crate::http::{HttpSource, str_field};
use async_trait::async_trait;
use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::research::{classify_study_type, rank_score};
use evidex_core::{CanonicalResult, Clock, SourceConnector, SourceError, SourceKind};
use std::sync::Arc;
use std::time::Duration;

const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";
/// Topic texts are "Title - description"; titles longer than this are cut.
const MAX_TITLE_CHARS: usize = 120;

/// Connector for generic web search.
pub struct DuckDuckGoConnector {
    http: HttpSource,
}

impl DuckDuckGoConnector {
    pub fn new(
        settings: &SourceSettings,
        sources: &SourcesConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpSource::new("duckduckgo", settings, sources, clock)?,
        })
    }
}

#[async_trait]
impl SourceConnector for DuckDuckGoConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::WebSearch
    }

    fn name(&self) -> &str {
        self.http.name()
    }

    fn timeout(&self) -> Duration {
        self.http.timeout()
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<CanonicalResult>, SourceError> {
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            DUCKDUCKGO_API,
            urlencoding::encode(query)
        );
        let body = self.http.get_json(&url, &[]).await?;
        Ok(parse_instant_answer(&body, max_results))
    }
}

/// Canonical results from an instant-answer response, at most `max_results`.
pub fn parse_instant_answer(body: &serde_json::Value, max_results: usize) -> Vec<CanonicalResult> {
    let mut entries: Vec<(String, String, String)> = Vec::new();

    if let Some(abstract_text) = str_field(body, "AbstractText") {
        let url = str_field(body, "AbstractURL").unwrap_or_default();
        let title = str_field(body, "Heading")
            .or_else(|| str_field(body, "AbstractSource"))
            .unwrap_or_else(|| title_from_text(&abstract_text));
        entries.push((title, url, abstract_text));
    }

    for key in ["Results", "RelatedTopics"] {
        if let Some(items) = body.get(key).and_then(|v| v.as_array()) {
            collect_topics(items, &mut entries);
        }
    }

    entries.truncate(max_results);
    let total = entries.len();
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(rank, (title, url, text))| {
            let study_type = classify_study_type(&title, &text, &[]);
            CanonicalResult::new(SourceKind::WebSearch, title, url).map(|r| {
                r.with_snippet(text)
                    .with_study_type(study_type)
                    .with_relevance(Some(rank_score(rank, total)))
            })
        })
        .collect()
}

fn collect_topics(items: &[serde_json::Value], out: &mut Vec<(String, String, String)>) {
    for item in items {
        // Category groups nest their entries under "Topics".
        if let Some(nested) = item.get("Topics").and_then(|t| t.as_array()) {
            collect_topics(nested, out);
            continue;
        }
        let Some(text) = str_field(item, "Text") else {
            continue;
        };
        let url = str_field(item, "FirstURL").unwrap_or_default();
        if out.iter().any(|(_, u, _)| !u.is_empty() && *u == url) {
            continue;
        }
        out.push((title_from_text(&text), url, text));
    }
}

fn title_from_text(text: &str) -> String {
    let head = text.split(" - ").next().unwrap_or(text).trim();
    if head.chars().count() > MAX_TITLE_CHARS {
        head.chars().take(MAX_TITLE_CHARS).collect()
    } else {
        head.to_string()
    }
}
