//! OpenAlex works connector.
//!
//! OpenAlex ships abstracts as an inverted index (word -> positions), which
//! [`reconstruct_abstract`] turns back into text.

use crate::http::{HttpSource, str_field};
use async_trait::async_trait;
use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::research::{classify_study_type, rank_score};
use evidex_core::{CanonicalResult, Clock, SourceConnector, SourceError, SourceKind};
use std::sync::Arc;
use std::time::Duration;

const OPENALEX_API: &str = "https://api.openalex.org";
const MAX_PER_PAGE: usize = 200;

/// Connector for the OpenAlex citation network.
pub struct OpenAlexConnector {
    http: HttpSource,
    email: Option<String>,
    api_key: Option<String>,
}

impl OpenAlexConnector {
    pub fn new(
        settings: &SourceSettings,
        sources: &SourcesConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpSource::new("openalex", settings, sources, clock)?,
            email: settings.email.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl SourceConnector for OpenAlexConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::CitationNetwork
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
        let mut url = format!(
            "{}/works?search={}&per-page={}",
            OPENALEX_API,
            urlencoding::encode(query),
            max_results.clamp(1, MAX_PER_PAGE)
        );
        // Polite pool.
        if let Some(ref email) = self.email {
            url.push_str(&format!("&mailto={}", urlencoding::encode(email)));
        }
        if let Some(ref key) = self.api_key {
            url.push_str(&format!("&api_key={}", urlencoding::encode(key)));
        }
        let body = self.http.get_json(&url, &[]).await?;
        let mut results = parse_works_response(&body).map_err(|message| SourceError::Malformed {
            source_name: self.name().to_string(),
            message,
        })?;
        results.truncate(max_results);
        Ok(results)
    }
}

/// Canonical results from a `works` search response.
pub fn parse_works_response(body: &serde_json::Value) -> Result<Vec<CanonicalResult>, String> {
    let works = body
        .get("results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "No 'results' array in response".to_string())?;
    let total = works.len();
    Ok(works
        .iter()
        .enumerate()
        .filter_map(|(rank, work)| {
            parse_work(work).map(|r| r.with_relevance(Some(rank_score(rank, total))))
        })
        .collect())
}

fn parse_work(work: &serde_json::Value) -> Option<CanonicalResult> {
    let title = str_field(work, "display_name")
        .or_else(|| str_field(work, "title"))
        .unwrap_or_default();

    let doi = str_field(work, "doi").map(|d| strip_prefix_ci(&d, "https://doi.org/"));
    let pmid = work
        .get("ids")
        .and_then(|ids| str_field(ids, "pmid"))
        .map(|p| {
            p.trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });

    let primary = work.get("primary_location");
    let url = primary
        .and_then(|p| str_field(p, "landing_page_url"))
        .or_else(|| doi.as_ref().map(|d| format!("https://doi.org/{d}")))
        .or_else(|| str_field(work, "id"))
        .unwrap_or_default();
    let journal = primary
        .and_then(|p| p.get("source"))
        .and_then(|s| str_field(s, "display_name"));

    let date = str_field(work, "publication_date").or_else(|| {
        work.get("publication_year")
            .and_then(|y| y.as_u64())
            .map(|y| y.to_string())
    });

    let authors = work
        .get("authorships")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a.get("author").and_then(|au| str_field(au, "display_name")))
                .collect()
        })
        .unwrap_or_default();

    let snippet = work
        .get("abstract_inverted_index")
        .map(reconstruct_abstract)
        .unwrap_or_default();

    let pubtypes: Vec<String> = str_field(work, "type").into_iter().collect();
    let study_type = classify_study_type(&title, &snippet, &pubtypes);

    CanonicalResult::new(SourceKind::CitationNetwork, title, url).map(|r| {
        r.with_snippet(snippet)
            .with_authors(authors)
            .with_journal(journal)
            .with_publication_date(date)
            .with_doi(doi)
            .with_pmid(pmid)
            .with_citation_count(work.get("cited_by_count").and_then(|v| v.as_u64()))
            .with_study_type(study_type)
    })
}

fn strip_prefix_ci(value: &str, prefix: &str) -> String {
    match value.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => value[prefix.len()..].to_string(),
        _ => value.to_string(),
    }
}

/// Rebuild abstract text from an OpenAlex inverted index.
pub fn reconstruct_abstract(index: &serde_json::Value) -> String {
    let Some(map) = index.as_object() else {
        return String::new();
    };
    let mut positioned: Vec<(u64, &str)> = map
        .iter()
        .flat_map(|(word, positions)| {
            positions
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|p| p.as_u64())
                .map(move |p| (p, word.as_str()))
        })
        .collect();
    positioned.sort_by_key(|(p, _)| *p);
    positioned
        .into_iter()
        .map(|(_, w)| w)
        .collect::<Vec<_>>()
        .join(" ")
}
