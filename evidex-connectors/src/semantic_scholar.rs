//! Semantic Scholar Graph API connector.

use crate::http::{HttpSource, str_field, string_list};
use async_trait::async_trait;
use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::research::{classify_study_type, rank_score};
use evidex_core::{CanonicalResult, Clock, SourceConnector, SourceError, SourceKind};
use std::sync::Arc;
use std::time::Duration;

const SEMANTIC_SCHOLAR_API: &str = "https://api.semanticscholar.org/graph/v1";
const SEARCH_FIELDS: &str =
    "paperId,title,abstract,tldr,year,publicationDate,authors,venue,journal,externalIds,citationCount,url,publicationTypes";
/// The search endpoint rejects larger pages.
const MAX_PAGE_SIZE: usize = 100;

/// Connector for the Semantic Scholar academic aggregator.
pub struct SemanticScholarConnector {
    http: HttpSource,
    api_key: Option<String>,
}

impl SemanticScholarConnector {
    pub fn new(
        settings: &SourceSettings,
        sources: &SourcesConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpSource::new("semantic_scholar", settings, sources, clock)?,
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl SourceConnector for SemanticScholarConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::AcademicAggregator
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
            "{}/paper/search?query={}&limit={}&fields={}",
            SEMANTIC_SCHOLAR_API,
            urlencoding::encode(query),
            max_results.clamp(1, MAX_PAGE_SIZE),
            SEARCH_FIELDS
        );
        let mut headers = Vec::new();
        if let Some(ref key) = self.api_key {
            headers.push(("x-api-key", key.clone()));
        }
        let body = self.http.get_json(&url, &headers).await?;
        let mut results = parse_search_response(&body).map_err(|message| SourceError::Malformed {
            source_name: self.name().to_string(),
            message,
        })?;
        results.truncate(max_results);
        Ok(results)
    }
}

/// Canonical results from a `paper/search` response.
pub fn parse_search_response(body: &serde_json::Value) -> Result<Vec<CanonicalResult>, String> {
    let Some(data) = body.get("data") else {
        // Zero hits come back without a data array.
        if body.get("total").and_then(|t| t.as_u64()) == Some(0) {
            return Ok(Vec::new());
        }
        return Err("No 'data' array in response".to_string());
    };
    let papers = data
        .as_array()
        .ok_or_else(|| "'data' is not an array".to_string())?;
    let total = papers.len();
    Ok(papers
        .iter()
        .enumerate()
        .filter_map(|(rank, paper)| {
            parse_paper(paper).map(|r| r.with_relevance(Some(rank_score(rank, total))))
        })
        .collect())
}

fn parse_paper(paper: &serde_json::Value) -> Option<CanonicalResult> {
    let title = str_field(paper, "title").unwrap_or_default();
    let url = str_field(paper, "url")
        .or_else(|| {
            str_field(paper, "paperId")
                .map(|id| format!("https://www.semanticscholar.org/paper/{id}"))
        })
        .unwrap_or_default();

    let snippet = str_field(paper, "abstract")
        .or_else(|| paper.get("tldr").and_then(|t| str_field(t, "text")))
        .unwrap_or_default();

    let authors = paper
        .get("authors")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|a| str_field(a, "name")).collect())
        .unwrap_or_default();

    let journal = paper
        .get("journal")
        .and_then(|j| str_field(j, "name"))
        .or_else(|| str_field(paper, "venue"));

    let date = str_field(paper, "publicationDate").or_else(|| {
        paper
            .get("year")
            .and_then(|y| y.as_u64())
            .map(|y| y.to_string())
    });

    let ids = paper.get("externalIds");
    let doi = ids.and_then(|i| str_field(i, "DOI"));
    // PubMed ids arrive as strings or numbers.
    let pmid = ids.and_then(|i| i.get("PubMed")).and_then(|v| {
        v.as_str()
            .map(str::to_string)
            .or_else(|| v.as_u64().map(|n| n.to_string()))
    });

    let pubtypes = string_list(paper.get("publicationTypes"));
    let study_type = classify_study_type(&title, &snippet, &pubtypes);

    CanonicalResult::new(SourceKind::AcademicAggregator, title, url).map(|r| {
        r.with_snippet(snippet)
            .with_authors(authors)
            .with_journal(journal)
            .with_publication_date(date)
            .with_doi(doi)
            .with_pmid(pmid)
            .with_citation_count(paper.get("citationCount").and_then(|v| v.as_u64()))
            .with_study_type(study_type)
    })
}
