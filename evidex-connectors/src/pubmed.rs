//! PubMed connector over NCBI E-utilities.
//!
//! A search is two calls: `esearch` resolves the query to PMIDs in relevance
//! order, `esummary` fetches the document summaries for those PMIDs.

use crate::http::{HttpSource, str_field, string_list};
use async_trait::async_trait;
use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::research::{classify_study_type, rank_score};
use evidex_core::{CanonicalResult, Clock, SourceConnector, SourceError, SourceKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const EUTILS_API: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Connector for the PubMed literature index.
pub struct PubMedConnector {
    http: HttpSource,
    api_key: Option<String>,
    email: Option<String>,
}

impl PubMedConnector {
    pub fn new(
        settings: &SourceSettings,
        sources: &SourcesConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpSource::new("pubmed", settings, sources, clock)?,
            api_key: settings.api_key.clone(),
            email: settings.email.clone(),
        })
    }

    fn credentials(&self) -> String {
        let mut params = String::from("&tool=evidex");
        if let Some(ref key) = self.api_key {
            params.push_str(&format!("&api_key={}", urlencoding::encode(key)));
        }
        if let Some(ref email) = self.email {
            params.push_str(&format!("&email={}", urlencoding::encode(email)));
        }
        params
    }
}

#[async_trait]
impl SourceConnector for PubMedConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::LiteratureIndex
    }

    fn name(&self) -> &str {
        self.http.name()
    }

    fn timeout(&self) -> Duration {
        // Two round trips per search.
        self.http.timeout() * 2
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<CanonicalResult>, SourceError> {
        let search_url = format!(
            "{}/esearch.fcgi?db=pubmed&retmode=json&sort=relevance&retmax={}&term={}{}",
            EUTILS_API,
            max_results,
            urlencoding::encode(query),
            self.credentials()
        );
        let search_body = self.http.get_json(&search_url, &[]).await?;
        let pmids = parse_esearch(&search_body).map_err(|message| SourceError::Malformed {
            source_name: self.name().to_string(),
            message,
        })?;
        if pmids.is_empty() {
            debug!(query, "PubMed returned no PMIDs");
            return Ok(Vec::new());
        }

        let summary_url = format!(
            "{}/esummary.fcgi?db=pubmed&retmode=json&id={}{}",
            EUTILS_API,
            pmids.join(","),
            self.credentials()
        );
        let summary_body = self.http.get_json(&summary_url, &[]).await?;
        Ok(parse_esummary(&summary_body, &pmids))
    }
}

/// PMIDs from an `esearch` response, in relevance order.
pub fn parse_esearch(body: &serde_json::Value) -> Result<Vec<String>, String> {
    let result = body
        .get("esearchresult")
        .ok_or_else(|| "No 'esearchresult' object in response".to_string())?;
    if let Some(error) = str_field(result, "ERROR") {
        return Err(error);
    }
    Ok(string_list(result.get("idlist")))
}

/// Canonical results from an `esummary` response, ordered like `pmids`.
pub fn parse_esummary(body: &serde_json::Value, pmids: &[String]) -> Vec<CanonicalResult> {
    let Some(result) = body.get("result") else {
        return Vec::new();
    };
    let total = pmids.len();
    pmids
        .iter()
        .enumerate()
        .filter_map(|(rank, pmid)| {
            let doc = result.get(pmid.as_str())?;
            if doc.get("error").is_some() {
                debug!(pmid = %pmid, "Skipping PubMed summary with error");
                return None;
            }
            parse_document(doc, pmid).map(|r| r.with_relevance(Some(rank_score(rank, total))))
        })
        .collect()
}

fn parse_document(doc: &serde_json::Value, pmid: &str) -> Option<CanonicalResult> {
    let title = str_field(doc, "title").unwrap_or_default();
    let url = format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/");

    let authors: Vec<String> = doc
        .get("authors")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter(|a| a.get("authtype").and_then(|t| t.as_str()) != Some("CollectiveName"))
                .filter_map(|a| str_field(a, "name"))
                .collect()
        })
        .unwrap_or_default();

    let doi = doc
        .get("articleids")
        .and_then(|v| v.as_array())
        .and_then(|ids| {
            ids.iter()
                .find(|id| id.get("idtype").and_then(|t| t.as_str()) == Some("doi"))
        })
        .and_then(|id| str_field(id, "value"));

    let journal = str_field(doc, "fulljournalname").or_else(|| str_field(doc, "source"));
    let pubdate = str_field(doc, "pubdate").or_else(|| str_field(doc, "epubdate"));
    let pubtypes = string_list(doc.get("pubtype"));

    // esummary carries no abstract. The snippet stays blank so a merged
    // duplicate can supply one; publication types only drive the study type.
    let study_type = classify_study_type(&title, "", &pubtypes);
    CanonicalResult::new(SourceKind::LiteratureIndex, title, url).map(|r| {
        r.with_authors(authors)
            .with_journal(journal)
            .with_publication_date(pubdate)
            .with_pmid(Some(pmid.to_string()))
            .with_doi(doi)
            .with_study_type(study_type)
    })
}
