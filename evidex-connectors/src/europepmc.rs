//! Europe PMC REST connector.
//!
//! One client serves two source kinds: preprints (`SRC:PPR`) and clinical
//! guidelines (guideline publication types). The scope decides the filter
//! appended to every query and the kind the results are tagged with.

use crate::http::{HttpSource, str_field, string_list, strip_tags};
use async_trait::async_trait;
use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::research::{classify_study_type, rank_score};
use evidex_core::{CanonicalResult, Clock, SourceConnector, SourceError, SourceKind};
use std::sync::Arc;
use std::time::Duration;

const EUROPE_PMC_API: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";
const MAX_PAGE_SIZE: usize = 1000;

/// Which slice of Europe PMC a connector searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EuropePmcScope {
    Preprints,
    Guidelines,
}

impl EuropePmcScope {
    pub fn kind(&self) -> SourceKind {
        match self {
            EuropePmcScope::Preprints => SourceKind::PreprintServer,
            EuropePmcScope::Guidelines => SourceKind::GuidelineRepo,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EuropePmcScope::Preprints => "europepmc_preprints",
            EuropePmcScope::Guidelines => "europepmc_guidelines",
        }
    }

    fn filter(&self) -> &'static str {
        match self {
            EuropePmcScope::Preprints => "SRC:PPR",
            EuropePmcScope::Guidelines => {
                "(PUB_TYPE:\"guideline\" OR PUB_TYPE:\"practice guideline\")"
            }
        }
    }

    /// The query actually sent for `query` under this scope.
    pub fn scoped_query(&self, query: &str) -> String {
        format!("({}) AND {}", query.trim(), self.filter())
    }
}

/// Connector for Europe PMC preprints or guidelines.
pub struct EuropePmcConnector {
    http: HttpSource,
    scope: EuropePmcScope,
}

impl EuropePmcConnector {
    pub fn new(
        scope: EuropePmcScope,
        settings: &SourceSettings,
        sources: &SourcesConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: HttpSource::new(scope.name(), settings, sources, clock)?,
            scope,
        })
    }

    pub fn scope(&self) -> EuropePmcScope {
        self.scope
    }
}

#[async_trait]
impl SourceConnector for EuropePmcConnector {
    fn kind(&self) -> SourceKind {
        self.scope.kind()
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
            "{}/search?query={}&format=json&resultType=core&pageSize={}",
            EUROPE_PMC_API,
            urlencoding::encode(&self.scope.scoped_query(query)),
            max_results.clamp(1, MAX_PAGE_SIZE)
        );
        let body = self.http.get_json(&url, &[]).await?;
        let mut results =
            parse_search_response(&body, self.scope.kind()).map_err(|message| {
                SourceError::Malformed {
                    source_name: self.name().to_string(),
                    message,
                }
            })?;
        results.truncate(max_results);
        Ok(results)
    }
}

/// Canonical results from a `search` response, tagged with `kind`.
pub fn parse_search_response(
    body: &serde_json::Value,
    kind: SourceKind,
) -> Result<Vec<CanonicalResult>, String> {
    let records = body
        .get("resultList")
        .and_then(|l| l.get("result"))
        .and_then(|r| r.as_array())
        .ok_or_else(|| "No 'resultList.result' array in response".to_string())?;
    let total = records.len();
    Ok(records
        .iter()
        .enumerate()
        .filter_map(|(rank, record)| {
            parse_record(record, kind).map(|r| r.with_relevance(Some(rank_score(rank, total))))
        })
        .collect())
}

fn parse_record(record: &serde_json::Value, kind: SourceKind) -> Option<CanonicalResult> {
    let title = str_field(record, "title")
        .map(|t| strip_tags(&t))
        .unwrap_or_default();
    let doi = str_field(record, "doi");
    let pmid = str_field(record, "pmid");

    let url = if let Some(ref d) = doi {
        format!("https://doi.org/{d}")
    } else if let Some(ref p) = pmid {
        format!("https://pubmed.ncbi.nlm.nih.gov/{p}/")
    } else {
        match (str_field(record, "source"), str_field(record, "id")) {
            (Some(source), Some(id)) => format!("https://europepmc.org/article/{source}/{id}"),
            _ => String::new(),
        }
    };

    let authors = str_field(record, "authorString")
        .map(|s| {
            s.trim_end_matches('.')
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let journal = str_field(record, "journalTitle").or_else(|| {
        record
            .get("journalInfo")
            .and_then(|j| j.get("journal"))
            .and_then(|j| str_field(j, "title"))
    });
    let date = str_field(record, "firstPublicationDate").or_else(|| str_field(record, "pubYear"));

    let snippet = str_field(record, "abstractText")
        .map(|a| strip_tags(&a))
        .unwrap_or_default();

    let pubtypes = string_list(record.get("pubTypeList").and_then(|p| p.get("pubType")));
    let mut study_type = classify_study_type(&title, &snippet, &pubtypes);
    if kind == SourceKind::GuidelineRepo
        && matches!(
            study_type,
            evidex_core::StudyType::Other | evidex_core::StudyType::Unknown
        )
    {
        study_type = evidex_core::StudyType::Guideline;
    }

    CanonicalResult::new(kind, title, url).map(|r| {
        r.with_snippet(snippet)
            .with_authors(authors)
            .with_journal(journal)
            .with_publication_date(date)
            .with_doi(doi)
            .with_pmid(pmid)
            .with_citation_count(record.get("citedByCount").and_then(|v| v.as_u64()))
            .with_study_type(study_type)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidex_core::StudyType;

    #[test]
    fn test_scoped_query() {
        assert_eq!(
            EuropePmcScope::Preprints.scoped_query(" septic shock "),
            "(septic shock) AND SRC:PPR"
        );
        assert!(
            EuropePmcScope::Guidelines
                .scoped_query("sepsis")
                .contains("PUB_TYPE:\"guideline\"")
        );
        assert_eq!(EuropePmcScope::Guidelines.kind(), SourceKind::GuidelineRepo);
    }

    #[test]
    fn test_parse_preprint_record() {
        let body = serde_json::json!({
            "hitCount": 1,
            "resultList": {"result": [{
                "id": "PPR123456",
                "source": "PPR",
                "title": "Venous-arterial <i>CO2</i> gap after fluid resuscitation",
                "authorString": "Mallat J, Lemyze M, Thevenin D.",
                "firstPublicationDate": "2023-02-14",
                "pubYear": "2023",
                "abstractText": "<h4>Background</h4>We measured the gap in 80 patients.",
                "pubTypeList": {"pubType": ["Preprint"]},
                "citedByCount": 0
            }]}
        });
        let results = parse_search_response(&body, SourceKind::PreprintServer).unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.source_kind, SourceKind::PreprintServer);
        assert_eq!(r.title, "Venous-arterial CO2 gap after fluid resuscitation");
        assert_eq!(r.url, "https://europepmc.org/article/PPR/PPR123456");
        assert_eq!(r.authors, vec!["Mallat J", "Lemyze M", "Thevenin D"]);
        assert_eq!(r.snippet, "Background We measured the gap in 80 patients.");
        assert_eq!(r.publication_date.as_deref(), Some("2023-02-14"));
        assert_eq!(r.citation_count, Some(0));
    }

    #[test]
    fn test_parse_guideline_record_prefers_doi_url() {
        let body = serde_json::json!({
            "resultList": {"result": [{
                "id": "34599691",
                "source": "MED",
                "pmid": "34599691",
                "doi": "10.1007/s00134-021-06506-y",
                "title": "Surviving sepsis campaign: international guidelines 2021.",
                "authorString": "Evans L, Rhodes A.",
                "journalInfo": {"journal": {"title": "Intensive Care Medicine"}},
                "pubYear": "2021",
                "pubTypeList": {"pubType": ["Practice Guideline", "Journal Article"]}
            }]}
        });
        let results = parse_search_response(&body, SourceKind::GuidelineRepo).unwrap();
        let r = &results[0];
        assert_eq!(r.url, "https://doi.org/10.1007/s00134-021-06506-y");
        assert_eq!(r.pmid(), Some("34599691"));
        assert_eq!(r.journal.as_deref(), Some("Intensive Care Medicine"));
        assert_eq!(r.study_type, StudyType::Guideline);
    }

    #[test]
    fn test_parse_missing_result_list() {
        assert!(parse_search_response(&serde_json::json!({}), SourceKind::PreprintServer).is_err());
    }
}
