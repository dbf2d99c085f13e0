//! Core types shared across the research pipeline.
//!
//! `CanonicalResult` is the single normalized citation record every source
//! adapter produces; `SearchStrategy` is one planned unit of work; `TaskInput`
//! is what a caller hands to the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of external search service a connector talks to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Biomedical literature index (PubMed).
    LiteratureIndex,
    /// Academic aggregator (Semantic Scholar).
    AcademicAggregator,
    /// Citation-network index (OpenAlex).
    CitationNetwork,
    /// Clinical guideline repository.
    GuidelineRepo,
    /// Preprint server.
    PreprintServer,
    /// Generic web search.
    WebSearch,
}

impl SourceKind {
    /// Every kind, in merge-priority order.
    pub const ALL: [SourceKind; 6] = [
        SourceKind::LiteratureIndex,
        SourceKind::AcademicAggregator,
        SourceKind::CitationNetwork,
        SourceKind::GuidelineRepo,
        SourceKind::PreprintServer,
        SourceKind::WebSearch,
    ];

    /// Merge priority; lower wins when two records describe the same work.
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::LiteratureIndex => 0,
            SourceKind::AcademicAggregator => 1,
            SourceKind::CitationNetwork => 2,
            SourceKind::GuidelineRepo => 3,
            SourceKind::PreprintServer => 4,
            SourceKind::WebSearch => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LiteratureIndex => "literature_index",
            SourceKind::AcademicAggregator => "academic_aggregator",
            SourceKind::CitationNetwork => "citation_network",
            SourceKind::GuidelineRepo => "guideline_repo",
            SourceKind::PreprintServer => "preprint_server",
            SourceKind::WebSearch => "web_search",
        }
    }

    /// Lenient parsing for names produced by an LLM oracle.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "literature_index" | "pubmed" | "medline" | "literature" => {
                Some(SourceKind::LiteratureIndex)
            }
            "academic_aggregator" | "semantic_scholar" | "semanticscholar" | "academic" => {
                Some(SourceKind::AcademicAggregator)
            }
            "citation_network" | "openalex" | "citations" => Some(SourceKind::CitationNetwork),
            "guideline_repo" | "guidelines" | "guideline" => Some(SourceKind::GuidelineRepo),
            "preprint_server" | "preprints" | "preprint" | "medrxiv" | "biorxiv" => {
                Some(SourceKind::PreprintServer)
            }
            "web_search" | "web" | "websearch" => Some(SourceKind::WebSearch),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Study design of a retrieved work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyType {
    MetaAnalysis,
    SystematicReview,
    Guideline,
    RandomizedControlledTrial,
    CohortStudy,
    CaseControl,
    CaseReport,
    NarrativeReview,
    Other,
    #[default]
    Unknown,
}

impl StudyType {
    /// Evidence weight used by the composite impact score.
    pub fn evidence_weight(&self) -> f64 {
        match self {
            StudyType::MetaAnalysis | StudyType::SystematicReview => 1.0,
            StudyType::Guideline => 0.9,
            StudyType::RandomizedControlledTrial => 0.85,
            StudyType::CohortStudy => 0.6,
            StudyType::CaseControl => 0.5,
            StudyType::NarrativeReview => 0.5,
            StudyType::CaseReport => 0.2,
            StudyType::Other | StudyType::Unknown => 0.3,
        }
    }
}

/// Identifiers used for exact-match deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

/// One retrieved citation, normalized across sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub source_kind: SourceKind,
    pub title: String,
    pub url: String,
    /// Snippet or abstract. Never full text.
    pub snippet: String,
    /// Loosely formatted ("2021", "2021 Mar 4", "2021-03-04").
    pub publication_date: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub external_ids: ExternalIds,
    pub study_type: StudyType,
    pub citation_count: Option<u64>,
    pub relevance_score: Option<f64>,
    pub composite_impact_score: Option<f64>,
}

impl CanonicalResult {
    /// Build a result, rejecting records with neither a title nor a URL.
    pub fn new(
        source_kind: SourceKind,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Option<Self> {
        let title = title.into().trim().to_string();
        let url = url.into().trim().to_string();
        if title.is_empty() && url.is_empty() {
            return None;
        }
        Some(Self {
            source_kind,
            title,
            url,
            snippet: String::new(),
            publication_date: None,
            authors: Vec::new(),
            journal: None,
            external_ids: ExternalIds::default(),
            study_type: StudyType::Unknown,
            citation_count: None,
            relevance_score: None,
            composite_impact_score: None,
        })
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_journal(mut self, journal: Option<String>) -> Self {
        self.journal = journal.filter(|j| !j.trim().is_empty());
        self
    }

    pub fn with_publication_date(mut self, date: Option<String>) -> Self {
        self.publication_date = date.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_pmid(mut self, pmid: Option<String>) -> Self {
        self.external_ids.pmid = pmid.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_doi(mut self, doi: Option<String>) -> Self {
        self.external_ids.doi = doi.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_citation_count(mut self, count: Option<u64>) -> Self {
        self.citation_count = count;
        self
    }

    pub fn with_study_type(mut self, study_type: StudyType) -> Self {
        self.study_type = study_type;
        self
    }

    pub fn with_relevance(mut self, score: Option<f64>) -> Self {
        self.relevance_score = score;
        self
    }

    pub fn pmid(&self) -> Option<&str> {
        self.external_ids.pmid.as_deref()
    }

    pub fn doi(&self) -> Option<&str> {
        self.external_ids.doi.as_deref()
    }

    /// Title if present, URL otherwise.
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Where a planned strategy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    Oracle,
    Tier1,
    Tier2,
    Tier3,
    Supplementary,
}

/// One planned unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStrategy {
    query: String,
    source_kind: SourceKind,
    max_results: usize,
    rationale: String,
    tier: StrategyTier,
}

impl SearchStrategy {
    pub fn new(
        source_kind: SourceKind,
        query: impl Into<String>,
        max_results: usize,
        rationale: impl Into<String>,
        tier: StrategyTier,
    ) -> Self {
        Self {
            query: query.into(),
            source_kind,
            max_results,
            rationale: rationale.into(),
            tier,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn tier(&self) -> StrategyTier {
        self.tier
    }
}

/// Research depth. Bounds strategy count, per-strategy caps and pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    #[default]
    Quick,
    Comprehensive,
}

impl ResearchMode {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "quick" | "fast" | "brief" => Some(ResearchMode::Quick),
            "comprehensive" | "full" | "deep" | "detailed" => Some(ResearchMode::Comprehensive),
            _ => None,
        }
    }
}

/// Structured clinical question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pico {
    #[serde(default)]
    pub population: Option<String>,
    #[serde(default)]
    pub intervention: Option<String>,
    #[serde(default)]
    pub comparison: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl Pico {
    fn field(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn population(&self) -> Option<&str> {
        Self::field(&self.population)
    }

    pub fn intervention(&self) -> Option<&str> {
        Self::field(&self.intervention)
    }

    pub fn comparison(&self) -> Option<&str> {
        Self::field(&self.comparison)
    }

    pub fn outcome(&self) -> Option<&str> {
        Self::field(&self.outcome)
    }

    pub fn is_empty(&self) -> bool {
        self.population().is_none()
            && self.intervention().is_none()
            && self.comparison().is_none()
            && self.outcome().is_none()
    }

    /// Present elements joined with `AND`, each parenthesized.
    pub fn combined_query(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.population(),
            self.intervention(),
            self.comparison(),
            self.outcome(),
        ]
        .into_iter()
        .flatten()
        .map(|p| format!("({p})"))
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }
}

/// What a caller hands to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub query: String,
    #[serde(default)]
    pub pico: Pico,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub mode: ResearchMode,
}

impl TaskInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ResearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_pico(mut self, pico: Pico) -> Self {
        self.pico = pico;
        self
    }

    /// The text used when a single query string is needed.
    pub fn effective_query(&self) -> String {
        let q = self.query.trim();
        if !q.is_empty() {
            return q.to_string();
        }
        self.pico.combined_query().unwrap_or_default()
    }
}
