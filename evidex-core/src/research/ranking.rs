//! Relevance and impact scoring, and study-type classification.

use super::quality::{matches_journal, normalized_journals};
use super::text::{content_words, extract_year};
use crate::config::QualityConfig;
use crate::types::{CanonicalResult, StudyType};

const CITATION_WEIGHT: f64 = 0.4;
const JOURNAL_WEIGHT: f64 = 0.3;
const STUDY_TYPE_WEIGHT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.1;

/// Citation count treated as saturating the citation component.
const CITATION_SATURATION: f64 = 1000.0;
/// Years after which a publication contributes nothing to recency.
const RECENCY_HORIZON_YEARS: f64 = 15.0;

/// Study type from provider publication types, else from title/snippet keywords.
pub fn classify_study_type(title: &str, snippet: &str, publication_types: &[String]) -> StudyType {
    let from_types = publication_types
        .iter()
        .filter_map(|t| classify_publication_type(t))
        .min_by(|a, b| b.evidence_weight().total_cmp(&a.evidence_weight()));
    if let Some(study_type) = from_types {
        return study_type;
    }

    let text = format!("{title} {snippet}").to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
    if has(&["meta-analysis", "meta analysis", "metaanalysis"]) {
        StudyType::MetaAnalysis
    } else if has(&["systematic review", "scoping review", "umbrella review"]) {
        StudyType::SystematicReview
    } else if has(&["guideline", "consensus statement", "recommendations for"]) {
        StudyType::Guideline
    } else if has(&["randomized", "randomised", "controlled trial", " rct"]) {
        StudyType::RandomizedControlledTrial
    } else if has(&["cohort", "prospective study", "retrospective study", "observational"]) {
        StudyType::CohortStudy
    } else if has(&["case-control", "case control"]) {
        StudyType::CaseControl
    } else if has(&["case report", "case series"]) {
        StudyType::CaseReport
    } else if has(&["review"]) {
        StudyType::NarrativeReview
    } else if title.trim().is_empty() && snippet.trim().is_empty() {
        StudyType::Unknown
    } else {
        StudyType::Other
    }
}

fn classify_publication_type(raw: &str) -> Option<StudyType> {
    let t: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    let study_type = match t.as_str() {
        "metaanalysis" => StudyType::MetaAnalysis,
        "systematicreview" => StudyType::SystematicReview,
        "guideline" | "practiceguideline" | "consensusdevelopmentconference" => {
            StudyType::Guideline
        }
        "randomizedcontrolledtrial" | "clinicaltrial" | "clinicaltrialphaseiii" => {
            StudyType::RandomizedControlledTrial
        }
        "observationalstudy" | "cohortstudy" | "multicenterstudy" => StudyType::CohortStudy,
        "casecontrol" | "casecontrolstudy" => StudyType::CaseControl,
        "casereport" | "casereports" => StudyType::CaseReport,
        "review" => StudyType::NarrativeReview,
        _ => return None,
    };
    Some(study_type)
}

/// Scores and orders results for the synthesis hand-off.
pub struct Ranker {
    elite: Vec<String>,
}

impl Ranker {
    pub fn new(quality: &QualityConfig) -> Self {
        Self {
            elite: normalized_journals(&quality.elite_journals),
        }
    }

    /// Fill relevance and impact scores, then sort by relevance, ties by impact.
    ///
    /// A relevance score already set by a connector is treated as its rank
    /// score and blended with query-term overlap.
    pub fn rank(
        &self,
        mut results: Vec<CanonicalResult>,
        query: &str,
        current_year: i32,
    ) -> Vec<CanonicalResult> {
        let query_terms = content_words(query);
        for r in &mut results {
            if r.study_type == StudyType::Unknown {
                r.study_type = classify_study_type(&r.title, &r.snippet, &[]);
            }
            let overlap = term_overlap(&query_terms, r);
            let relevance = match r.relevance_score {
                Some(rank) => 0.6 * overlap + 0.4 * rank.clamp(0.0, 1.0),
                None => overlap,
            };
            r.relevance_score = Some(relevance);
            r.composite_impact_score = Some(self.impact(r, current_year));
        }
        results.sort_by(|a, b| {
            score(b.relevance_score)
                .total_cmp(&score(a.relevance_score))
                .then_with(|| {
                    score(b.composite_impact_score).total_cmp(&score(a.composite_impact_score))
                })
        });
        results
    }

    fn impact(&self, r: &CanonicalResult, current_year: i32) -> f64 {
        let citations = r
            .citation_count
            .map(|c| ((1.0 + c as f64).ln() / (1.0 + CITATION_SATURATION).ln()).min(1.0))
            .unwrap_or(0.0);
        let journal = match r.journal.as_deref() {
            Some(j) if matches_journal(j, &self.elite) => 1.0,
            Some(_) => 0.5,
            None => 0.0,
        };
        let recency = r
            .publication_date
            .as_deref()
            .and_then(extract_year)
            .map(|year| {
                let age = (current_year - year).max(0) as f64;
                (1.0 - age / RECENCY_HORIZON_YEARS).clamp(0.0, 1.0)
            })
            .unwrap_or(0.0);
        (CITATION_WEIGHT * citations
            + JOURNAL_WEIGHT * journal
            + STUDY_TYPE_WEIGHT * r.study_type.evidence_weight()
            + RECENCY_WEIGHT * recency)
            .clamp(0.0, 1.0)
    }
}

fn term_overlap(query_terms: &std::collections::HashSet<String>, r: &CanonicalResult) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc = content_words(&format!("{} {}", r.title, r.snippet));
    query_terms.intersection(&doc).count() as f64 / query_terms.len() as f64
}

fn score(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}

/// Connector rank score for the item at `rank` (0-based) out of `total`.
pub fn rank_score(rank: usize, total: usize) -> f64 {
    if total <= 1 {
        return 1.0;
    }
    1.0 - rank as f64 / total as f64
}
