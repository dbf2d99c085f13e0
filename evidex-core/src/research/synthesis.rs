//! Deterministic extractive synthesis, used when no LLM is configured.
//!
//! Builds an overview, a key-evidence digest and an evidence profile
//! straight from the curated results. Every sentence it writes is lifted
//! from, or counts over, the evidence itself.

use super::oracle::{NarrativeSection, NarrativeSections, SynthesisOracle};
use super::text::{extract_year, split_sentences};
use crate::error::OracleError;
use crate::types::{CanonicalResult, SourceKind, StudyType};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Synthesis oracle that extracts instead of generating.
#[derive(Debug, Clone)]
pub struct ExtractiveSynthesizer {
    max_key_findings: usize,
}

impl ExtractiveSynthesizer {
    pub fn new(max_key_findings: usize) -> Self {
        Self {
            max_key_findings: max_key_findings.max(1),
        }
    }

    pub fn compose(&self, query: &str, curated: &[CanonicalResult]) -> NarrativeSections {
        NarrativeSections::new(vec![
            self.overview(query, curated),
            self.key_evidence(curated),
            self.evidence_profile(curated),
        ])
    }

    fn overview(&self, query: &str, curated: &[CanonicalResult]) -> NarrativeSection {
        let strong = curated
            .iter()
            .filter(|r| {
                matches!(
                    r.study_type,
                    StudyType::MetaAnalysis
                        | StudyType::SystematicReview
                        | StudyType::Guideline
                        | StudyType::RandomizedControlledTrial
                )
            })
            .count();
        let years: Vec<i32> = curated
            .iter()
            .filter_map(|r| r.publication_date.as_deref().and_then(extract_year))
            .collect();
        let mut body = format!(
            "{} sources were retained for the question \"{}\".",
            curated.len(),
            query.trim()
        );
        if strong > 0 {
            body.push_str(&format!(
                " {strong} of them are systematic reviews, meta-analyses, guidelines or randomized trials."
            ));
        }
        if let (Some(min), Some(max)) = (years.iter().min(), years.iter().max()) {
            body.push_str(&format!(" Publication years range from {min} to {max}."));
        }
        NarrativeSection::new("Overview", body)
    }

    fn key_evidence(&self, curated: &[CanonicalResult]) -> NarrativeSection {
        let lines: Vec<String> = curated
            .iter()
            .take(self.max_key_findings)
            .map(|r| {
                let mut source = Vec::new();
                if let Some(journal) = &r.journal {
                    source.push(journal.clone());
                }
                if let Some(year) = r.publication_date.as_deref().and_then(extract_year) {
                    source.push(year.to_string());
                }
                let heading = if source.is_empty() {
                    r.display_title().to_string()
                } else {
                    format!("{} ({})", r.display_title(), source.join(", "))
                };
                match split_sentences(&r.snippet).into_iter().next() {
                    Some(first) => format!("{heading}: {first}"),
                    None => format!("{heading}."),
                }
            })
            .collect();
        NarrativeSection::new("Key evidence", lines.join("\n"))
    }

    fn evidence_profile(&self, curated: &[CanonicalResult]) -> NarrativeSection {
        let mut by_kind: BTreeMap<SourceKind, usize> = BTreeMap::new();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for r in curated {
            *by_kind.entry(r.source_kind).or_default() += 1;
            *by_type.entry(study_type_label(r.study_type).to_string()).or_default() += 1;
        }
        let kinds = by_kind
            .iter()
            .map(|(k, n)| format!("{n} from {}", k.as_str().replace('_', " ")))
            .collect::<Vec<_>>()
            .join(", ");
        let types = by_type
            .iter()
            .map(|(t, n)| format!("{n} {t}"))
            .collect::<Vec<_>>()
            .join(", ");
        NarrativeSection::new(
            "Evidence profile",
            format!("Sources by origin: {kinds}.\nStudy designs: {types}."),
        )
    }
}

impl Default for ExtractiveSynthesizer {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl SynthesisOracle for ExtractiveSynthesizer {
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
        Ok(self.compose(query, curated))
    }
}

fn study_type_label(study_type: StudyType) -> &'static str {
    match study_type {
        StudyType::MetaAnalysis => "meta-analysis",
        StudyType::SystematicReview => "systematic review",
        StudyType::Guideline => "guideline",
        StudyType::RandomizedControlledTrial => "randomized trial",
        StudyType::CohortStudy => "cohort study",
        StudyType::CaseControl => "case-control study",
        StudyType::CaseReport => "case report",
        StudyType::NarrativeReview => "narrative review",
        StudyType::Other => "other design",
        StudyType::Unknown => "unclassified",
    }
}
