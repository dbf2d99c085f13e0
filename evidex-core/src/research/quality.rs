//! Descriptive quality metrics for a deduplicated evidence set.

use super::text::normalize_title;
use crate::config::QualityConfig;
use crate::types::{CanonicalResult, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub coverage_score: f64,
    pub diversity_score: f64,
    pub impact_score: f64,
    pub overall_score: f64,
    pub key_quality_insights: Vec<String>,
}

pub struct QualityScorer {
    config: QualityConfig,
    elite: Vec<String>,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        let elite = normalized_journals(&config.elite_journals);
        Self { config, elite }
    }

    pub fn assess(&self, results: &[CanonicalResult]) -> QualityAssessment {
        if results.is_empty() {
            return QualityAssessment {
                key_quality_insights: vec!["No evidence retained after filtering".into()],
                ..Default::default()
            };
        }

        let mut by_kind: BTreeMap<SourceKind, usize> = BTreeMap::new();
        for r in results {
            *by_kind.entry(r.source_kind).or_default() += 1;
        }

        let kind_share = ratio(by_kind.len(), self.config.expected_source_kinds);
        let count_share = ratio(results.len(), self.config.coverage_target_results);
        let coverage = 0.5 * kind_share + 0.5 * count_share;
        let diversity = shannon_evenness(&by_kind);

        let impactful = results
            .iter()
            .filter(|r| {
                r.citation_count
                    .is_some_and(|c| c >= self.config.impact_citation_threshold)
                    || r.journal
                        .as_deref()
                        .is_some_and(|j| matches_journal(j, &self.elite))
            })
            .count();
        let impact = impactful as f64 / results.len() as f64;

        let weighted = self.config.coverage_weight * coverage
            + self.config.diversity_weight * diversity
            + self.config.impact_weight * impact;
        let total_weight =
            self.config.coverage_weight + self.config.diversity_weight + self.config.impact_weight;
        let overall = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut insights = Vec::new();
        let kinds: Vec<&str> = by_kind.keys().map(|k| k.as_str()).collect();
        insights.push(format!(
            "{} results from {} source kind(s): {}",
            results.len(),
            by_kind.len(),
            kinds.join(", ")
        ));
        if by_kind.len() < 2 {
            insights.push("All evidence comes from a single source kind".into());
        }
        if results.len() < self.config.coverage_target_results {
            insights.push(format!(
                "Result count below coverage target ({} of {})",
                results.len(),
                self.config.coverage_target_results
            ));
        }
        insights.push(format!(
            "{impactful} of {} results are highly cited or from high-impact journals",
            results.len()
        ));

        QualityAssessment {
            coverage_score: coverage.clamp(0.0, 1.0),
            diversity_score: diversity,
            impact_score: impact,
            overall_score: overall,
            key_quality_insights: insights,
        }
    }
}

fn ratio(value: usize, target: usize) -> f64 {
    if target == 0 {
        return 1.0;
    }
    (value as f64 / target as f64).min(1.0)
}

/// Shannon entropy over kind counts divided by its maximum; 0 below two kinds.
fn shannon_evenness(by_kind: &BTreeMap<SourceKind, usize>) -> f64 {
    let k = by_kind.len();
    if k < 2 {
        return 0.0;
    }
    let total: usize = by_kind.values().sum();
    let entropy: f64 = by_kind
        .values()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total as f64;
            -p * p.ln()
        })
        .sum();
    (entropy / (k as f64).ln()).clamp(0.0, 1.0)
}

pub(crate) fn normalized_journals(journals: &[String]) -> Vec<String> {
    journals
        .iter()
        .map(|j| normalize_title(j))
        .filter(|j| !j.is_empty())
        .collect()
}

/// Whole-phrase, case-insensitive match of a journal against normalized names.
pub(crate) fn matches_journal(journal: &str, normalized: &[String]) -> bool {
    let padded = format!(" {} ", normalize_title(journal));
    normalized
        .iter()
        .any(|entry| padded.contains(&format!(" {entry} ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: SourceKind, citations: Option<u64>, journal: Option<&str>) -> CanonicalResult {
        CanonicalResult::new(kind, "Title", "")
            .unwrap()
            .with_citation_count(citations)
            .with_journal(journal.map(String::from))
    }

    #[test]
    fn test_empty_set_scores_zero() {
        let q = QualityScorer::new(QualityConfig::default()).assess(&[]);
        assert_eq!(q.overall_score, 0.0);
        assert_eq!(q.key_quality_insights.len(), 1);
    }

    #[test]
    fn test_single_kind_has_no_diversity() {
        let results = vec![
            record(SourceKind::LiteratureIndex, Some(50), None),
            record(SourceKind::LiteratureIndex, Some(1), None),
        ];
        let q = QualityScorer::new(QualityConfig::default()).assess(&results);
        assert_eq!(q.diversity_score, 0.0);
        assert!((q.impact_score - 0.5).abs() < 1e-9);
        assert!(
            q.key_quality_insights
                .iter()
                .any(|i| i.contains("single source kind"))
        );
    }

    #[test]
    fn test_even_split_is_fully_diverse() {
        let results = vec![
            record(SourceKind::LiteratureIndex, None, None),
            record(SourceKind::WebSearch, None, None),
        ];
        let q = QualityScorer::new(QualityConfig::default()).assess(&results);
        assert!((q.diversity_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_and_overall_are_bounded() {
        let config = QualityConfig {
            expected_source_kinds: 2,
            coverage_target_results: 2,
            ..Default::default()
        };
        let results = vec![
            record(SourceKind::LiteratureIndex, Some(100), Some("The Lancet")),
            record(SourceKind::AcademicAggregator, None, Some("JAMA")),
            record(SourceKind::CitationNetwork, None, None),
        ];
        let q = QualityScorer::new(config).assess(&results);
        assert_eq!(q.coverage_score, 1.0);
        assert!((q.impact_score - 2.0 / 3.0).abs() < 1e-9);
        assert!(q.overall_score <= 1.0 && q.overall_score > 0.0);
    }

    #[test]
    fn test_journal_matching_is_whole_phrase() {
        let elite = normalized_journals(&["cell".to_string(), "lancet".to_string()]);
        assert!(matches_journal("Cell", &elite));
        assert!(matches_journal("The Lancet. Respiratory medicine", &elite));
        assert!(!matches_journal("Cellular Immunology", &elite));
    }
}
