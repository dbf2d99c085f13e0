//! Lightweight grounding audit of narrative claims against retained evidence.
//!
//! The corpus is the abstracts/snippets of the retained results; titles are
//! not evidence. Every claim lands in exactly one bucket: supported,
//! contradicted or omitted (not traceable to the corpus).

use super::text::{content_words, has_negation, jaccard, split_sentences};
use crate::error::AuditError;
use crate::types::CanonicalResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Content words a claim must share with the corpus to count as supported.
const MIN_SHARED_WORDS: usize = 2;
/// Keyword Jaccard at which a corpus sentence is compared for polarity.
const CONTRADICTION_JACCARD: f64 = 0.4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSummary {
    pub total: usize,
    pub supported: usize,
    pub contradictions: usize,
    pub omissions: usize,
}

impl GroundingSummary {
    pub fn support_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.supported as f64 / self.total as f64
    }
}

struct CorpusSentence {
    words: HashSet<String>,
    negated: bool,
}

pub struct GroundingAuditor {
    max_claims: usize,
}

impl GroundingAuditor {
    pub fn new(max_claims: usize) -> Self {
        Self { max_claims }
    }

    pub fn audit(
        &self,
        claims: &[String],
        corpus: &[CanonicalResult],
    ) -> Result<GroundingSummary, AuditError> {
        if claims.len() > self.max_claims {
            return Err(AuditError::TooManyClaims {
                count: claims.len(),
                limit: self.max_claims,
            });
        }

        let sentences: Vec<CorpusSentence> = corpus
            .iter()
            .flat_map(|r| split_sentences(&r.snippet))
            .map(|s| CorpusSentence {
                words: content_words(&s),
                negated: has_negation(&s),
            })
            .filter(|s| !s.words.is_empty())
            .collect();
        if sentences.is_empty() {
            return Err(AuditError::EmptyCorpus);
        }
        let vocabulary: HashSet<&String> = sentences.iter().flat_map(|s| &s.words).collect();

        let mut summary = GroundingSummary {
            total: claims.len(),
            ..Default::default()
        };
        for claim in claims {
            let words = content_words(claim);
            let shared = words.iter().filter(|w| vocabulary.contains(w)).count();
            if shared < MIN_SHARED_WORDS {
                debug!(claim = %claim, shared, "Claim not traceable to evidence");
                summary.omissions += 1;
                continue;
            }

            let best = sentences
                .iter()
                .map(|s| (jaccard(&words, &s.words), s))
                .max_by(|a, b| a.0.total_cmp(&b.0));
            let contradicted = best.is_some_and(|(score, sentence)| {
                score >= CONTRADICTION_JACCARD && sentence.negated != has_negation(claim)
            });
            if contradicted {
                debug!(claim = %claim, "Claim contradicts closest evidence sentence");
                summary.contradictions += 1;
            } else {
                summary.supported += 1;
            }
        }
        Ok(summary)
    }
}

impl Default for GroundingAuditor {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;

    fn corpus() -> Vec<CanonicalResult> {
        vec![
            CanonicalResult::new(
                SourceKind::LiteratureIndex,
                "Venous-to-arterial carbon dioxide gap in septic shock",
                "",
            )
            .unwrap()
            .with_snippet(
                "An elevated carbon dioxide gap predicted mortality in septic shock. \
                 Lactate clearance was associated with survival.",
            ),
        ]
    }

    fn claims(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_buckets_partition_claims() {
        let summary = GroundingAuditor::default()
            .audit(
                &claims(&[
                    "An elevated carbon dioxide gap predicted mortality in septic shock.",
                    "An elevated carbon dioxide gap did not predict mortality in septic shock.",
                    "Vasopressin dosing follows renal function.",
                    // Shares words with the title only.
                    "Venous and arterial sampling sites differ.",
                ]),
                &corpus(),
            )
            .unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.supported, 1);
        assert_eq!(summary.contradictions, 1);
        assert_eq!(summary.omissions, 2);
        assert_eq!(
            summary.supported + summary.contradictions + summary.omissions,
            summary.total
        );
    }

    #[test]
    fn test_results_without_snippets_are_no_corpus() {
        let titles_only = vec![
            CanonicalResult::new(SourceKind::LiteratureIndex, "Carbon dioxide gap in septic shock", "")
                .unwrap(),
        ];
        let result = GroundingAuditor::default()
            .audit(&claims(&["Carbon dioxide gap in septic shock."]), &titles_only);
        assert!(matches!(result, Err(AuditError::EmptyCorpus)));
    }

    #[test]
    fn test_empty_corpus_is_an_error() {
        let result = GroundingAuditor::default().audit(&claims(&["Some claim here."]), &[]);
        assert!(matches!(result, Err(AuditError::EmptyCorpus)));
    }

    #[test]
    fn test_claim_limit() {
        let result = GroundingAuditor::new(1).audit(&claims(&["a b c", "d e f"]), &corpus());
        assert!(matches!(
            result,
            Err(AuditError::TooManyClaims { count: 2, limit: 1 })
        ));
    }

    #[test]
    fn test_no_claims_is_empty_summary() {
        let summary = GroundingAuditor::default().audit(&[], &corpus()).unwrap();
        assert_eq!(summary, GroundingSummary::default());
        assert_eq!(summary.support_ratio(), 0.0);
    }
}
