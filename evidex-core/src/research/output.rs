//! The structured result of one research run.

use super::dedup::DeduplicationReport;
use super::executor::{SourceStats, StrategyTiming};
use super::grounding::GroundingSummary;
use super::oracle::NarrativeSection;
use super::planner::PlannerState;
use super::quality::QualityAssessment;
use crate::types::{CanonicalResult, ResearchMode, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Overall quality below this adds a limitation.
const LOW_QUALITY_THRESHOLD: f64 = 0.4;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Completed,
    NoStrategy,
    NoEvidence,
    SynthesisFailed,
    Cancelled,
}

impl OutputStatus {
    pub fn is_error(&self) -> bool {
        !matches!(self, OutputStatus::Completed)
    }
}

/// Everything measured during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchMetrics {
    pub session_id: Uuid,
    pub mode: ResearchMode,
    pub planner_path: Vec<PlannerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_error: Option<String>,
    pub strategies_planned: usize,
    pub source_stats: BTreeMap<SourceKind, SourceStats>,
    pub strategy_timings: Vec<StrategyTiming>,
    pub search_duration_ms: u64,
    pub total_duration_ms: u64,
    pub early_exit: bool,
    pub supplementary_used: bool,
    pub deadline_hit: bool,
    pub raw_results: usize,
    pub trust_dropped: usize,
    pub curated_results: usize,
    pub deduplication: DeduplicationReport,
    pub quality: QualityAssessment,
    pub grounding: GroundingSummary,
}

impl ResearchMetrics {
    pub fn failed_sources(&self) -> Vec<(SourceKind, usize)> {
        self.source_stats
            .iter()
            .filter(|(_, s)| s.errors > 0)
            .map(|(k, s)| (*k, s.errors))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_query: Option<String>,
    pub status: OutputStatus,
    pub sections: Vec<NarrativeSection>,
    /// Ordered by relevance, capped by the mode.
    pub relevant_references: Vec<CanonicalResult>,
    pub research_metrics: ResearchMetrics,
    pub limitations: Vec<String>,
}

impl ResearchOutput {
    /// Same shape as a successful output, with an explanatory narrative and
    /// no references.
    pub fn failure(
        query: impl Into<String>,
        refined_query: Option<String>,
        status: OutputStatus,
        explanation: impl Into<String>,
        metrics: ResearchMetrics,
        mut limitations: Vec<String>,
    ) -> Self {
        let explanation = explanation.into();
        if !limitations.iter().any(|l| l == &explanation) {
            limitations.insert(0, explanation.clone());
        }
        Self {
            query: query.into(),
            refined_query,
            status,
            sections: vec![NarrativeSection::new("Research status", explanation)],
            relevant_references: Vec::new(),
            research_metrics: metrics,
            limitations,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.status.is_error()
    }
}

/// Limitations derived from what happened during the run.
///
/// Never empty: the snippet-only nature of the evidence always applies.
pub fn derive_limitations(metrics: &ResearchMetrics, references: &[CanonicalResult]) -> Vec<String> {
    let mut limitations = Vec::new();

    for (kind, errors) in metrics.failed_sources() {
        limitations.push(format!(
            "{} failed {errors} time(s); its evidence may be missing",
            kind.as_str().replace('_', " ")
        ));
    }
    if metrics.early_exit {
        limitations.push(
            "Search stopped once the result target was reached; lower-priority strategies were not run"
                .into(),
        );
    }
    if metrics.deadline_hit {
        limitations.push("The time budget ran out before every strategy was run".into());
    }
    if metrics.trust_dropped > 0 {
        limitations.push(format!(
            "{} result(s) from untrusted domains were excluded",
            metrics.trust_dropped
        ));
    }
    let kinds: BTreeSet<SourceKind> = references.iter().map(|r| r.source_kind).collect();
    if kinds.len() == 1 {
        limitations.push("All retained evidence comes from a single type of source".into());
    }
    if metrics.deduplication.deduplicated_count > 0
        && metrics.quality.overall_score < LOW_QUALITY_THRESHOLD
    {
        limitations.push(format!(
            "Overall evidence quality score is low ({:.2})",
            metrics.quality.overall_score
        ));
    }
    if metrics.grounding.omissions > 0 {
        limitations.push(format!(
            "{} of {} narrative statement(s) could not be traced to the retrieved evidence",
            metrics.grounding.omissions, metrics.grounding.total
        ));
    }
    if metrics.grounding.contradictions > 0 {
        limitations.push(format!(
            "{} narrative statement(s) conflict with the retrieved evidence",
            metrics.grounding.contradictions
        ));
    }
    limitations.push(
        "Evidence was assessed from titles and abstracts only; full texts were not reviewed"
            .into(),
    );
    limitations
}
