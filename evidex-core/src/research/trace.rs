//! Per-session JSON trace written at the end of a run.

use super::dedup::DeduplicationReport;
use super::executor::StrategyTiming;
use super::output::{OutputStatus, ResearchOutput};
use super::planner::PlannerState;
use crate::error::EvidexError;
use crate::types::{ResearchMode, SearchStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const PREVIEW_CHARS: usize = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTrace {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_query: Option<String>,
    pub mode: ResearchMode,
    pub status: OutputStatus,
    pub plan: Vec<SearchStrategy>,
    pub planner_path: Vec<PlannerState>,
    pub strategies: Vec<StrategyTiming>,
    pub deduplication: DeduplicationReport,
    pub synthesis_preview: String,
}

impl SessionTrace {
    pub fn from_output(
        output: &ResearchOutput,
        plan: &[SearchStrategy],
        created_at: DateTime<Utc>,
    ) -> Self {
        let metrics = &output.research_metrics;
        let preview = super::oracle::NarrativeSections::new(output.sections.clone())
            .preview(PREVIEW_CHARS);
        Self {
            session_id: metrics.session_id,
            created_at,
            query: output.query.clone(),
            refined_query: output.refined_query.clone(),
            mode: metrics.mode,
            status: output.status,
            plan: plan.to_vec(),
            planner_path: metrics.planner_path.clone(),
            strategies: metrics.strategy_timings.clone(),
            deduplication: metrics.deduplication.clone(),
            synthesis_preview: preview,
        }
    }
}

/// Writes traces as `<dir>/<session_id>.json`.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    dir: PathBuf,
}

impl TraceWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Written to a `.json.tmp` sibling first, then renamed into place.
    pub fn write(&self, trace: &SessionTrace) -> Result<PathBuf, EvidexError> {
        let json = serde_json::to_vec_pretty(trace)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", trace.session_id));
        let staging = self.dir.join(format!("{}.json.tmp", trace.session_id));
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &path)?;
        Ok(path)
    }
}
