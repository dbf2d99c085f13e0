//! Evidence research pipeline.
//!
//! One run moves through these stages:
//! 1. **Plan**: oracle strategies, or deterministic fallback tiers
//! 2. **Search**: sequential, paced connector calls with early exit
//! 3. **Curate**: trust filter, deduplication, quality, ranking
//! 4. **Synthesize**: narrative from the curated snippets
//! 5. **Audit**: grounding of the narrative against the evidence

pub mod dedup;
pub mod engine;
pub mod executor;
pub mod grounding;
pub mod oracle;
pub mod output;
pub mod planner;
pub mod progress;
pub mod quality;
pub mod ranking;
pub mod session;
pub mod synthesis;
pub mod text;
pub mod trace;
pub mod trust;

pub use dedup::{DedupOutcome, Deduplicator, DeduplicationReport, MatchReason, MergeGroup};
pub use engine::ResearchOrchestrator;
pub use executor::{ExecutionBudget, ExecutionContext, ExecutionOutcome, SourceStats, TieredExecutor};
pub use grounding::{GroundingAuditor, GroundingSummary};
pub use oracle::{
    NarrativeSection, NarrativeSections, NoStrategyOracle, OracleStrategy, ProposedStrategy,
    StrategyOracle, SynthesisOracle,
};
pub use output::{OutputStatus, ResearchMetrics, ResearchOutput};
pub use planner::{PlannerState, StrategyPlan, StrategyPlanner};
pub use progress::{ChannelProgressSink, NoOpProgressSink, ProgressEvent, ProgressSink};
pub use quality::{QualityAssessment, QualityScorer};
pub use ranking::{Ranker, classify_study_type, rank_score};
pub use session::{ResearchPhase, ResearchSession};
pub use synthesis::ExtractiveSynthesizer;
pub use trace::{SessionTrace, TraceWriter};
pub use trust::{DropReason, TrustFilter, TrustOutcome};
