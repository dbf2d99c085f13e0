//! Research orchestrator: one request in, one structured output out.
//!
//! Drives planner → executor → trust filter → deduplicator → ranking →
//! synthesis → grounding audit. Nothing below this layer reaches the caller
//! as an error; every failure mode becomes an output status plus limitations.

use super::dedup::Deduplicator;
use super::executor::{ExecutionBudget, ExecutionContext, TieredExecutor};
use super::grounding::{GroundingAuditor, GroundingSummary};
use super::oracle::{NarrativeSections, StrategyOracle, SynthesisOracle};
use super::output::{OutputStatus, ResearchOutput, derive_limitations};
use super::planner::StrategyPlanner;
use super::progress::{self, ProgressEvent, ProgressSink};
use super::ranking::Ranker;
use super::session::{ResearchPhase, ResearchSession};
use super::text::truncate_chars;
use super::trace::{SessionTrace, TraceWriter};
use super::trust::TrustFilter;
use crate::config::EvidexConfig;
use crate::connector::ConnectorRegistry;
use crate::error::OracleError;
use crate::retry::{self, Clock, RetryPolicy, TokioClock};
use crate::types::{CanonicalResult, SearchStrategy, TaskInput};
use chrono::Datelike;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ResearchOrchestrator {
    registry: Arc<ConnectorRegistry>,
    strategy_oracle: Arc<dyn StrategyOracle>,
    synthesis_oracle: Arc<dyn SynthesisOracle>,
    config: EvidexConfig,
    clock: Arc<dyn Clock>,
    progress: Option<Arc<dyn ProgressSink>>,
    trace: Option<TraceWriter>,
}

impl ResearchOrchestrator {
    /// Trace capture follows `config.trace`.
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        strategy_oracle: Arc<dyn StrategyOracle>,
        synthesis_oracle: Arc<dyn SynthesisOracle>,
        config: EvidexConfig,
    ) -> Self {
        let trace = config
            .trace
            .enabled
            .then(|| TraceWriter::new(config.trace.resolve_dir()));
        Self {
            registry,
            strategy_oracle,
            synthesis_oracle,
            config,
            clock: Arc::new(TokioClock),
            progress: None,
            trace,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_trace(mut self, writer: Option<TraceWriter>) -> Self {
        self.trace = writer;
        self
    }

    pub fn config(&self) -> &EvidexConfig {
        &self.config
    }

    pub async fn run(&self, input: TaskInput) -> ResearchOutput {
        self.run_with_cancel(input, CancellationToken::new()).await
    }

    /// Run one research request. Cancelling `cancel` ends the run early with
    /// a `cancelled` output.
    pub async fn run_with_cancel(
        &self,
        input: TaskInput,
        cancel: CancellationToken,
    ) -> ResearchOutput {
        let mut session = ResearchSession::new(input, self.clock.now());
        info!(
            session_id = %session.id,
            mode = ?session.input.mode,
            query = %session.input.effective_query(),
            "Starting research run"
        );
        let mut plan = Vec::new();
        let output = self.drive(&mut session, &mut plan, &cancel).await;
        self.write_trace(&session, &output, &plan);
        info!(
            session_id = %session.id,
            status = ?output.status,
            references = output.relevant_references.len(),
            duration_ms = output.research_metrics.total_duration_ms,
            "Research run finished"
        );
        output
    }

    async fn drive(
        &self,
        session: &mut ResearchSession,
        plan_out: &mut Vec<SearchStrategy>,
        cancel: &CancellationToken,
    ) -> ResearchOutput {
        let research = &self.config.research;
        let profile = research.profile(session.input.mode).clone();
        let deadline = session.started + Duration::from_secs(research.overall_timeout_secs);
        let sink = self.progress.as_deref();

        // Planning
        let planner = StrategyPlanner::new(self.registry.kinds(), profile.clone());
        let plan = planner
            .plan(
                &session.input,
                self.strategy_oracle.as_ref(),
                cancel,
                Duration::from_secs(research.oracle_timeout_secs),
            )
            .await;
        session.refined_query = plan.refined_query.clone();
        session.metrics.planner_path = plan.path.clone();
        session.metrics.oracle_error = plan.oracle_error.clone();
        session.metrics.strategies_planned = plan.strategies.len();
        *plan_out = plan.strategies.clone();
        progress::emit(
            sink,
            ProgressEvent::Plan {
                strategies: plan.strategies.len(),
                fallback: plan.used_fallback(),
            },
        );

        if cancel.is_cancelled() {
            return self.fail(session, OutputStatus::Cancelled, "The research run was cancelled.");
        }
        if plan.is_empty() {
            return self.fail(
                session,
                OutputStatus::NoStrategy,
                "No search strategy could be formed for this question.",
            );
        }

        // Searching
        session.transition(ResearchPhase::Searching);
        let executor = TieredExecutor::new(
            self.registry.clone(),
            self.clock.clone(),
            RetryPolicy::from(&self.config.retry),
        );
        let original_query = session.input.effective_query();
        let outcome = executor
            .execute(
                &plan.strategies,
                &ExecutionBudget::from_profile(&profile, Some(deadline)),
                ExecutionContext {
                    cancel,
                    progress: sink,
                    original_query: &original_query,
                },
            )
            .await;
        let metrics = &mut session.metrics;
        metrics.source_stats = outcome.source_stats.clone();
        metrics.strategy_timings = outcome.timings.clone();
        metrics.search_duration_ms = outcome.search_duration_ms;
        metrics.early_exit = outcome.early_exit;
        metrics.supplementary_used = outcome.supplementary_used;
        metrics.deadline_hit = outcome.deadline_hit;
        metrics.raw_results = outcome.results.len();
        if outcome.cancelled {
            return self.fail(session, OutputStatus::Cancelled, "The research run was cancelled.");
        }

        // Curating
        session.transition(ResearchPhase::Curating);
        let trusted = TrustFilter::new(&self.config.trust).filter(outcome.results);
        session.metrics.trust_dropped = trusted.dropped.len();
        let deduplicated = Deduplicator::new(self.config.dedup.clone(), self.config.quality.clone())
            .deduplicate(trusted.kept);
        progress::emit(
            sink,
            ProgressEvent::DedupDone {
                original_count: deduplicated.report.original_count,
                deduplicated_count: deduplicated.report.deduplicated_count,
            },
        );
        session.metrics.deduplication = deduplicated.report;
        session.metrics.quality = deduplicated.quality;

        let working_query = session.working_query();
        let ranked = Ranker::new(&self.config.quality).rank(
            deduplicated.results,
            &working_query,
            chrono::Utc::now().year(),
        );
        if ranked.is_empty() {
            return self.fail(
                session,
                OutputStatus::NoEvidence,
                "No relevant evidence was found for this question.",
            );
        }
        let curated: Vec<CanonicalResult> = ranked
            .iter()
            .take(profile.max_curated_results)
            .cloned()
            .map(|mut r| {
                r.snippet = truncate_chars(&r.snippet, research.max_snippet_chars);
                r
            })
            .collect();
        session.metrics.curated_results = curated.len();

        // Synthesizing
        if self.clock.now() >= deadline {
            session.metrics.deadline_hit = true;
            return self.fail(
                session,
                OutputStatus::SynthesisFailed,
                "The time budget ran out before the evidence could be synthesized.",
            );
        }
        session.transition(ResearchPhase::Synthesizing);
        progress::emit(
            sink,
            ProgressEvent::SynthesisStart {
                curated: curated.len(),
            },
        );
        let synthesis_timeout = Duration::from_secs(research.oracle_timeout_secs)
            .min(deadline.saturating_duration_since(self.clock.now()));
        let synthesis = self
            .synthesize(&working_query, &curated, cancel, synthesis_timeout)
            .await;
        progress::emit(
            sink,
            ProgressEvent::SynthesisDone {
                ok: synthesis.is_ok(),
            },
        );
        let narrative = match synthesis {
            Ok(narrative) => narrative,
            Err(OracleError::Cancelled) => {
                return self.fail(session, OutputStatus::Cancelled, "The research run was cancelled.");
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed");
                return self.fail(
                    session,
                    OutputStatus::SynthesisFailed,
                    format!("The evidence could not be synthesized: {e}"),
                );
            }
        };

        // Auditing
        session.transition(ResearchPhase::Auditing);
        let mut claims = narrative.claims();
        claims.truncate(research.max_audited_claims);
        session.metrics.grounding = GroundingAuditor::new(research.max_audited_claims)
            .audit(&claims, &ranked)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Grounding audit failed, reporting zeros");
                GroundingSummary::default()
            });

        let references: Vec<CanonicalResult> =
            ranked.into_iter().take(profile.max_references).collect();
        session.metrics.total_duration_ms = self.elapsed_ms(session);
        let limitations = derive_limitations(&session.metrics, &references);
        session.transition(ResearchPhase::Complete);

        ResearchOutput {
            query: session.input.effective_query(),
            refined_query: session.refined_query.clone(),
            status: OutputStatus::Completed,
            sections: narrative.sections,
            relevant_references: references,
            research_metrics: session.metrics.clone(),
            limitations,
        }
    }

    async fn synthesize(
        &self,
        query: &str,
        curated: &[CanonicalResult],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<NarrativeSections, OracleError> {
        let narrative = tokio::select! {
            _ = cancel.cancelled() => return Err(OracleError::Cancelled),
            result = retry::timeout(
                self.clock.as_ref(),
                timeout,
                self.synthesis_oracle.synthesize(query, curated),
            ) => {
                result.unwrap_or(Err(OracleError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }))?
            }
        };
        if narrative.is_empty() {
            return Err(OracleError::Malformed {
                message: "synthesis returned no narrative".into(),
            });
        }
        Ok(narrative)
    }

    fn fail(
        &self,
        session: &mut ResearchSession,
        status: OutputStatus,
        explanation: impl Into<String>,
    ) -> ResearchOutput {
        let explanation = explanation.into();
        if status == OutputStatus::Cancelled {
            session.transition(ResearchPhase::Cancelled);
        } else {
            session.fail(explanation.clone());
        }
        session.metrics.total_duration_ms = self.elapsed_ms(session);
        let limitations = derive_limitations(&session.metrics, &[]);
        ResearchOutput::failure(
            session.input.effective_query(),
            session.refined_query.clone(),
            status,
            explanation,
            session.metrics.clone(),
            limitations,
        )
    }

    fn elapsed_ms(&self, session: &ResearchSession) -> u64 {
        elapsed_ms(self.clock.now(), session.started)
    }

    fn write_trace(&self, session: &ResearchSession, output: &ResearchOutput, plan: &[SearchStrategy]) {
        let Some(writer) = &self.trace else {
            return;
        };
        let trace = SessionTrace::from_output(output, plan, session.created_at);
        match writer.write(&trace) {
            Ok(path) => info!(path = %path.display(), "Session trace written"),
            Err(e) => warn!(error = %e, "Failed to write session trace"),
        }
    }
}

fn elapsed_ms(now: Instant, since: Instant) -> u64 {
    now.saturating_duration_since(since).as_millis() as u64
}
