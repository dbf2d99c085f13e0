//! Sequential strategy execution with pacing, early exit and a web top-up.

use super::progress::{self, ProgressEvent, ProgressSink};
use crate::config::ModeProfile;
use crate::connector::{ConnectorRegistry, SourceConnector};
use crate::error::SourceError;
use crate::retry::{self, Clock, RetryPolicy, retry_with_backoff};
use crate::types::{CanonicalResult, SearchStrategy, SourceKind, StrategyTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Limits for one execution.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    /// Raw result count that stops further strategies.
    pub target_results: usize,
    pub inter_call_delay: Duration,
    /// No new strategy starts at or after this instant, and no call runs past it.
    pub deadline: Option<Instant>,
    pub supplementary_max_results: usize,
}

impl ExecutionBudget {
    pub fn from_profile(profile: &ModeProfile, deadline: Option<Instant>) -> Self {
        Self {
            target_results: profile.target_results,
            inter_call_delay: Duration::from_millis(profile.inter_call_delay_ms),
            deadline,
            supplementary_max_results: profile.supplementary_max_results,
        }
    }
}

/// Per-run collaborators borrowed by the executor.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub cancel: &'a CancellationToken,
    pub progress: Option<&'a dyn ProgressSink>,
    /// Used verbatim by the supplementary web search.
    pub original_query: &'a str,
}

/// Counters for one source kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub queries: usize,
    pub errors: usize,
    pub results: usize,
}

/// Timing and outcome of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTiming {
    pub index: usize,
    pub source_kind: SourceKind,
    pub query: String,
    pub tier: StrategyTier,
    pub result_count: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the executor gathered.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub results: Vec<CanonicalResult>,
    pub source_stats: BTreeMap<SourceKind, SourceStats>,
    pub timings: Vec<StrategyTiming>,
    pub search_duration_ms: u64,
    pub early_exit: bool,
    pub supplementary_used: bool,
    pub cancelled: bool,
    pub deadline_hit: bool,
}

impl ExecutionOutcome {
    /// Source kinds with at least one failed call.
    pub fn failed_sources(&self) -> Vec<SourceKind> {
        self.source_stats
            .iter()
            .filter(|(_, s)| s.errors > 0)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn total_errors(&self) -> usize {
        self.source_stats.values().map(|s| s.errors).sum()
    }
}

/// Runs strategies one at a time against the registered connectors.
pub struct TieredExecutor {
    registry: Arc<ConnectorRegistry>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl TieredExecutor {
    pub fn new(registry: Arc<ConnectorRegistry>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            clock,
            retry,
        }
    }

    /// Execute `strategies` in order. Connector errors are counted, never returned.
    pub async fn execute(
        &self,
        strategies: &[SearchStrategy],
        budget: &ExecutionBudget,
        ctx: ExecutionContext<'_>,
    ) -> ExecutionOutcome {
        let started = self.clock.now();
        let mut outcome = ExecutionOutcome::default();
        let mut calls = 0usize;

        for (index, strategy) in strategies.iter().enumerate() {
            if !self.pace(calls, budget, ctx.cancel, &mut outcome).await {
                break;
            }
            self.run_strategy(index, strategy, budget.deadline, ctx, &mut outcome)
                .await;
            calls += 1;

            if ctx.cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            if outcome.deadline_hit {
                break;
            }
            if outcome.results.len() >= budget.target_results {
                if index + 1 < strategies.len() {
                    outcome.early_exit = true;
                    info!(
                        results = outcome.results.len(),
                        target = budget.target_results,
                        skipped = strategies.len() - index - 1,
                        "Target reached, skipping remaining strategies"
                    );
                }
                break;
            }
        }

        let short = outcome.results.len() < budget.target_results;
        let interrupted = outcome.cancelled || outcome.deadline_hit || outcome.early_exit;
        if short
            && !interrupted
            && !ctx.original_query.trim().is_empty()
            && self.registry.contains(SourceKind::WebSearch)
            && self.pace(calls, budget, ctx.cancel, &mut outcome).await
        {
            let supplementary = SearchStrategy::new(
                SourceKind::WebSearch,
                ctx.original_query.trim(),
                budget.supplementary_max_results,
                "Supplementary web search for insufficient results",
                StrategyTier::Supplementary,
            );
            info!(
                results = outcome.results.len(),
                target = budget.target_results,
                "Results below target, running supplementary web search"
            );
            self.run_strategy(
                strategies.len(),
                &supplementary,
                budget.deadline,
                ctx,
                &mut outcome,
            )
            .await;
            outcome.supplementary_used = true;
            if ctx.cancel.is_cancelled() {
                outcome.cancelled = true;
            }
        }

        outcome.search_duration_ms = elapsed_ms(self.clock.now(), started);
        info!(
            results = outcome.results.len(),
            strategies_run = outcome.timings.len(),
            errors = outcome.total_errors(),
            early_exit = outcome.early_exit,
            supplementary = outcome.supplementary_used,
            duration_ms = outcome.search_duration_ms,
            "Search phase complete"
        );
        outcome
    }

    /// Wait the inter-call delay (after the first call) and check the
    /// deadline. Returns false when no further call may start.
    async fn pace(
        &self,
        calls: usize,
        budget: &ExecutionBudget,
        cancel: &CancellationToken,
        outcome: &mut ExecutionOutcome,
    ) -> bool {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return false;
        }
        if calls > 0 && !budget.inter_call_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    return false;
                }
                _ = self.clock.sleep(budget.inter_call_delay) => {}
            }
        }
        if let Some(deadline) = budget.deadline
            && self.clock.now() >= deadline
        {
            warn!("Research deadline reached, no further strategies will run");
            outcome.deadline_hit = true;
            return false;
        }
        true
    }

    async fn run_strategy(
        &self,
        index: usize,
        strategy: &SearchStrategy,
        deadline: Option<Instant>,
        ctx: ExecutionContext<'_>,
        outcome: &mut ExecutionOutcome,
    ) {
        let kind = strategy.source_kind();
        progress::emit(
            ctx.progress,
            ProgressEvent::StrategyStart {
                index,
                source_kind: kind,
                query: strategy.query().to_string(),
                tier: strategy.tier(),
            },
        );
        debug!(index, source = %kind, query = strategy.query(), "Running strategy");

        let started = self.clock.now();
        let result = match self.registry.get(kind) {
            Some(connector) => self.call(connector, strategy, deadline, ctx.cancel).await,
            None => Err(SourceError::NotRegistered { kind }),
        };
        let duration_ms = elapsed_ms(self.clock.now(), started);
        if retry::remaining(self.clock.as_ref(), deadline) == Some(Duration::ZERO) {
            warn!(index, source = %kind, "Research deadline reached during strategy");
            outcome.deadline_hit = true;
        }

        let stats = outcome.source_stats.entry(kind).or_default();
        stats.queries += 1;
        let (result_count, error) = match result {
            Ok(items) => {
                let count = items.len();
                stats.results += count;
                outcome.results.extend(items);
                (count, None)
            }
            Err(e) => {
                stats.errors += 1;
                warn!(index, source = %kind, error = %e, "Strategy failed");
                (0, Some(e.to_string()))
            }
        };

        progress::emit(
            ctx.progress,
            ProgressEvent::StrategyEnd {
                index,
                source_kind: kind,
                result_count,
                error: error.clone(),
            },
        );
        outcome.timings.push(StrategyTiming {
            index,
            source_kind: kind,
            query: strategy.query().to_string(),
            tier: strategy.tier(),
            result_count,
            duration_ms,
            error,
        });
    }

    /// One connector call with per-call timeout, cancellation and retries.
    /// Attempts and backoff waits never run past `deadline`.
    async fn call(
        &self,
        connector: Arc<dyn SourceConnector>,
        strategy: &SearchStrategy,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CanonicalResult>, SourceError> {
        let clock = self.clock.as_ref();
        let query = strategy.query();
        let max_results = strategy.max_results();
        retry_with_backoff(clock, &self.retry, cancel, deadline, || {
            let connector = connector.clone();
            let limit = match retry::remaining(clock, deadline) {
                Some(left) => connector.timeout().min(left),
                None => connector.timeout(),
            };
            async move {
                let timed_out = || SourceError::Timeout {
                    source_name: connector.name().to_string(),
                    timeout_secs: limit.as_secs(),
                };
                if limit.is_zero() {
                    return Err(timed_out());
                }
                tokio::select! {
                    _ = cancel.cancelled() => Err(SourceError::Cancelled {
                        source_name: connector.name().to_string(),
                    }),
                    result = retry::timeout(clock, limit, connector.search(query, max_results)) => {
                        result.unwrap_or_else(|| Err(timed_out()))
                    }
                }
            }
        })
        .await
    }
}

fn elapsed_ms(now: Instant, since: Instant) -> u64 {
    now.saturating_duration_since(since).as_millis() as u64
}
