//! Strategy planning: oracle first, deterministic fallback tiers after.
//!
//! The planner is a small state machine:
//!
//! ```text
//! OraclePending ──sufficient──▶ OracleSucceeded
//!       │
//!   insufficient / failed
//!       ▼
//! FallbackTier1 ─▶ FallbackTier2 ─▶ FallbackTier3 ─▶ Exhausted
//! ```
//!
//! Every transition is pure; only [`StrategyPlanner::plan`] touches the
//! oracle, and it never fails.

use super::oracle::{OracleStrategy, ProposedStrategy, StrategyOracle};
use super::text::simplify_query;
use crate::config::ModeProfile;
use crate::error::OracleError;
use crate::types::{SearchStrategy, SourceKind, StrategyTier, TaskInput};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SIMPLIFIED_QUERY_TERMS: usize = 8;
const HUMANS_FILTER: &str = "humans[MeSH Terms]";
const LANGUAGE_FILTER: &str = "english[lang]";

/// Planner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerState {
    OraclePending,
    OracleSucceeded,
    FallbackTier1,
    FallbackTier2,
    FallbackTier3,
    Exhausted,
}

impl PlannerState {
    /// Next state. `oracle_sufficient` only matters while the oracle is pending.
    pub fn next(self, oracle_sufficient: bool) -> Self {
        match self {
            PlannerState::OraclePending if oracle_sufficient => PlannerState::OracleSucceeded,
            PlannerState::OraclePending => PlannerState::FallbackTier1,
            PlannerState::FallbackTier1 => PlannerState::FallbackTier2,
            PlannerState::FallbackTier2 => PlannerState::FallbackTier3,
            PlannerState::FallbackTier3 => PlannerState::Exhausted,
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlannerState::OracleSucceeded | PlannerState::Exhausted)
    }
}

/// Ordered strategies plus how the planner got there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub strategies: Vec<SearchStrategy>,
    pub refined_query: Option<String>,
    /// States visited, starting with `OraclePending`.
    pub path: Vec<PlannerState>,
    /// Why the oracle was not used, when it wasn't.
    pub oracle_error: Option<String>,
}

impl StrategyPlan {
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn final_state(&self) -> Option<PlannerState> {
        self.path.last().copied()
    }

    pub fn used_fallback(&self) -> bool {
        self.path.contains(&PlannerState::FallbackTier1)
    }
}

/// Turns a task into an ordered list of search strategies.
pub struct StrategyPlanner {
    available: Vec<SourceKind>,
    profile: ModeProfile,
}

impl StrategyPlanner {
    /// `available` is the set of kinds that have a registered connector.
    pub fn new(available: Vec<SourceKind>, profile: ModeProfile) -> Self {
        let mut available = available;
        available.sort_by_key(|k| k.priority());
        available.dedup();
        Self { available, profile }
    }

    /// Ask the oracle (bounded by `timeout` and `cancel`), then plan.
    pub async fn plan(
        &self,
        input: &TaskInput,
        oracle: &dyn StrategyOracle,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> StrategyPlan {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(OracleError::Cancelled),
            result = tokio::time::timeout(timeout, oracle.formulate_strategy(input)) => {
                result.unwrap_or(Err(OracleError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }))
            }
        };
        self.plan_with_outcome(input, outcome)
    }

    /// Deterministic planning from an already-obtained oracle outcome.
    pub fn plan_with_outcome(
        &self,
        input: &TaskInput,
        outcome: Result<OracleStrategy, OracleError>,
    ) -> StrategyPlan {
        let mut plan = StrategyPlan::default();
        let mut seen = HashSet::new();
        let mut outcome = Some(outcome);
        let mut state = PlannerState::OraclePending;
        plan.path.push(state);

        while !state.is_terminal() {
            let mut oracle_sufficient = false;
            match state {
                PlannerState::OraclePending => match outcome.take() {
                    Some(Ok(oracle)) => {
                        plan.refined_query = oracle
                            .refined_query
                            .map(|q| q.trim().to_string())
                            .filter(|q| !q.is_empty());
                        let mapped = self.map_oracle(oracle.strategies);
                        let usable = self.extend(&mut plan.strategies, &mut seen, mapped);
                        oracle_sufficient = usable >= self.profile.min_oracle_strategies.max(1);
                        if !oracle_sufficient {
                            warn!(
                                usable,
                                required = self.profile.min_oracle_strategies,
                                "Strategy oracle under-delivered, using fallback tiers"
                            );
                            plan.oracle_error = Some(format!(
                                "oracle produced {usable} usable strategies"
                            ));
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Strategy oracle failed, using fallback tiers");
                        plan.oracle_error = Some(e.to_string());
                    }
                    None => {}
                },
                PlannerState::FallbackTier1 => {
                    let tier = self.tier1(input);
                    self.extend(&mut plan.strategies, &mut seen, tier);
                }
                PlannerState::FallbackTier2 => {
                    let tier = self.tier2(input, plan.refined_query.as_deref());
                    self.extend(&mut plan.strategies, &mut seen, tier);
                }
                PlannerState::FallbackTier3 => {
                    let tier = self.tier3(input);
                    self.extend(&mut plan.strategies, &mut seen, tier);
                }
                PlannerState::OracleSucceeded | PlannerState::Exhausted => {}
            }
            state = state.next(oracle_sufficient);
            plan.path.push(state);
        }

        plan.strategies.truncate(self.profile.max_strategies);
        info!(
            strategies = plan.strategies.len(),
            final_state = ?state,
            fallback = plan.used_fallback(),
            "Search plan ready"
        );
        plan
    }

    /// Kind targeted by the fallback tiers.
    fn fallback_kind(&self) -> Option<SourceKind> {
        if self.available.contains(&SourceKind::LiteratureIndex) {
            Some(SourceKind::LiteratureIndex)
        } else {
            self.available.first().copied()
        }
    }

    fn map_oracle(&self, proposed: Vec<ProposedStrategy>) -> Vec<SearchStrategy> {
        proposed
            .into_iter()
            .filter(|p| {
                let registered = self.available.contains(&p.source_kind);
                if !registered {
                    info!(source = %p.source_kind, "Dropping oracle strategy for unregistered source");
                }
                registered && !p.query.trim().is_empty()
            })
            .map(|p| {
                SearchStrategy::new(
                    p.source_kind,
                    p.query.trim(),
                    self.profile.max_results_per_strategy,
                    p.rationale,
                    StrategyTier::Oracle,
                )
            })
            .collect()
    }

    fn tier1(&self, input: &TaskInput) -> Vec<SearchStrategy> {
        let Some(kind) = self.fallback_kind() else {
            return Vec::new();
        };
        [
            (input.pico.population(), "Population-only search"),
            (input.pico.intervention(), "Intervention-only search"),
        ]
        .into_iter()
        .filter_map(|(element, rationale)| {
            element.map(|q| {
                SearchStrategy::new(
                    kind,
                    q,
                    self.profile.max_results_per_strategy,
                    rationale,
                    StrategyTier::Tier1,
                )
            })
        })
        .collect()
    }

    fn tier2(&self, input: &TaskInput, refined: Option<&str>) -> Vec<SearchStrategy> {
        let Some(kind) = self.fallback_kind() else {
            return Vec::new();
        };
        let simplified = simplify_query(&input.query, SIMPLIFIED_QUERY_TERMS);
        let (query, rationale) = if let Some(refined) = refined {
            (refined.to_string(), "Broad search on the refined query")
        } else if !simplified.is_empty() {
            (simplified, "Broad search on the simplified query")
        } else if let Some(combined) = input.pico.combined_query() {
            (combined, "Broad search combining PICO elements")
        } else {
            return Vec::new();
        };
        vec![SearchStrategy::new(
            kind,
            query,
            self.profile.max_results_per_strategy,
            rationale,
            StrategyTier::Tier2,
        )]
    }

    fn tier3(&self, input: &TaskInput) -> Vec<SearchStrategy> {
        let Some(kind) = self.fallback_kind() else {
            return Vec::new();
        };
        let base = input.effective_query();
        if base.is_empty() {
            return Vec::new();
        }
        let query = if kind == SourceKind::LiteratureIndex {
            with_standard_filters(&base)
        } else {
            base
        };
        vec![SearchStrategy::new(
            kind,
            query,
            self.profile.max_results_per_strategy,
            "Full-text search with standard filters",
            StrategyTier::Tier3,
        )]
    }

    /// Append strategies not already planned; returns how many were added.
    fn extend(
        &self,
        plan: &mut Vec<SearchStrategy>,
        seen: &mut HashSet<(SourceKind, String)>,
        strategies: Vec<SearchStrategy>,
    ) -> usize {
        let before = plan.len();
        for strategy in strategies {
            let key = (
                strategy.source_kind(),
                strategy.query().trim().to_lowercase(),
            );
            if seen.insert(key) {
                plan.push(strategy);
            }
        }
        plan.len() - before
    }
}

/// Append the human-subjects and language filters unless already present.
pub fn with_standard_filters(query: &str) -> String {
    let lower = query.to_lowercase();
    let mut out = query.trim().to_string();
    if !lower.contains("humans[") {
        out.push_str(&format!(" AND {HUMANS_FILTER}"));
    }
    if !lower.contains("english[la") {
        out.push_str(&format!(" AND {LANGUAGE_FILTER}"));
    }
    out
}
