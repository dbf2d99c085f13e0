//! Contracts for the two LLM-backed steps.
//!
//! Both oracles are advisory collaborators: the planner survives a failing
//! strategy oracle, and the orchestrator turns a failing synthesis oracle
//! into a structured error output.

use super::text::split_sentences;
use crate::error::OracleError;
use crate::types::{CanonicalResult, SourceKind, TaskInput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One strategy suggested by the strategy oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedStrategy {
    pub source_kind: SourceKind,
    pub query: String,
    #[serde(default)]
    pub rationale: String,
}

/// Strategy oracle output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleStrategy {
    #[serde(default)]
    pub refined_query: Option<String>,
    #[serde(default)]
    pub strategies: Vec<ProposedStrategy>,
}

/// Turns a task into a refined query and a list of search strategies.
#[async_trait]
pub trait StrategyOracle: Send + Sync {
    async fn formulate_strategy(&self, input: &TaskInput) -> Result<OracleStrategy, OracleError>;
}

/// A titled block of narrative text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeSection {
    pub heading: String,
    pub body: String,
}

impl NarrativeSection {
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
        }
    }
}

/// Synthesis oracle output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeSections {
    pub sections: Vec<NarrativeSection>,
}

impl NarrativeSections {
    pub fn new(sections: Vec<NarrativeSection>) -> Self {
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.body.trim().is_empty())
    }

    /// Sentences of every section body, used as claims by the grounding audit.
    pub fn claims(&self) -> Vec<String> {
        self.sections
            .iter()
            .flat_map(|s| split_sentences(&s.body))
            .filter(|s| s.split_whitespace().count() >= 3)
            .collect()
    }

    /// First `max_chars` characters of the concatenated narrative.
    pub fn preview(&self, max_chars: usize) -> String {
        let joined = self
            .sections
            .iter()
            .map(|s| format!("{}: {}", s.heading, s.body))
            .collect::<Vec<_>>()
            .join("\n");
        super::text::truncate_chars(&joined, max_chars)
    }
}

/// Writes a narrative from the curated evidence.
///
/// `curated` carries snippets only; implementations must not fetch full text.
#[async_trait]
pub trait SynthesisOracle: Send + Sync {
    async fn synthesize(
        &self,
        query: &str,
        curated: &[CanonicalResult],
    ) -> Result<NarrativeSections, OracleError>;
}

/// Strategy oracle for deployments without an LLM; always defers to the
/// planner's fallback tiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStrategyOracle;

#[async_trait]
impl StrategyOracle for NoStrategyOracle {
    async fn formulate_strategy(&self, _input: &TaskInput) -> Result<OracleStrategy, OracleError> {
        Err(OracleError::Unavailable {
            message: "no strategy oracle configured".into(),
        })
    }
}
