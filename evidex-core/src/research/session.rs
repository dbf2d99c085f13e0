//! Request-scoped state for one research run.
//!
//! A session is created per `run`, owned by that run and dropped with it;
//! nothing in it is shared between requests.

use super::output::ResearchMetrics;
use crate::types::TaskInput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Current phase of a research run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Asking the strategy oracle and applying fallbacks.
    Planning,
    /// Running strategies against connectors.
    Searching,
    /// Trust filtering, deduplication and ranking.
    Curating,
    /// Waiting on the synthesis oracle.
    Synthesizing,
    /// Grounding the narrative against the evidence.
    Auditing,
    Complete,
    Failed,
    Cancelled,
}

impl ResearchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResearchPhase::Complete | ResearchPhase::Failed | ResearchPhase::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResearchSession {
    pub id: Uuid,
    pub input: TaskInput,
    pub phase: ResearchPhase,
    pub refined_query: Option<String>,
    pub metrics: ResearchMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic start, taken from the pipeline clock.
    pub started: Instant,
    pub error: Option<String>,
}

impl ResearchSession {
    pub fn new(input: TaskInput, started: Instant) -> Self {
        let id = Uuid::new_v4();
        let metrics = ResearchMetrics {
            session_id: id,
            mode: input.mode,
            ..Default::default()
        };
        Self {
            id,
            input,
            phase: ResearchPhase::Planning,
            refined_query: None,
            metrics,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started,
            error: None,
        }
    }

    pub fn transition(&mut self, phase: ResearchPhase) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(ResearchPhase::Failed);
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Query used downstream of planning: the refined one when the oracle gave one.
    pub fn working_query(&self) -> String {
        self.refined_query
            .clone()
            .unwrap_or_else(|| self.input.effective_query())
    }
}
