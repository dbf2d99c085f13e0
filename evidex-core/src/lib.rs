//! # Evidex Core
//!
//! Core library for Evidex, an evidence-research aggregation engine.
//! Provides the canonical citation model, configuration, source connector
//! registry, retry and pacing utilities, and the research pipeline
//! (planning, tiered execution, trust filtering, deduplication, ranking,
//! synthesis hand-off and grounding audit).

pub mod config;
pub mod connector;
pub mod error;
pub mod research;
pub mod retry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{EvidexConfig, ModeProfile, load_config};
pub use connector::{ConnectorRegistry, SourceConnector};
pub use error::{AuditError, ConfigError, EvidexError, OracleError, Result, SourceError};
pub use research::{
    ExtractiveSynthesizer, NoStrategyOracle, OutputStatus, ResearchOrchestrator, ResearchOutput,
    StrategyOracle, SynthesisOracle,
};
pub use retry::{Clock, ManualClock, RateLimiter, RetryPolicy, TokioClock};
pub use types::{
    CanonicalResult, ExternalIds, Pico, ResearchMode, SearchStrategy, SourceKind, StrategyTier,
    StudyType, TaskInput,
};
