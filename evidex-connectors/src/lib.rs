//! # Evidex Connectors
//!
//! Source connectors and LLM oracle adapters for Evidex.
//! Provides PubMed, Semantic Scholar, OpenAlex, Europe PMC (preprints and
//! guidelines) and DuckDuckGo web search, plus OpenAI-compatible strategy
//! and synthesis oracles.

pub mod europepmc;
pub mod http;
pub mod openalex;
pub mod oracles;
pub mod pubmed;
pub mod semantic_scholar;
pub mod web;

use evidex_core::config::{SourceSettings, SourcesConfig};
use evidex_core::{Clock, ConnectorRegistry, SourceConnector, SourceError};
use std::sync::Arc;

pub use europepmc::{EuropePmcConnector, EuropePmcScope};
pub use openalex::OpenAlexConnector;
pub use oracles::{ChatClient, LlmStrategyOracle, LlmSynthesisOracle};
pub use pubmed::PubMedConnector;
pub use semantic_scholar::SemanticScholarConnector;
pub use web::DuckDuckGoConnector;

/// Build a registry holding every enabled connector.
///
/// A connector that fails to initialize is skipped with a warning; the
/// pipeline runs with whatever sources remain.
pub fn build_registry(sources: &SourcesConfig, clock: Arc<dyn Clock>) -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    register_if_enabled(&mut registry, "pubmed", &sources.pubmed, |s| {
        PubMedConnector::new(s, sources, clock.clone()).map(|c| Arc::new(c) as Arc<dyn SourceConnector>)
    });
    register_if_enabled(&mut registry, "semantic_scholar", &sources.semantic_scholar, |s| {
        SemanticScholarConnector::new(s, sources, clock.clone())
            .map(|c| Arc::new(c) as Arc<dyn SourceConnector>)
    });
    register_if_enabled(&mut registry, "openalex", &sources.openalex, |s| {
        OpenAlexConnector::new(s, sources, clock.clone()).map(|c| Arc::new(c) as Arc<dyn SourceConnector>)
    });
    register_if_enabled(
        &mut registry,
        "europe_pmc_guidelines",
        &sources.europe_pmc_guidelines,
        |s| {
            EuropePmcConnector::new(EuropePmcScope::Guidelines, s, sources, clock.clone())
                .map(|c| Arc::new(c) as Arc<dyn SourceConnector>)
        },
    );
    register_if_enabled(
        &mut registry,
        "europe_pmc_preprints",
        &sources.europe_pmc_preprints,
        |s| {
            EuropePmcConnector::new(EuropePmcScope::Preprints, s, sources, clock.clone())
                .map(|c| Arc::new(c) as Arc<dyn SourceConnector>)
        },
    );
    register_if_enabled(&mut registry, "web", &sources.web, |s| {
        DuckDuckGoConnector::new(s, sources, clock.clone()).map(|c| Arc::new(c) as Arc<dyn SourceConnector>)
    });
    registry
}

fn register_if_enabled<F>(
    registry: &mut ConnectorRegistry,
    name: &str,
    settings: &SourceSettings,
    build: F,
) where
    F: FnOnce(&SourceSettings) -> Result<Arc<dyn SourceConnector>, SourceError>,
{
    if !settings.enabled {
        tracing::debug!(source = name, "Source disabled in configuration");
        return;
    }
    match build(settings) {
        Ok(connector) => {
            registry.register(connector);
        }
        Err(e) => tracing::warn!(source = name, error = %e, "Failed to initialize connector"),
    }
}
