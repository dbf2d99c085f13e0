//! Source connector trait and registry.
//!
//! One connector per external search service. Connectors are registered at
//! startup, keyed by the [`SourceKind`] they serve, and looked up by the
//! planner (which kinds exist) and the executor (which connector to call).

use crate::error::SourceError;
use crate::types::{CanonicalResult, SourceKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait every search-service adapter implements.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// The kind of service this connector talks to.
    fn kind(&self) -> SourceKind;

    /// Short service name used in logs and metrics.
    fn name(&self) -> &str;

    /// Search the service and translate its payload into canonical results.
    ///
    /// Raw items that cannot be mapped are skipped, not reported as errors.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<CanonicalResult>, SourceError>;

    /// Upper bound for one `search` call.
    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }
}

/// Registered connectors, at most one per source kind.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<SourceKind, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector. A second connector for the same kind replaces
    /// the first and is returned.
    pub fn register(
        &mut self,
        connector: Arc<dyn SourceConnector>,
    ) -> Option<Arc<dyn SourceConnector>> {
        let kind = connector.kind();
        debug!(source = %kind, name = connector.name(), "Registering connector");
        self.connectors.insert(kind, connector)
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.get(&kind).cloned()
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// Registered kinds in merge-priority order.
    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<SourceKind> = self.connectors.keys().copied().collect();
        kinds.sort_by_key(|k| k.priority());
        kinds
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
