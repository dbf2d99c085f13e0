//! End-to-end pipeline tests with stub connectors and a manual clock.

use async_trait::async_trait;
use evidex_core::research::{
    MatchReason, NarrativeSections, OracleStrategy, PlannerState, ProposedStrategy,
};
use evidex_core::{
    CanonicalResult, ConnectorRegistry, EvidexConfig, ExtractiveSynthesizer, ManualClock,
    NoStrategyOracle, OracleError, OutputStatus, Pico, ResearchMode, ResearchOrchestrator,
    SourceConnector, SourceError, SourceKind, StrategyOracle, SynthesisOracle, TaskInput,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct FixedConnector {
    kind: SourceKind,
    results: Vec<CanonicalResult>,
}

#[async_trait]
impl SourceConnector for FixedConnector {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        "fixed"
    }

    async fn search(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<CanonicalResult>, SourceError> {
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

/// Proposes one numbered strategy per listed source.
struct FixedOracle(Vec<SourceKind>);

#[async_trait]
impl StrategyOracle for FixedOracle {
    async fn formulate_strategy(&self, input: &TaskInput) -> Result<OracleStrategy, OracleError> {
        Ok(OracleStrategy {
            refined_query: None,
            strategies: self
                .0
                .iter()
                .enumerate()
                .map(|(i, kind)| ProposedStrategy {
                    source_kind: *kind,
                    query: format!("{} {}", input.query, i),
                    rationale: "fixed".into(),
                })
                .collect(),
        })
    }
}

struct DownSynthesis;

#[async_trait]
impl SynthesisOracle for DownSynthesis {
    async fn synthesize(
        &self,
        _query: &str,
        _curated: &[CanonicalResult],
    ) -> Result<NarrativeSections, OracleError> {
        Err(OracleError::Timeout { timeout_secs: 60 })
    }
}

fn registry(connectors: Vec<FixedConnector>) -> Arc<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();
    for connector in connectors {
        registry.register(Arc::new(connector));
    }
    Arc::new(registry)
}

fn orchestrator(
    registry: Arc<ConnectorRegistry>,
    strategy: Arc<dyn StrategyOracle>,
    synthesis: Arc<dyn SynthesisOracle>,
) -> ResearchOrchestrator {
    ResearchOrchestrator::new(registry, strategy, synthesis, EvidexConfig::default())
        .with_clock(Arc::new(ManualClock::new()))
        .with_trace(None)
}

fn co2_gap_pair() -> Vec<FixedConnector> {
    let pubmed = CanonicalResult::new(
        SourceKind::LiteratureIndex,
        "Venous-to-arterial carbon dioxide gap and mortality in septic shock",
        "https://pubmed.ncbi.nlm.nih.gov/31000001/",
    )
    .unwrap()
    .with_pmid(Some("31000001".into()))
    .with_doi(Some("10.1186/s13054-019-2400-x".into()))
    .with_authors(vec!["Ospina-Tascon GA".into()])
    .with_snippet("A persistently high carbon dioxide gap predicted mortality in septic shock.");
    let scholar = CanonicalResult::new(
        SourceKind::AcademicAggregator,
        "Venous to arterial CO2 gap and mortality in septic shock: a cohort",
        "https://www.semanticscholar.org/paper/abc",
    )
    .unwrap()
    .with_doi(Some("10.1186/S13054-019-2400-X".into()))
    .with_citation_count(Some(42))
    .with_snippet("Carbon dioxide gap above 6 mmHg was associated with mortality.");
    vec![
        FixedConnector {
            kind: SourceKind::LiteratureIndex,
            results: vec![pubmed],
        },
        FixedConnector {
            kind: SourceKind::AcademicAggregator,
            results: vec![scholar],
        },
    ]
}

fn co2_gap_oracle() -> Arc<dyn StrategyOracle> {
    Arc::new(FixedOracle(vec![
        SourceKind::LiteratureIndex,
        SourceKind::AcademicAggregator,
    ]))
}

#[tokio::test]
async fn doi_duplicates_merge_into_one_reference() {
    let output = orchestrator(
        registry(co2_gap_pair()),
        co2_gap_oracle(),
        Arc::new(ExtractiveSynthesizer::default()),
    )
    .run(TaskInput::new("carbon dioxide gap septic shock"))
    .await;

    assert_eq!(output.status, OutputStatus::Completed);
    assert_eq!(output.relevant_references.len(), 1);
    let survivor = &output.relevant_references[0];
    assert_eq!(survivor.source_kind, SourceKind::LiteratureIndex);
    assert_eq!(survivor.pmid(), Some("31000001"));
    assert_eq!(survivor.citation_count, Some(42));

    let dedup = &output.research_metrics.deduplication;
    assert_eq!(dedup.original_count, 2);
    assert_eq!(dedup.deduplicated_count, 1);
    assert_eq!(dedup.removed_duplicates, 1);
    assert_eq!(dedup.merge_groups.len(), 1);
    assert_eq!(dedup.merge_groups[0].match_reason, MatchReason::DoiId);

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(
        json["research_metrics"]["deduplication"]["merge_groups"][0]["match_reason"],
        "doi-id"
    );
}

#[tokio::test]
async fn synthesis_failure_keeps_output_shape() {
    let output = orchestrator(
        registry(co2_gap_pair()),
        co2_gap_oracle(),
        Arc::new(DownSynthesis),
    )
    .run(TaskInput::new("carbon dioxide gap septic shock"))
    .await;

    assert_eq!(output.status, OutputStatus::SynthesisFailed);
    assert!(!output.is_success());
    assert!(output.relevant_references.is_empty());
    assert!(!output.sections.is_empty());
    assert!(!output.limitations.is_empty());
    // Search-side metrics survive the failure.
    assert_eq!(output.research_metrics.raw_results, 2);
}

#[tokio::test]
async fn quick_mode_stops_once_target_is_reached() {
    let results = (0..20)
        .map(|i| {
            CanonicalResult::new(
                SourceKind::LiteratureIndex,
                format!("Distinct trial number {i} on vasopressor timing"),
                format!("https://pubmed.ncbi.nlm.nih.gov/{}/", 1000 + i),
            )
            .unwrap()
            .with_pmid(Some((1000 + i).to_string()))
        })
        .collect();
    let output = orchestrator(
        registry(vec![FixedConnector {
            kind: SourceKind::LiteratureIndex,
            results,
        }]),
        Arc::new(FixedOracle(vec![SourceKind::LiteratureIndex; 3])),
        Arc::new(ExtractiveSynthesizer::default()),
    )
    .run(TaskInput::new("vasopressor timing").with_mode(ResearchMode::Quick))
    .await;

    let metrics = &output.research_metrics;
    assert!(metrics.early_exit);
    assert_eq!(metrics.strategies_planned, 3);
    // Ten results per strategy: the second call crosses the target of 15.
    assert_eq!(metrics.strategy_timings.len(), 2);
    assert_eq!(metrics.raw_results, 20);
    assert!(!metrics.supplementary_used);
}

#[tokio::test]
async fn missing_oracle_falls_back_to_pico_tiers() {
    let result = CanonicalResult::new(
        SourceKind::LiteratureIndex,
        "Early norepinephrine in septic shock",
        "https://pubmed.ncbi.nlm.nih.gov/2000/",
    )
    .unwrap()
    .with_pmid(Some("2000".into()));
    let input = TaskInput::new("").with_pico(Pico {
        population: Some("septic shock".into()),
        intervention: Some("early norepinephrine".into()),
        comparison: None,
        outcome: Some("mortality".into()),
    });
    let output = orchestrator(
        registry(vec![FixedConnector {
            kind: SourceKind::LiteratureIndex,
            results: vec![result],
        }]),
        Arc::new(NoStrategyOracle),
        Arc::new(ExtractiveSynthesizer::default()),
    )
    .run(input)
    .await;

    let metrics = &output.research_metrics;
    assert!(metrics.oracle_error.is_some());
    assert!(metrics.planner_path.contains(&PlannerState::FallbackTier1));
    let queries: Vec<&str> = metrics
        .strategy_timings
        .iter()
        .map(|t| t.query.as_str())
        .collect();
    assert!(queries.contains(&"septic shock"));
    assert!(queries.contains(&"early norepinephrine"));
    assert_eq!(output.relevant_references.len(), 1);
}

#[tokio::test]
async fn untrusted_domains_never_reach_references() {
    let make = |title: &str, url: &str| {
        CanonicalResult::new(SourceKind::WebSearch, title, url)
            .unwrap()
            .with_snippet("Lactate clearance guided resuscitation in sepsis.")
    };
    let web = FixedConnector {
        kind: SourceKind::WebSearch,
        results: vec![
            make("Lactate clearance", "https://en.wikipedia.org/wiki/Lactate"),
            make("Lactate thread", "https://www.reddit.com/r/medicine/lactate"),
            make("Lactate tips", "https://random-health-tips.example/lactate"),
        ],
    };
    let output = orchestrator(
        registry(vec![web]),
        Arc::new(FixedOracle(vec![SourceKind::WebSearch; 2])),
        Arc::new(ExtractiveSynthesizer::default()),
    )
    .run(TaskInput::new("lactate clearance sepsis"))
    .await;

    // Two planned calls plus the supplementary web search, two drops each.
    assert!(output.research_metrics.supplementary_used);
    assert_eq!(output.research_metrics.raw_results, 9);
    assert_eq!(output.research_metrics.trust_dropped, 6);
    assert!(
        output
            .relevant_references
            .iter()
            .all(|r| r.url.contains("wikipedia.org"))
    );
    assert_eq!(output.relevant_references.len(), 1);
}
