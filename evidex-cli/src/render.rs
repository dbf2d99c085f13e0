//! Plain-text rendering of research output and progress.

use evidex_core::config::SourcesConfig;
use evidex_core::research::ProgressEvent;
use evidex_core::{CanonicalResult, ResearchOutput};
use std::fmt::Write;

const MAX_LISTED_AUTHORS: usize = 3;

/// One stderr line per progress event.
pub fn progress_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Plan {
            strategies,
            fallback,
        } => {
            let origin = if *fallback { "fallback tiers" } else { "oracle" };
            format!("  planned {strategies} strategies ({origin})")
        }
        ProgressEvent::StrategyStart {
            index,
            source_kind,
            query,
            ..
        } => format!("  [{}] {source_kind}: {query}", index + 1),
        ProgressEvent::StrategyEnd {
            index,
            result_count,
            error,
            ..
        } => match error {
            Some(e) => format!("  [{}] failed: {e}", index + 1),
            None => format!("  [{}] {result_count} results", index + 1),
        },
        ProgressEvent::DedupDone {
            original_count,
            deduplicated_count,
        } => format!("  deduplicated {original_count} -> {deduplicated_count}"),
        ProgressEvent::SynthesisStart { curated } => {
            format!("  synthesizing from {curated} results")
        }
        ProgressEvent::SynthesisDone { ok } => {
            if *ok {
                "  synthesis done".to_string()
            } else {
                "  synthesis failed".to_string()
            }
        }
    }
}

/// Markdown-flavoured report for the terminal.
pub fn render_output(output: &ResearchOutput) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", output.query);
    if let Some(ref refined) = output.refined_query
        && refined != &output.query
    {
        let _ = writeln!(out, "Refined query: {refined}");
    }
    let _ = writeln!(
        out,
        "Status: {}",
        serde_json::to_value(output.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    );

    for section in &output.sections {
        let _ = writeln!(out, "\n## {}\n{}", section.heading, section.body.trim());
    }

    if !output.relevant_references.is_empty() {
        let _ = writeln!(out, "\n## References");
        for (i, reference) in output.relevant_references.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, citation(reference));
        }
    }

    if !output.limitations.is_empty() {
        let _ = writeln!(out, "\n## Limitations");
        for limitation in &output.limitations {
            let _ = writeln!(out, "- {limitation}");
        }
    }

    let m = &output.research_metrics;
    let _ = writeln!(
        out,
        "\n---\n{} strategies, {} raw results, {} duplicates removed, {} curated, quality {:.2}, grounding {}/{} supported, {} ms",
        m.strategies_planned,
        m.raw_results,
        m.deduplication.removed_duplicates,
        m.curated_results,
        m.quality.overall_score,
        m.grounding.supported,
        m.grounding.total,
        m.total_duration_ms
    );
    out
}

fn citation(r: &CanonicalResult) -> String {
    let mut parts = vec![r.display_title().trim_end_matches('.').to_string()];
    if !r.authors.is_empty() {
        let mut authors = r
            .authors
            .iter()
            .take(MAX_LISTED_AUTHORS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if r.authors.len() > MAX_LISTED_AUTHORS {
            authors.push_str(", et al");
        }
        parts.push(authors);
    }
    match (&r.journal, &r.publication_date) {
        (Some(j), Some(d)) => parts.push(format!("{j}, {d}")),
        (Some(j), None) => parts.push(j.clone()),
        (None, Some(d)) => parts.push(d.clone()),
        (None, None) => {}
    }
    let locator = r
        .doi()
        .map(|d| format!("doi:{d}"))
        .unwrap_or_else(|| r.url.clone());
    if !locator.is_empty() {
        parts.push(locator);
    }
    parts.join(". ")
}

/// Table of configured sources.
pub fn render_sources(sources: &SourcesConfig) -> String {
    let rows = [
        ("pubmed", &sources.pubmed),
        ("semantic_scholar", &sources.semantic_scholar),
        ("openalex", &sources.openalex),
        ("europe_pmc_guidelines", &sources.europe_pmc_guidelines),
        ("europe_pmc_preprints", &sources.europe_pmc_preprints),
        ("web", &sources.web),
    ];
    let mut out = String::new();
    for (name, settings) in rows {
        let _ = writeln!(
            out,
            "{name:<24} {:<9} timeout {}s, min interval {}ms{}",
            if settings.enabled { "enabled" } else { "disabled" },
            settings.timeout_secs,
            settings.min_interval_ms,
            if settings.api_key.is_some() { ", api key set" } else { "" }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidex_core::research::NarrativeSection;
    use evidex_core::{OutputStatus, SourceKind};
    use pretty_assertions::assert_eq;

    fn reference() -> CanonicalResult {
        CanonicalResult::new(
            SourceKind::LiteratureIndex,
            "CO2 gap in septic shock.",
            "https://pubmed.ncbi.nlm.nih.gov/1/",
        )
        .unwrap()
        .with_authors(vec!["A A".into(), "B B".into(), "C C".into(), "D D".into()])
        .with_journal(Some("Crit Care".into()))
        .with_publication_date(Some("2019".into()))
        .with_doi(Some("10.1/x".into()))
    }

    #[test]
    fn test_citation_format() {
        assert_eq!(
            citation(&reference()),
            "CO2 gap in septic shock. A A, B B, C C, et al. Crit Care, 2019. doi:10.1/x"
        );
    }

    #[test]
    fn test_render_output_sections() {
        let output = ResearchOutput {
            query: "co2 gap".into(),
            refined_query: Some("arteriovenous CO2 gap".into()),
            status: OutputStatus::Completed,
            sections: vec![NarrativeSection::new("Overview", "Gap predicts mortality.")],
            relevant_references: vec![reference()],
            research_metrics: Default::default(),
            limitations: vec!["Titles and abstracts only".into()],
        };
        let text = render_output(&output);
        assert!(text.starts_with("# co2 gap\nRefined query: arteriovenous CO2 gap\nStatus: completed"));
        assert!(text.contains("## Overview\nGap predicts mortality."));
        assert!(text.contains("1. CO2 gap in septic shock."));
        assert!(text.contains("- Titles and abstracts only"));
    }

    #[test]
    fn test_progress_lines() {
        let line = progress_line(&ProgressEvent::StrategyEnd {
            index: 0,
            source_kind: SourceKind::WebSearch,
            result_count: 4,
            error: None,
        });
        assert_eq!(line, "  [1] 4 results");
        assert_eq!(
            progress_line(&ProgressEvent::Plan {
                strategies: 3,
                fallback: true
            }),
            "  planned 3 strategies (fallback tiers)"
        );
    }

    #[test]
    fn test_render_sources() {
        let mut sources = SourcesConfig::default();
        sources.web.enabled = false;
        let table = render_sources(&sources);
        assert_eq!(table.lines().count(), 6);
        assert!(table.lines().last().unwrap().contains("disabled"));
    }
}
