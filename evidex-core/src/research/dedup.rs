//! Merging records that describe the same work.
//!
//! Matching runs in three stages: PMID equality, normalized DOI equality,
//! then title similarity gated by author overlap. Identifiers are matched
//! against every record already in a group, not only its survivor, and a
//! record that links two groups (one by PMID, the other by DOI) joins them.
//! A DOI match is refused when both sides carry different PMIDs, and
//! records with conflicting identifiers are never merged on title alone.
//! The survivor of a merge is the record from the higher-priority source
//! kind, and it inherits any fields it was missing from the records it
//! absorbed.

use super::quality::{QualityAssessment, QualityScorer};
use super::text::normalize_title;
use crate::config::{DedupConfig, QualityConfig};
use crate::types::{CanonicalResult, SourceKind, StudyType};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::HashSet;
use tracing::{debug, info};

/// Why two records were merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    #[serde(rename = "exact-id")]
    ExactId,
    #[serde(rename = "doi-id")]
    DoiId,
    #[serde(rename = "title-similarity")]
    TitleSimilarity,
}

/// Identifying fields of a record, as shown in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub source_kind: SourceKind,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

impl From<&CanonicalResult> for ResultSummary {
    fn from(r: &CanonicalResult) -> Self {
        Self {
            source_kind: r.source_kind,
            title: r.title.clone(),
            url: r.url.clone(),
            pmid: r.external_ids.pmid.clone(),
            doi: r.external_ids.doi.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDuplicate {
    pub result: ResultSummary,
    pub reason: MatchReason,
}

/// A survivor and every record folded into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeGroup {
    pub primary: ResultSummary,
    /// Reason of the first merge into this group.
    pub match_reason: MatchReason,
    pub duplicates: Vec<MergedDuplicate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationReport {
    pub original_count: usize,
    pub deduplicated_count: usize,
    pub removed_duplicates: usize,
    pub merge_groups: Vec<MergeGroup>,
}

/// Merged results with their report and quality assessment.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub results: Vec<CanonicalResult>,
    pub report: DeduplicationReport,
    pub quality: QualityAssessment,
}

struct Group {
    primary: CanonicalResult,
    /// Every PMID and normalized DOI seen in the group.
    pmids: HashSet<String>,
    dois: HashSet<String>,
    /// Normalized title and author surnames of the primary.
    title: String,
    surnames: HashSet<String>,
    absorbed: Vec<(CanonicalResult, MatchReason)>,
}

impl Group {
    fn new(result: CanonicalResult) -> Self {
        let mut group = Self {
            pmids: pmid_key(&result).into_iter().collect(),
            dois: result.doi().and_then(normalize_doi).into_iter().collect(),
            title: String::new(),
            surnames: HashSet::new(),
            primary: result,
            absorbed: Vec::new(),
        };
        group.refresh_keys();
        group
    }

    fn index_ids(&mut self, result: &CanonicalResult) {
        if let Some(pmid) = pmid_key(result) {
            self.pmids.insert(pmid);
        }
        if let Some(doi) = result.doi().and_then(normalize_doi) {
            self.dois.insert(doi);
        }
    }

    fn refresh_keys(&mut self) {
        self.title = normalize_title(&self.primary.title);
        self.surnames = surnames(&self.primary.authors);
    }

    /// True when both sides carry PMIDs and none of them agree.
    fn pmid_conflict(&self, pmid: Option<&str>) -> bool {
        pmid.is_some_and(|p| !self.pmids.is_empty() && !self.pmids.contains(p))
    }

    fn doi_conflict(&self, doi: Option<&str>) -> bool {
        doi.is_some_and(|d| !self.dois.is_empty() && !self.dois.contains(d))
    }

    fn absorb(&mut self, mut incoming: CanonicalResult, reason: MatchReason) {
        self.index_ids(&incoming);
        if incoming.source_kind.priority() < self.primary.source_kind.priority() {
            std::mem::swap(&mut self.primary, &mut incoming);
        }
        backfill(&mut self.primary, &incoming);
        self.absorbed.push((incoming, reason));
        self.refresh_keys();
    }

    /// Fold another group into this one. Its primary joins under `reason`;
    /// its absorbed records keep their own reasons.
    fn union(&mut self, other: Group, reason: MatchReason) {
        self.absorb(other.primary, reason);
        for (record, why) in other.absorbed {
            self.absorb(record, why);
        }
    }
}

/// A record's place among the existing groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    New,
    Join(usize, MatchReason),
    /// The record matches group `pmid` by PMID and group `doi` by DOI.
    Link { pmid: usize, doi: usize },
}

pub struct Deduplicator {
    config: DedupConfig,
    scorer: QualityScorer,
}

impl Deduplicator {
    pub fn new(dedup: DedupConfig, quality: QualityConfig) -> Self {
        Self {
            config: dedup,
            scorer: QualityScorer::new(quality),
        }
    }

    /// Merge duplicates and assess the merged set.
    pub fn deduplicate(&self, results: Vec<CanonicalResult>) -> DedupOutcome {
        let (results, report) = self.merge_duplicates(results);
        let quality = self.scorer.assess(&results);
        DedupOutcome {
            results,
            report,
            quality,
        }
    }

    /// Merge duplicates. Survivors keep the position of their group's first record.
    pub fn merge_duplicates(
        &self,
        results: Vec<CanonicalResult>,
    ) -> (Vec<CanonicalResult>, DeduplicationReport) {
        let original_count = results.len();
        let mut groups: Vec<Group> = Vec::new();

        for result in results {
            match self.place(&groups, &result) {
                Placement::New => groups.push(Group::new(result)),
                Placement::Join(index, reason) => {
                    debug!(
                        title = %result.display_title(),
                        source = %result.source_kind,
                        reason = ?reason,
                        "Merging duplicate"
                    );
                    groups[index].absorb(result, reason);
                }
                Placement::Link { pmid, doi } => {
                    debug!(
                        title = %result.display_title(),
                        source = %result.source_kind,
                        "Record links two groups, joining them"
                    );
                    // The earlier group keeps its position.
                    let (keep, drop, joined_by, folded_by) = if pmid < doi {
                        (pmid, doi, MatchReason::ExactId, MatchReason::DoiId)
                    } else {
                        (doi, pmid, MatchReason::DoiId, MatchReason::ExactId)
                    };
                    let folded = groups.remove(drop);
                    groups[keep].absorb(result, joined_by);
                    groups[keep].union(folded, folded_by);
                }
            }
        }

        let mut merge_groups = Vec::new();
        let mut survivors = Vec::with_capacity(groups.len());
        for group in groups {
            if let Some((_, first_reason)) = group.absorbed.first() {
                merge_groups.push(MergeGroup {
                    primary: ResultSummary::from(&group.primary),
                    match_reason: *first_reason,
                    duplicates: group
                        .absorbed
                        .iter()
                        .map(|(r, reason)| MergedDuplicate {
                            result: ResultSummary::from(r),
                            reason: *reason,
                        })
                        .collect(),
                });
            }
            survivors.push(group.primary);
        }

        let report = DeduplicationReport {
            original_count,
            deduplicated_count: survivors.len(),
            removed_duplicates: original_count - survivors.len(),
            merge_groups,
        };
        info!(
            original = report.original_count,
            deduplicated = report.deduplicated_count,
            removed = report.removed_duplicates,
            "Deduplication complete"
        );
        (survivors, report)
    }

    fn place(&self, groups: &[Group], result: &CanonicalResult) -> Placement {
        let pmid = pmid_key(result);
        let pmid_hit = pmid
            .as_ref()
            .and_then(|p| groups.iter().position(|g| g.pmids.contains(p)));

        let doi = result.doi().and_then(normalize_doi);
        let doi_hit = doi.as_ref().and_then(|d| {
            groups
                .iter()
                .position(|g| g.dois.contains(d) && !g.pmid_conflict(pmid.as_deref()))
        });

        match (pmid_hit, doi_hit) {
            (Some(p), Some(d)) if p != d => return Placement::Link { pmid: p, doi: d },
            (Some(p), _) => return Placement::Join(p, MatchReason::ExactId),
            (None, Some(d)) => return Placement::Join(d, MatchReason::DoiId),
            (None, None) => {}
        }

        let title = normalize_title(&result.title);
        if title.is_empty() {
            return Placement::New;
        }
        let authors = surnames(&result.authors);
        groups
            .iter()
            .position(|g| {
                !g.pmid_conflict(pmid.as_deref())
                    && !g.doi_conflict(doi.as_deref())
                    && self.titles_match(&g.title, &g.surnames, &title, &authors)
            })
            .map_or(Placement::New, |index| {
                Placement::Join(index, MatchReason::TitleSimilarity)
            })
    }

    fn titles_match(
        &self,
        a: &str,
        a_authors: &HashSet<String>,
        b: &str,
        b_authors: &HashSet<String>,
    ) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        let similarity = title_similarity(a, b);
        if a_authors.is_empty() || b_authors.is_empty() {
            return similarity >= self.config.title_only_threshold;
        }
        similarity >= self.config.title_similarity_threshold
            && author_overlap(a_authors, b_authors) >= self.config.author_overlap_threshold
    }
}

/// Character-level similarity ratio of two normalized titles.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

fn pmid_key(result: &CanonicalResult) -> Option<String> {
    result
        .pmid()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// Case-folded DOI without resolver or `doi:` prefixes.
pub fn normalize_doi(doi: &str) -> Option<String> {
    let mut value = doi.trim().to_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
        "doi:",
    ] {
        if let Some(rest) = value.strip_prefix(prefix) {
            value = rest.trim().to_string();
        }
    }
    (!value.is_empty()).then_some(value)
}

/// Surname of a loosely formatted author name.
///
/// Handles "Smith J", "Smith, John" and "John Smith".
pub fn surname(author: &str) -> Option<String> {
    let author = author.trim();
    if let Some((last, _)) = author.split_once(',') {
        return clean_name(last);
    }
    let parts: Vec<&str> = author.split_whitespace().collect();
    let last = parts.last()?;
    let initials = last.chars().count() <= 3 && last.chars().all(|c| c.is_uppercase() || c == '.');
    if initials && parts.len() > 1 {
        clean_name(parts[0])
    } else {
        clean_name(last)
    }
}

fn clean_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_lowercase();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn surnames(authors: &[String]) -> HashSet<String> {
    authors.iter().filter_map(|a| surname(a)).collect()
}

/// Overlap relative to the smaller author set.
fn author_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

fn backfill(primary: &mut CanonicalResult, other: &CanonicalResult) {
    if primary.title.is_empty() {
        primary.title = other.title.clone();
    }
    if primary.url.is_empty() {
        primary.url = other.url.clone();
    }
    if primary.snippet.trim().is_empty() {
        primary.snippet = other.snippet.clone();
    }
    if primary.citation_count.is_none() {
        primary.citation_count = other.citation_count;
    }
    if primary.external_ids.doi.is_none() {
        primary.external_ids.doi = other.external_ids.doi.clone();
    }
    if primary.external_ids.pmid.is_none() {
        primary.external_ids.pmid = other.external_ids.pmid.clone();
    }
    if primary.journal.is_none() {
        primary.journal = other.journal.clone();
    }
    if primary.publication_date.is_none() {
        primary.publication_date = other.publication_date.clone();
    }
    if primary.authors.is_empty() {
        primary.authors = other.authors.clone();
    }
    if primary.study_type == StudyType::Unknown {
        primary.study_type = other.study_type;
    }
    if primary.relevance_score.is_none() {
        primary.relevance_score = other.relevance_score;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dedup() -> Deduplicator {
        Deduplicator::new(DedupConfig::default(), QualityConfig::default())
    }

    fn record(kind: SourceKind, title: &str) -> CanonicalResult {
        CanonicalResult::new(kind, title, "").unwrap()
    }

    #[test]
    fn test_duplicate_pmids_leave_one_survivor() {
        let results = vec![
            record(SourceKind::AcademicAggregator, "Lactate clearance in sepsis")
                .with_pmid(Some("111".into())),
            record(SourceKind::LiteratureIndex, "Lactate clearance in sepsis.")
                .with_pmid(Some("111".into())),
            record(SourceKind::CitationNetwork, "Something else entirely")
                .with_pmid(Some("222".into())),
        ];
        let (merged, report) = dedup().merge_duplicates(results);
        assert_eq!(merged.len(), 2);
        assert_eq!(report.removed_duplicates, 1);
        assert_eq!(report.merge_groups[0].match_reason, MatchReason::ExactId);
        // The literature index outranks the aggregator.
        assert_eq!(merged[0].source_kind, SourceKind::LiteratureIndex);
    }

    #[test]
    fn test_doi_normalization_merges_and_backfills() {
        let web = record(SourceKind::WebSearch, "Venous-to-arterial CO2 gap in septic shock")
            .with_doi(Some("https://doi.org/10.1186/CC1234".into()))
            .with_citation_count(Some(42));
        let pubmed = record(
            SourceKind::LiteratureIndex,
            "The venous-arterial carbon dioxide gap in septic shock patients",
        )
        .with_doi(Some("doi:10.1186/cc1234".into()))
        .with_pmid(Some("999".into()));

        let (merged, report) = dedup().merge_duplicates(vec![web, pubmed]);
        assert_eq!(merged.len(), 1);
        let survivor = &merged[0];
        assert_eq!(survivor.source_kind, SourceKind::LiteratureIndex);
        assert_eq!(survivor.citation_count, Some(42));
        assert_eq!(survivor.pmid(), Some("999"));
        assert_eq!(report.merge_groups.len(), 1);
        assert_eq!(report.merge_groups[0].match_reason, MatchReason::DoiId);
        assert_eq!(
            report.merge_groups[0].duplicates[0].result.source_kind,
            SourceKind::WebSearch
        );
    }

    #[test]
    fn test_record_linking_two_groups_joins_them() {
        let results = vec![
            record(SourceKind::LiteratureIndex, "Lactate kinetics in septic shock")
                .with_pmid(Some("1".into())),
            record(SourceKind::WebSearch, "Why your lactate number matters")
                .with_doi(Some("10.1/x".into())),
            record(SourceKind::AcademicAggregator, "Lactate kinetics in septic shock")
                .with_pmid(Some("1".into()))
                .with_doi(Some("10.1/X".into())),
        ];
        let (merged, report) = dedup().merge_duplicates(results);
        assert_eq!(merged.len(), 1);
        assert_eq!(report.removed_duplicates, 2);
        let survivor = &merged[0];
        assert_eq!(survivor.source_kind, SourceKind::LiteratureIndex);
        assert_eq!(survivor.pmid(), Some("1"));
        assert_eq!(survivor.doi(), Some("10.1/X"));

        let group = &report.merge_groups[0];
        assert_eq!(group.match_reason, MatchReason::ExactId);
        let reasons: Vec<(SourceKind, MatchReason)> = group
            .duplicates
            .iter()
            .map(|d| (d.result.source_kind, d.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (SourceKind::AcademicAggregator, MatchReason::ExactId),
                (SourceKind::WebSearch, MatchReason::DoiId),
            ]
        );
    }

    #[test]
    fn test_linked_groups_keep_earliest_position() {
        let results = vec![
            record(SourceKind::WebSearch, "Why your lactate number matters")
                .with_doi(Some("10.1/x".into())),
            record(SourceKind::GuidelineRepo, "Surviving sepsis campaign"),
            record(SourceKind::LiteratureIndex, "Lactate kinetics in septic shock")
                .with_pmid(Some("1".into())),
            record(SourceKind::AcademicAggregator, "Lactate kinetics in septic shock")
                .with_pmid(Some("1".into()))
                .with_doi(Some("10.1/x".into())),
        ];
        let (merged, report) = dedup().merge_duplicates(results);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_kind, SourceKind::LiteratureIndex);
        assert_eq!(merged[1].source_kind, SourceKind::GuidelineRepo);
        assert_eq!(report.merge_groups[0].match_reason, MatchReason::DoiId);
        assert_eq!(report.merge_groups[0].duplicates.len(), 2);
    }

    #[test]
    fn test_absorbed_ids_still_match() {
        // 10.1/b only lives on the absorbed web record, not on the survivor.
        let results = vec![
            record(SourceKind::LiteratureIndex, "Vasopressin in septic shock")
                .with_pmid(Some("77".into()))
                .with_doi(Some("10.1/a".into())),
            record(SourceKind::WebSearch, "Vasopressin trial summary")
                .with_pmid(Some("77".into()))
                .with_doi(Some("10.1/b".into())),
            record(SourceKind::CitationNetwork, "VASST follow-up").with_doi(Some("10.1/b".into())),
        ];
        let (merged, report) = dedup().merge_duplicates(results);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].doi(), Some("10.1/a"));
        assert_eq!(report.removed_duplicates, 2);
        assert_eq!(report.merge_groups[0].duplicates[1].reason, MatchReason::DoiId);
    }

    #[test]
    fn test_doi_match_refused_when_pmids_differ() {
        let a = record(SourceKind::LiteratureIndex, "Erratum: fluid balance in sepsis")
            .with_pmid(Some("100".into()))
            .with_doi(Some("10.1/shared".into()));
        let b = record(SourceKind::AcademicAggregator, "Fluid balance in sepsis")
            .with_pmid(Some("200".into()))
            .with_doi(Some("10.1/shared".into()));
        let (merged, report) = dedup().merge_duplicates(vec![a, b]);
        assert_eq!(merged.len(), 2);
        assert!(report.merge_groups.is_empty());
    }

    #[test]
    fn test_blank_literature_snippet_takes_merged_abstract() {
        let pubmed = record(SourceKind::LiteratureIndex, "CO2 gap in septic shock: a meta-analysis")
            .with_pmid(Some("31234567".into()))
            .with_doi(Some("10.1186/s13054-019-2400-1".into()));
        let scholar = record(SourceKind::AcademicAggregator, "CO2 gap in septic shock")
            .with_doi(Some("10.1186/s13054-019-2400-1".into()))
            .with_snippet("A high CO2 gap was associated with higher mortality.");

        for order in [
            vec![pubmed.clone(), scholar.clone()],
            vec![scholar.clone(), pubmed.clone()],
        ] {
            let (merged, _) = dedup().merge_duplicates(order);
            assert_eq!(merged.len(), 1);
            assert_eq!(merged[0].source_kind, SourceKind::LiteratureIndex);
            assert_eq!(
                merged[0].snippet,
                "A high CO2 gap was associated with higher mortality."
            );
        }
    }

    #[test]
    fn test_near_identical_titles_with_shared_authors_merge() {
        let a = record(
            SourceKind::AcademicAggregator,
            "Central venous-to-arterial CO2 difference as a prognostic tool",
        )
        .with_authors(vec!["Jean-Louis Vincent".into(), "Daniel De Backer".into()]);
        let b = record(
            SourceKind::CitationNetwork,
            "Central venous to arterial CO2 difference as a prognostic tool.",
        )
        .with_authors(vec!["Vincent JL".into(), "Mallat J".into()]);
        let (merged, report) = dedup().merge_duplicates(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            report.merge_groups[0].match_reason,
            MatchReason::TitleSimilarity
        );
    }

    #[test]
    fn test_similar_titles_without_shared_authors_stay_apart() {
        let a = record(SourceKind::AcademicAggregator, "Fluid therapy in septic shock")
            .with_authors(vec!["Smith J".into()]);
        let b = record(SourceKind::CitationNetwork, "Fluid therapy in septic shock")
            .with_authors(vec!["Jones K".into()]);
        let (merged, _) = dedup().merge_duplicates(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_conflicting_dois_are_never_fuzzy_merged() {
        let a = record(SourceKind::LiteratureIndex, "Sepsis guidelines 2021")
            .with_doi(Some("10.1/a".into()));
        let b = record(SourceKind::GuidelineRepo, "Sepsis guidelines 2021")
            .with_doi(Some("10.1/b".into()));
        let (merged, report) = dedup().merge_duplicates(vec![a, b]);
        assert_eq!(merged.len(), 2);
        assert!(report.merge_groups.is_empty());
    }

    #[test]
    fn test_title_only_match_needs_higher_similarity() {
        let a = record(SourceKind::WebSearch, "Lactate in septic shock");
        let b = record(SourceKind::AcademicAggregator, "Lactate in septic shock!");
        let c = record(SourceKind::CitationNetwork, "Lactate in cardiogenic shock");
        let (merged, _) = dedup().merge_duplicates(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_kind, SourceKind::AcademicAggregator);
    }

    #[test]
    fn test_count_invariant_and_quality() {
        let outcome = dedup().deduplicate(vec![
            record(SourceKind::LiteratureIndex, "A").with_pmid(Some("1".into())),
            record(SourceKind::WebSearch, "A").with_pmid(Some("1".into())),
            record(SourceKind::WebSearch, "B"),
        ]);
        let r = &outcome.report;
        assert_eq!(r.deduplicated_count, r.original_count - r.removed_duplicates);
        assert_eq!(outcome.results.len(), r.deduplicated_count);
        assert!((0.0..=1.0).contains(&outcome.quality.overall_score));
    }

    #[test]
    fn test_normalize_doi() {
        assert_eq!(
            normalize_doi(" HTTPS://DOI.ORG/10.1000/XYZ ").as_deref(),
            Some("10.1000/xyz")
        );
        assert_eq!(normalize_doi("doi: 10.1/a").as_deref(), Some("10.1/a"));
        assert_eq!(normalize_doi("doi:"), None);
    }

    #[test]
    fn test_surname_formats() {
        assert_eq!(surname("Smith J").as_deref(), Some("smith"));
        assert_eq!(surname("Smith, John").as_deref(), Some("smith"));
        assert_eq!(surname("John Smith").as_deref(), Some("smith"));
        assert_eq!(surname("De Backer D").as_deref(), Some("de"));
        assert_eq!(surname("Vincent JL").as_deref(), Some("vincent"));
        assert_eq!(surname("  ").as_deref(), None);
    }

    #[test]
    fn test_report_serializes_reason_names() {
        let json = serde_json::to_string(&MatchReason::TitleSimilarity).unwrap();
        assert_eq!(json, "\"title-similarity\"");
        let json = serde_json::to_string(&MatchReason::DoiId).unwrap();
        assert_eq!(json, "\"doi-id\"");
    }
}
