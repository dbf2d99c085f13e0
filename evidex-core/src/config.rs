//! Configuration system for Evidex.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment.
//! Configuration is loaded from `~/.config/evidex/config.toml` and/or
//! `.evidex/config.toml` in the workspace directory.

use crate::error::ConfigError;
use crate::types::ResearchMode;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidexConfig {
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Optional OpenAI-compatible endpoint backing both oracles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

impl EvidexConfig {
    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in [
            ("quick", &self.research.quick),
            ("comprehensive", &self.research.comprehensive),
        ] {
            if profile.max_strategies == 0
                || profile.max_results_per_strategy == 0
                || profile.target_results == 0
            {
                return Err(ConfigError::Invalid {
                    message: format!("research.{name}: limits must be greater than zero"),
                });
            }
        }

        for (name, value) in [
            (
                "dedup.title_similarity_threshold",
                self.dedup.title_similarity_threshold,
            ),
            (
                "dedup.author_overlap_threshold",
                self.dedup.author_overlap_threshold,
            ),
            ("dedup.title_only_threshold", self.dedup.title_only_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    message: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }

        let q = &self.quality;
        if q.coverage_weight < 0.0 || q.diversity_weight < 0.0 || q.impact_weight < 0.0 {
            return Err(ConfigError::Invalid {
                message: "quality weights must be non-negative".into(),
            });
        }
        if q.coverage_weight + q.diversity_weight + q.impact_weight <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "quality weights must not all be zero".into(),
            });
        }
        Ok(())
    }
}

/// Pipeline-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub default_mode: ResearchMode,
    /// Wall-clock budget for one research run.
    pub overall_timeout_secs: u64,
    /// Budget for each oracle call.
    pub oracle_timeout_secs: u64,
    /// Snippets are truncated to this many characters before synthesis.
    pub max_snippet_chars: usize,
    /// Narrative sentences beyond this count are not audited.
    pub max_audited_claims: usize,
    pub quick: ModeProfile,
    pub comprehensive: ModeProfile,
}

impl ResearchConfig {
    pub fn profile(&self, mode: ResearchMode) -> &ModeProfile {
        match mode {
            ResearchMode::Quick => &self.quick,
            ResearchMode::Comprehensive => &self.comprehensive,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_mode: ResearchMode::Quick,
            overall_timeout_secs: 180,
            oracle_timeout_secs: 45,
            max_snippet_chars: 1200,
            max_audited_claims: 200,
            quick: ModeProfile::quick(),
            comprehensive: ModeProfile::comprehensive(),
        }
    }
}

/// Per-mode limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    pub max_strategies: usize,
    pub max_results_per_strategy: usize,
    /// Enforced pause between consecutive connector calls.
    pub inter_call_delay_ms: u64,
    /// Raw (pre-dedup) result count that stops further strategies.
    pub target_results: usize,
    /// Fewer usable oracle strategies than this triggers the fallback tiers.
    pub min_oracle_strategies: usize,
    /// Results handed to the synthesis oracle.
    pub max_curated_results: usize,
    /// References returned in the output.
    pub max_references: usize,
    pub supplementary_max_results: usize,
}

impl ModeProfile {
    pub fn quick() -> Self {
        Self {
            max_strategies: 6,
            max_results_per_strategy: 10,
            inter_call_delay_ms: 1500,
            target_results: 15,
            min_oracle_strategies: 2,
            max_curated_results: 15,
            max_references: 10,
            supplementary_max_results: 10,
        }
    }

    pub fn comprehensive() -> Self {
        Self {
            max_strategies: 10,
            max_results_per_strategy: 20,
            inter_call_delay_ms: 2000,
            target_results: 25,
            min_oracle_strategies: 4,
            max_curated_results: 30,
            max_references: 20,
            supplementary_max_results: 20,
        }
    }
}

/// Transient-error retry settings for connector calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
        }
    }
}

/// Domain trust lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Trusted registrable domains. Empty disables whitelisting.
    pub whitelist: Vec<String>,
    /// Keywords matched as substrings of the domain.
    pub blacklist: Vec<String>,
    /// Keep results that carry no URL at all.
    pub keep_missing_url: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            whitelist: DEFAULT_TRUSTED_DOMAINS.iter().map(|s| s.to_string()).collect(),
            blacklist: DEFAULT_BLOCKED_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keep_missing_url: true,
        }
    }
}

const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "ncbi.nlm.nih.gov",
    "pubmed.ncbi.nlm.nih.gov",
    "nih.gov",
    "europepmc.org",
    "doi.org",
    "semanticscholar.org",
    "openalex.org",
    "who.int",
    "cdc.gov",
    "nice.org.uk",
    "cochranelibrary.com",
    "nejm.org",
    "thelancet.com",
    "jamanetwork.com",
    "bmj.com",
    "nature.com",
    "science.org",
    "cell.com",
    "sciencedirect.com",
    "springer.com",
    "link.springer.com",
    "wiley.com",
    "onlinelibrary.wiley.com",
    "academic.oup.com",
    "ahajournals.org",
    "atsjournals.org",
    "journals.lww.com",
    "escardio.org",
    "idsociety.org",
    "sccm.org",
    "medrxiv.org",
    "biorxiv.org",
    "frontiersin.org",
    "plos.org",
    "journals.plos.org",
    "mdpi.com",
    "biomedcentral.com",
    "ccforum.biomedcentral.com",
    "annals.org",
    "uptodate.com",
    "medlineplus.gov",
    "clinicaltrials.gov",
    "wikipedia.org",
];

const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "facebook",
    "twitter",
    "instagram",
    "tiktok",
    "pinterest",
    "reddit",
    "quora",
    "tumblr",
    "blogspot",
    "wordpress",
    "medium.com",
    "substack",
    "youtube",
    "linkedin",
    "blog",
];

/// Deduplication thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Normalized title similarity required for a fuzzy merge.
    pub title_similarity_threshold: f64,
    /// Share of the smaller author set that must overlap.
    pub author_overlap_threshold: f64,
    /// Title similarity required when one side has no authors.
    pub title_only_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_similarity_threshold: 0.9,
            author_overlap_threshold: 0.5,
            title_only_threshold: 0.97,
        }
    }
}

/// Quality-score weights and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub coverage_weight: f64,
    pub diversity_weight: f64,
    pub impact_weight: f64,
    /// Number of distinct source kinds considered full coverage.
    pub expected_source_kinds: usize,
    /// Result count considered full coverage.
    pub coverage_target_results: usize,
    /// Citation count at which a result counts as impactful.
    pub impact_citation_threshold: u64,
    /// Journal names matched case-insensitively as whole phrases.
    pub elite_journals: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            coverage_weight: 0.4,
            diversity_weight: 0.3,
            impact_weight: 0.3,
            expected_source_kinds: 4,
            coverage_target_results: 20,
            impact_citation_threshold: 10,
            elite_journals: DEFAULT_ELITE_JOURNALS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

const DEFAULT_ELITE_JOURNALS: &[&str] = &[
    "new england journal of medicine",
    "n engl j med",
    "lancet",
    "jama",
    "bmj",
    "nature",
    "science",
    "cell",
    "annals of internal medicine",
    "circulation",
    "intensive care medicine",
    "critical care medicine",
    "american journal of respiratory and critical care medicine",
    "cochrane database of systematic reviews",
    "chest",
    "critical care",
];

/// Session trace capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceConfig {
    pub enabled: bool,
    /// Defaults to the platform data directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl TraceConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "evidex", "evidex")
            .map(|d| d.data_dir().join("traces"))
            .unwrap_or_else(|| PathBuf::from(".evidex").join("traces"))
    }
}

/// Settings shared by every source connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Contact address some APIs ask for (PubMed `email`, OpenAlex `mailto`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub timeout_secs: u64,
    /// Minimum spacing between two requests to this service.
    pub min_interval_ms: u64,
}

impl SourceSettings {
    fn with_pacing(timeout_secs: u64, min_interval_ms: u64) -> Self {
        Self {
            enabled: true,
            api_key: None,
            email: None,
            timeout_secs,
            min_interval_ms,
        }
    }
}

/// Connector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub user_agent: String,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub pubmed: SourceSettings,
    pub semantic_scholar: SourceSettings,
    pub openalex: SourceSettings,
    pub europe_pmc_preprints: SourceSettings,
    pub europe_pmc_guidelines: SourceSettings,
    pub web: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Evidex/{}", env!("CARGO_PKG_VERSION")),
            cache_ttl_secs: 3600,
            cache_max_entries: 256,
            // NCBI allows 3 requests/s without a key.
            pubmed: SourceSettings::with_pacing(15, 340),
            semantic_scholar: SourceSettings::with_pacing(20, 1000),
            openalex: SourceSettings::with_pacing(20, 100),
            europe_pmc_preprints: SourceSettings::with_pacing(20, 200),
            europe_pmc_guidelines: SourceSettings::with_pacing(20, 200),
            web: SourceSettings::with_pacing(10, 1000),
        }
    }
}

/// OpenAI-compatible chat endpoint used by the LLM oracles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 60,
            temperature: 0.2,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `EVIDEX_`, nested with `__`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.evidex/config.toml`)
/// 4. User config (`~/.config/evidex/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<EvidexConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EvidexConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "evidex", "evidex") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".evidex").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // EVIDEX_RESEARCH__DEFAULT_MODE, EVIDEX_TRACE__ENABLED, ...
    figment = figment.merge(Env::prefixed("EVIDEX_").split("__"));

    let config: EvidexConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
