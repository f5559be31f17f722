use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_EMBEDDING_MODEL: &str = "char-ngram";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

const ENV_PREFIX: &str = "PDF_SEARCH_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    pub ingestion: IngestionOptions,
    pub scoring: ScoringConfig,
    pub search: SearchOptions,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `char-ngram` is built in; anything else is requested from `endpoint`.
    pub model: String,
    pub dimensions: usize,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub serialize_calls: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            endpoint: None,
            api_key: None,
            serialize_calls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionOptions {
    /// Non-table lines shorter than this (in chars, after trimming) are dropped.
    pub min_line_chars: usize,
    pub table_cell_separator: String,
    pub column_gap_em: f32,
    pub row_tolerance_em: f32,
    pub min_table_rows: usize,
    pub min_table_columns: usize,
    pub column_split_regex: String,
    pub min_fallback_cells: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            min_line_chars: 10,
            table_cell_separator: " | ".to_string(),
            column_gap_em: 2.0,
            row_tolerance_em: 0.4,
            min_table_rows: 2,
            min_table_columns: 2,
            column_split_regex: r"\t+|\s{2,}".to_string(),
            min_fallback_cells: 3,
            embed_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub exact_match_boost: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_match_boost: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub default_limit: usize,
    pub default_min_similarity: f64,
    pub overfetch_factor: usize,
    pub overfetch_ceiling: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            default_limit: 10,
            default_min_similarity: 0.5,
            overfetch_factor: 5,
            overfetch_ceiling: 200,
        }
    }
}

impl SearchOptions {
    /// Number of nearest rows to pull for a given result limit. Always
    /// strictly larger than `limit` so boosted rows outside the top
    /// `limit` by distance still get scored.
    pub fn candidate_pool(&self, limit: usize) -> usize {
        let scaled = limit.saturating_mul(self.overfetch_factor.max(1));
        let capped = scaled.min(self.overfetch_ceiling);
        capped.max(limit.saturating_add(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(model) = var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(raw) = var("EMBEDDING_DIMENSIONS") {
            config.embedding.dimensions = parse_value("EMBEDDING_DIMENSIONS", &raw)?;
        }
        config.embedding.endpoint = var("EMBEDDING_ENDPOINT");
        config.embedding.api_key = var("EMBEDDING_API_KEY");
        if let Some(raw) = var("EMBEDDING_SERIALIZE") {
            config.embedding.serialize_calls = parse_value("EMBEDDING_SERIALIZE", &raw)?;
        }
        if let Some(raw) = var("MIN_LINE_CHARS") {
            config.ingestion.min_line_chars = parse_value("MIN_LINE_CHARS", &raw)?;
        }
        if let Some(raw) = var("EXACT_MATCH_BOOST") {
            config.scoring.exact_match_boost = parse_value("EXACT_MATCH_BOOST", &raw)?;
        }
        if let Some(raw) = var("DEFAULT_LIMIT") {
            config.search.default_limit = parse_value("DEFAULT_LIMIT", &raw)?;
        }
        if let Some(raw) = var("MIN_SIMILARITY") {
            config.search.default_min_similarity = parse_value("MIN_SIMILARITY", &raw)?;
        }
        if let Some(raw) = var("OVERFETCH_FACTOR") {
            config.search.overfetch_factor = parse_value("OVERFETCH_FACTOR", &raw)?;
        }
        if let Some(raw) = var("OVERFETCH_CEILING") {
            config.search.overfetch_ceiling = parse_value("OVERFETCH_CEILING", &raw)?;
        }
        if let Some(raw) = var("RETRY_ATTEMPTS") {
            config.retry.max_attempts = parse_value("RETRY_ATTEMPTS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding model is empty".to_string()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding dimensions must be positive".to_string(),
            ));
        }
        if !self.scoring.exact_match_boost.is_finite() || self.scoring.exact_match_boost < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "exact match boost must be a non-negative number, got {}",
                self.scoring.exact_match_boost
            )));
        }
        if !(0.0..=1.0).contains(&self.search.default_min_similarity) {
            return Err(ConfigError::Invalid(format!(
                "default min similarity must lie in [0, 1], got {}",
                self.search.default_min_similarity
            )));
        }
        if self.search.default_limit == 0 {
            return Err(ConfigError::Invalid("default limit must be positive".to_string()));
        }
        if self.search.overfetch_factor < 2 {
            return Err(ConfigError::Invalid(
                "overfetch factor must be at least 2".to_string(),
            ));
        }
        if self.ingestion.table_cell_separator.is_empty() {
            return Err(ConfigError::Invalid(
                "table cell separator is empty".to_string(),
            ));
        }
        if self.ingestion.embed_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding batch size must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{name}"),
        value: raw.to_string(),
    })
}
