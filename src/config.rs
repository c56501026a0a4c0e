//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file (default: `config/gno.toml`).
//! The config defines the database's data directory, the FTS tokenizer,
//! chunking/retrieval tuning, the embedding/rerank/generation model
//! preset, and the registered [`Collection`]s and [`Context`]s.
//!
//! Unknown top-level fields are rejected: `#[serde(deny_unknown_fields)]`
//! on [`Config`] turns a typo'd key into a `LOAD_ERROR` at startup instead
//! of a silently ignored setting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::EngineError;
use crate::models::{Collection, Context, ScopeType};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    pub db: DbConfig,
    #[serde(default)]
    pub fts_tokenizer: FtsTokenizer,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
    #[serde(default)]
    pub models: Option<ModelsConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DbConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_index_name() -> String {
    "default".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl DbConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("index-{}.sqlite", self.index_name))
    }
}

/// Tokenizer used by the `fts_documents` virtual table.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FtsTokenizer {
    #[default]
    Unicode61,
    Porter,
    Trigram,
    SnowballEnglish,
}

impl FtsTokenizer {
    /// SQL fragment passed to `CREATE VIRTUAL TABLE ... USING fts5(tokenize = ?)`.
    pub fn tokenize_arg(&self) -> &'static str {
        match self {
            FtsTokenizer::Unicode61 => "unicode61",
            FtsTokenizer::Porter => "porter unicode61",
            FtsTokenizer::Trigram => "trigram",
            FtsTokenizer::SnowballEnglish => "snowball english",
        }
    }

    /// Whether this tokenizer requires a loadable stemmer extension.
    pub fn requires_extension(&self) -> bool {
        matches!(self, FtsTokenizer::SnowballEnglish)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default)]
    pub no_expand: bool,
    #[serde(default)]
    pub no_rerank: bool,
    #[serde(default = "default_similar_threshold")]
    pub similar_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            no_expand: false,
            no_rerank: false,
            similar_threshold: default_similar_threshold(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_similar_threshold() -> f64 {
    0.75
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8420".to_string()
}

/// Named bundle of embed/rerank/gen model references (a "preset").
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub active_preset: Option<String>,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub embed_model: Option<String>,
    #[serde(default)]
    pub rerank_model: Option<String>,
    #[serde(default)]
    pub gen_model: Option<String>,
}

/// TOML-deserializable mirror of [`Context`] (the model type uses an enum
/// whose serde repr we don't want to leak config-file syntax constraints
/// into; this wrapper just validates `scope_key` against `scope_type`).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextEntry {
    pub scope_type: ScopeType,
    pub scope_key: String,
    pub text: String,
}

impl From<ContextEntry> for Context {
    fn from(c: ContextEntry) -> Self {
        Context {
            scope_type: c.scope_type,
            scope_key: c.scope_key,
            text: c.text,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config, EngineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::LoadError(format!("reading {}: {e}", path.display())))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| EngineError::LoadError(format!("parsing {}: {e}", path.display())))?;

    validate(&config)?;
    Ok(config)
}

/// Validate then atomically replace `path`'s contents — write to a sibling
/// temp file and rename, so a crash mid-write never leaves a truncated
/// config on disk for the next `load_config` to choke on.
pub fn save_config(path: &Path, config: &Config) -> Result<(), EngineError> {
    validate(config)?;

    let serialized =
        toml::to_string_pretty(config).map_err(|e| EngineError::SaveError(e.to_string()))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, serialized)
        .map_err(|e| EngineError::SaveError(format!("writing {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| EngineError::SaveError(format!("renaming into {}: {e}", path.display())))?;

    Ok(())
}

fn validate(config: &Config) -> Result<(), EngineError> {
    if config.chunking.max_tokens == 0 {
        return Err(EngineError::Validation(
            "chunking.max_tokens must be > 0".into(),
        ));
    }

    if config.retrieval.final_limit < 1 {
        return Err(EngineError::Validation(
            "retrieval.final_limit must be >= 1".into(),
        ));
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        return Err(EngineError::Validation(
            "retrieval.hybrid_alpha must be in [0.0, 1.0]".into(),
        ));
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            return Err(EngineError::Validation(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.model.is_none() {
            return Err(EngineError::Validation(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            )));
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => {
            return Err(EngineError::Validation(format!(
                "unknown embedding provider: '{other}'. Must be disabled, openai, or local."
            )))
        }
    }

    let name_re_ok = |name: &str| {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
            _ => return false,
        }
        name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    };

    for collection in &config.collections {
        if !name_re_ok(&collection.name) {
            return Err(EngineError::Validation(format!(
                "collection name '{}' must match ^[a-z0-9][a-z0-9_-]{{0,63}}$",
                collection.name
            )));
        }
        if !collection.path.is_absolute() {
            return Err(EngineError::Validation(format!(
                "collection '{}' path must be absolute",
                collection.name
            )));
        }
    }

    for ctx in &config.contexts {
        let ok = match ctx.scope_type {
            ScopeType::Global => ctx.scope_key == "/",
            ScopeType::Collection => {
                ctx.scope_key.starts_with("name:") && ctx.scope_key.len() > 5
            }
            ScopeType::Prefix => ctx.scope_key.starts_with("gno://"),
        };
        if !ok {
            return Err(EngineError::Validation(format!(
                "context scope_key '{}' does not match scope_type {:?}",
                ctx.scope_key, ctx.scope_type
            )));
        }
    }

    Ok(())
}
