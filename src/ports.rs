//! Pluggable LLM capability interfaces consumed by the search and
//! ingestion pipelines.
//!
//! The engine never talks to a model runtime directly — it depends on
//! three small trait objects constructed at startup from the active
//! model preset ([`crate::config::ModelsConfig`]). A `Disabled` adapter
//! satisfies all three when no provider is configured, so the rest of
//! the pipeline can treat "no embeddings configured" as just another
//! capability flag rather than a special case threaded through call
//! sites.

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::EngineError;

/// Callback invoked with `(bytesDownloaded, totalBytes)` during a model
/// fetch. Front-ends use this to render progress; the engine itself
/// never polls it.
pub type DownloadProgress = Box<dyn Fn(u64, u64) + Send + Sync>;

#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    /// Load the model (idempotent). Must be called before `dimensions`/`embed`.
    async fn init(&self) -> Result<(), EngineError>;

    /// Fixed output width, stable after `init`.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts into fixed-length float vectors.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;

    /// Release any held model resources.
    async fn dispose(&self);

    /// Whether this port is a real provider (vs. [`DisabledPort`]).
    fn is_enabled(&self) -> bool {
        true
    }
}

#[async_trait]
pub trait RerankPort: Send + Sync {
    /// Score `documents` against `query`; higher is more relevant.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EngineError>;
}

#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Complete `prompt`, bounded by `max_tokens` and optional `temperature`.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: Option<f32>,
    ) -> Result<String, EngineError>;
}

/// Timeouts applied around model load and inference calls (§5: "LLM
/// ports carry a load timeout and an inference timeout").
#[derive(Debug, Clone, Copy)]
pub struct PortTimeouts {
    pub load: Duration,
    pub inference: Duration,
}

impl Default for PortTimeouts {
    fn default() -> Self {
        Self {
            load: Duration::from_secs(60),
            inference: Duration::from_secs(30),
        }
    }
}

/// Satisfies all three ports without ever performing inference — the
/// state when `embedding.provider = "disabled"`.
pub struct DisabledPort;

#[async_trait]
impl EmbeddingPort for DisabledPort {
    async fn init(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Err(EngineError::Unavailable(
            "embedding provider is disabled".into(),
        ))
    }

    async fn dispose(&self) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

#[async_trait]
impl RerankPort for DisabledPort {
    async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>, EngineError> {
        Err(EngineError::Unavailable("rerank provider is disabled".into()))
    }
}

#[async_trait]
impl GenerationPort for DisabledPort {
    async fn complete(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: Option<f32>,
    ) -> Result<String, EngineError> {
        Err(EngineError::Unavailable(
            "generation provider is disabled".into(),
        ))
    }
}

/// An HTTP-backed embedding port speaking an OpenAI-compatible
/// `/embeddings` API, with the bounded retry/backoff the teacher's
/// embedding client used for rate-limited providers.
pub struct HttpEmbeddingPort {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl HttpEmbeddingPort {
    pub fn new(api_base: String, api_key: String, model: String, dims: usize, max_retries: u32, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base,
            api_key,
            model,
            dims,
            max_retries,
        }
    }
}

#[async_trait]
impl EmbeddingPort for HttpEmbeddingPort {
    async fn init(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let url = format!("{}/embeddings", self.api_base.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut attempt = 0u32;
        loop {
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let parsed: EmbeddingsResponse = r
                        .json()
                        .await
                        .map_err(|e| EngineError::Runtime(format!("bad embeddings response: {e}")))?;
                    return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(r) if r.status().as_u16() == 429 && attempt < self.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();
                    return Err(EngineError::Runtime(format!(
                        "embedding request failed ({status}): {text}"
                    )));
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(backoff(attempt)).await;
                    let _ = e;
                }
                Err(e) => return Err(EngineError::Runtime(e.to_string())),
            }
        }
    }

    async fn dispose(&self) {}
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(200u64.saturating_mul(1u64 << attempt.min(6)))
}

#[derive(serde::Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// The three active ports plus the timeouts applied around them.
pub struct LlmPorts {
    pub embed: Box<dyn EmbeddingPort>,
    pub rerank: Box<dyn RerankPort>,
    pub generate: Box<dyn GenerationPort>,
    pub timeouts: PortTimeouts,
}

impl LlmPorts {
    pub fn disabled() -> Self {
        Self {
            embed: Box::new(DisabledPort),
            rerank: Box::new(DisabledPort),
            generate: Box::new(DisabledPort),
            timeouts: PortTimeouts::default(),
        }
    }

    /// Builds the active ports from `[embedding]` config. Only the
    /// embedding port has a real HTTP-backed implementation today; rerank
    /// and generation stay disabled until a provider for them ships, so
    /// `search::ask`/rerank gracefully degrade (§4.7) rather than erroring.
    pub fn from_config(config: &crate::config::Config) -> Self {
        if !config.embedding.is_enabled() {
            return Self::disabled();
        }

        let Some(model) = config.embedding.model.clone() else {
            return Self::disabled();
        };
        let dims = config.embedding.dims.unwrap_or(0);
        let api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();

        Self {
            embed: Box::new(HttpEmbeddingPort::new(
                api_base,
                api_key,
                model,
                dims,
                config.embedding.max_retries,
                config.embedding.timeout_secs,
            )),
            rerank: Box::new(DisabledPort),
            generate: Box::new(DisabledPort),
            timeouts: PortTimeouts::default(),
        }
    }
}
