//! `gno embed` — backfill or rebuild vector embeddings across all
//! registered collections, independent of ingestion (ingestion already
//! embeds inline when a provider is configured; this command catches
//! chunks left pending by a failed inline embed or a newly-enabled
//! provider).

use sqlx::Row;

use crate::config::Config;
use crate::errors::EngineError;
use crate::ports::LlmPorts;
use crate::store::StoreEngine;
use crate::vector::VectorIndex;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct EmbedSummary {
    pub total_pending: i64,
    pub embedded: i64,
    pub failed: i64,
}

struct PendingChunk {
    mirror_hash: String,
    seq: i64,
    text: String,
}

/// Embed chunks belonging to active documents that are missing a vector
/// for the configured model.
pub async fn run_embed_pending(
    store: &StoreEngine,
    config: &Config,
    ports: &LlmPorts,
    limit: Option<i64>,
    dry_run: bool,
) -> Result<EmbedSummary, EngineError> {
    let model = require_model(config)?;
    let pending = find_pending_chunks(store, &model, limit).await?;

    if dry_run {
        return Ok(EmbedSummary {
            total_pending: pending.len() as i64,
            embedded: 0,
            failed: 0,
        });
    }

    embed_batches(store, config, ports, &model, pending).await
}

/// Delete every vector for the configured model and re-embed from
/// scratch across all chunks belonging to active documents.
pub async fn run_embed_rebuild(
    store: &StoreEngine,
    config: &Config,
    ports: &LlmPorts,
) -> Result<EmbedSummary, EngineError> {
    let model = require_model(config)?;

    sqlx::query("DELETE FROM content_vectors WHERE model = ?")
        .bind(&model)
        .execute(store.pool())
        .await?;

    let index = VectorIndex::open(store.pool().clone(), &model, config.embedding.dims.unwrap_or(0)).await;
    index.rebuild_vec_index().await?;

    let pending = find_pending_chunks(store, &model, None).await?;
    embed_batches(store, config, ports, &model, pending).await
}

fn require_model(config: &Config) -> Result<String, EngineError> {
    if !config.embedding.is_enabled() {
        return Err(EngineError::Validation(
            "embedding provider is disabled; set [embedding] provider in config".into(),
        ));
    }
    config
        .embedding
        .model
        .clone()
        .ok_or_else(|| EngineError::Validation("embedding.model must be set".into()))
}

async fn find_pending_chunks(
    store: &StoreEngine,
    model: &str,
    limit: Option<i64>,
) -> Result<Vec<PendingChunk>, EngineError> {
    let limit_val = limit.unwrap_or(i64::MAX);

    let rows = sqlx::query(
        "SELECT c.mirror_hash, c.seq, c.text
         FROM chunks c
         JOIN documents d ON d.mirror_hash = c.mirror_hash AND d.active = 1
         LEFT JOIN content_vectors cv
            ON cv.mirror_hash = c.mirror_hash AND cv.seq = c.seq AND cv.model = ?
         WHERE cv.mirror_hash IS NULL
         ORDER BY c.mirror_hash, c.seq
         LIMIT ?",
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(store.pool())
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| PendingChunk {
            mirror_hash: row.get("mirror_hash"),
            seq: row.get("seq"),
            text: row.get("text"),
        })
        .collect())
}

async fn embed_batches(
    store: &StoreEngine,
    config: &Config,
    ports: &LlmPorts,
    model: &str,
    pending: Vec<PendingChunk>,
) -> Result<EmbedSummary, EngineError> {
    let total_pending = pending.len() as i64;
    if pending.is_empty() {
        return Ok(EmbedSummary {
            total_pending: 0,
            embedded: 0,
            failed: 0,
        });
    }

    let index = VectorIndex::open(store.pool().clone(), model, config.embedding.dims.unwrap_or(0)).await;
    let batch_size = config.embedding.batch_size.max(1);

    let mut embedded = 0i64;
    let mut failed = 0i64;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        match ports.embed.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                let rows: Vec<(String, i64, Vec<f32>)> = batch
                    .iter()
                    .zip(vectors.into_iter())
                    .map(|(p, v)| (p.mirror_hash.clone(), p.seq, v))
                    .collect();
                match index.upsert_vectors(&rows).await {
                    Ok(()) => embedded += rows.len() as i64,
                    Err(_) => failed += rows.len() as i64,
                }
            }
            _ => failed += batch.len() as i64,
        }
    }

    Ok(EmbedSummary {
        total_pending,
        embedded,
        failed,
    })
}

pub fn print_summary(label: &str, summary: &EmbedSummary) {
    println!("{label}");
    println!("  total pending: {}", summary.total_pending);
    println!("  embedded:      {}", summary.embedded);
    println!("  failed:        {}", summary.failed);
}
