//! Ingestion pipeline orchestration.
//!
//! Coordinates the full per-collection sync: discover files, gate on
//! content-hash idempotence, convert to a canonical body, chunk, extract
//! tags and links, and upsert atomically. Runs entirely in-process — no
//! external connector dispatch, one collection at a time.

use std::path::Path;
use std::process::Command;

use tracing::warn;

use crate::config::Config;
use crate::convert;
use crate::errors::EngineError;
use crate::id;
use crate::links;
use crate::models::{Collection, DocumentUpsert, LinkSource, TagSource};
use crate::ports::LlmPorts;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::store::StoreEngine;
use crate::vector::VectorIndex;
use crate::{chunk, scan};

/// Stamped on every document written by this build. Bumping it forces
/// re-ingestion of every file on next sync (spec §4.6).
pub const PIPELINE_VERSION: i64 = 1;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IngestSummary {
    pub collection: String,
    pub files_seen: i64,
    pub files_added: i64,
    pub files_updated: i64,
    pub files_unchanged: i64,
    pub files_errored: i64,
    pub files_removed: i64,
    pub embeddings_written: i64,
    pub embeddings_pending: i64,
}

pub async fn run_ingest(
    store: &StoreEngine,
    config: &Config,
    collection: &Collection,
    ports: &LlmPorts,
    progress: Option<&dyn SyncProgressReporter>,
) -> Result<IngestSummary, EngineError> {
    let mut summary = IngestSummary {
        collection: collection.name.clone(),
        ..Default::default()
    };

    if let Some(update_cmd) = &collection.update_cmd {
        run_update_cmd(collection, update_cmd);
    }

    if let Some(reporter) = progress {
        reporter.report(SyncProgressEvent::Discovering {
            collection: collection.name.clone(),
        });
    }

    let files = scan::scan_collection(collection)?;
    summary.files_seen = files.len() as i64;

    let mut seen_paths: Vec<String> = Vec::with_capacity(files.len());
    let total = files.len() as u64;

    for (idx, file) in files.iter().enumerate() {
        seen_paths.push(file.rel_path.clone());

        if let Some(reporter) = progress {
            reporter.report(SyncProgressEvent::Ingesting {
                collection: collection.name.clone(),
                current: idx as u64,
                total,
                current_file: Some(file.rel_path.clone()),
            });
        }

        match ingest_one_file(store, config, collection, ports, &file.rel_path, &file.abs_path, file.mtime, file.size).await {
            Ok(IngestFileOutcome::Added) => summary.files_added += 1,
            Ok(IngestFileOutcome::Updated) => summary.files_updated += 1,
            Ok(IngestFileOutcome::Unchanged) => summary.files_unchanged += 1,
            Ok(IngestFileOutcome::Embedded { written, pending }) => {
                summary.embeddings_written += written;
                summary.embeddings_pending += pending;
            }
            Err(e) => {
                summary.files_errored += 1;
                warn!(collection = %collection.name, rel_path = %file.rel_path, error = %e, "ingest error");
                let _ = store
                    .log_ingest_error(&collection.name, &file.rel_path, e.code(), &e.to_string(), None)
                    .await;
            }
        }
    }

    let active_paths = store.list_active_paths(&collection.name).await?;
    let seen: std::collections::HashSet<&str> = seen_paths.iter().map(|s| s.as_str()).collect();
    for rel_path in active_paths {
        if !seen.contains(rel_path.as_str()) {
            store.mark_inactive(&collection.name, &rel_path).await?;
            summary.files_removed += 1;
        }
    }

    Ok(summary)
}

enum IngestFileOutcome {
    Added,
    Updated,
    Unchanged,
    Embedded { written: i64, pending: i64 },
}

#[allow(clippy::too_many_arguments)]
async fn ingest_one_file(
    store: &StoreEngine,
    config: &Config,
    collection: &Collection,
    ports: &LlmPorts,
    rel_path: &str,
    abs_path: &Path,
    mtime: i64,
    size: i64,
) -> Result<IngestFileOutcome, EngineError> {
    let raw_bytes = std::fs::read(abs_path)?;
    let source_hash = id::source_hash(&raw_bytes);

    let existing = store.get_document_by_rel_path(&collection.name, rel_path).await?;
    if let Some(existing) = &existing {
        if existing.source_hash == source_hash && existing.ingest_version == PIPELINE_VERSION {
            return Ok(IngestFileOutcome::Unchanged);
        }
    }

    let raw_text = String::from_utf8_lossy(&raw_bytes).into_owned();
    let converted = convert::convert(&raw_text);
    let mirror_hash = id::source_hash(converted.body.as_bytes());

    let ext = abs_path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let mime = guess_mime(&ext);

    let upsert = DocumentUpsert {
        collection: collection.name.clone(),
        rel_path: rel_path.to_string(),
        source_hash: source_hash.clone(),
        source_mime: mime.to_string(),
        source_ext: ext,
        source_size: size,
        source_mtime: mtime,
        title: converted.title.clone(),
        mirror_hash: mirror_hash.clone(),
        converter_id: convert::CONVERTER_ID.to_string(),
        converter_version: convert::CONVERTER_VERSION.to_string(),
        language_hint: converted
            .language_hint
            .clone()
            .or_else(|| collection.language_hint.clone()),
        ingest_version: PIPELINE_VERSION,
    };

    let (document_id, _docid) = store.upsert_document(&upsert).await?;

    store.upsert_content(&mirror_hash, &converted.body).await?;

    let chunks = chunk::split(&mirror_hash, &converted.body, config.chunking.max_tokens);
    store.upsert_chunks(&mirror_hash, &chunks).await?;

    store
        .set_doc_tags(document_id, &converted.tags, TagSource::Frontmatter)
        .await?;

    let doc_dir = Path::new(rel_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut parsed_links = links::extract(&converted.body, &doc_dir);
    for link in &mut parsed_links {
        link.source_doc_id = document_id;
    }
    store.set_doc_links(document_id, &parsed_links, LinkSource::Parsed).await?;

    store.sync_document_fts(&collection.name, rel_path).await?;

    let outcome = if existing.is_some() {
        IngestFileOutcome::Updated
    } else {
        IngestFileOutcome::Added
    };

    if config.embedding.is_enabled() && ports.embed.is_enabled() {
        let (written, pending) = embed_chunks_inline(store, config, ports, &mirror_hash, &chunks).await;
        if written > 0 || pending > 0 {
            return Ok(IngestFileOutcome::Embedded { written, pending });
        }
    }

    Ok(outcome)
}

/// Best-effort inline embedding: failures here are reported as a pending
/// count rather than aborting the file's ingestion (canonical text/FTS
/// state is already committed).
async fn embed_chunks_inline(
    store: &StoreEngine,
    config: &Config,
    ports: &LlmPorts,
    mirror_hash: &str,
    chunks: &[crate::models::Chunk],
) -> (i64, i64) {
    let Some(model) = &config.embedding.model else {
        return (0, chunks.len() as i64);
    };
    let index = VectorIndex::open(store.pool().clone(), model, config.embedding.dims.unwrap_or(0)).await;

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    match ports.embed.embed(&texts).await {
        Ok(vectors) => {
            let rows: Vec<(String, i64, Vec<f32>)> = chunks
                .iter()
                .zip(vectors.into_iter())
                .map(|(c, v)| (mirror_hash.to_string(), c.seq, v))
                .collect();
            match index.upsert_vectors(&rows).await {
                Ok(()) => (rows.len() as i64, 0),
                Err(e) => {
                    warn!(error = %e, "embedding write failed, left pending");
                    (0, chunks.len() as i64)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "embedding request failed, left pending");
            (0, chunks.len() as i64)
        }
    }
}

fn run_update_cmd(collection: &Collection, update_cmd: &str) {
    let mut parts = update_cmd.split_whitespace();
    let Some(program) = parts.next() else { return };
    let args: Vec<&str> = parts.collect();
    match Command::new(program).args(&args).current_dir(&collection.path).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(collection = %collection.name, code = ?status.code(), "update_cmd exited non-zero"),
        Err(e) => warn!(collection = %collection.name, error = %e, "update_cmd failed to start"),
    }
}

fn guess_mime(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        _ => "text/plain",
    }
}
