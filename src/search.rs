//! Lexical, hybrid, expansion/rerank, grounded-answer, and similar-document
//! retrieval.
//!
//! **Lexical** delegates to [`crate::store::fts::search_fts`] (BM25 via
//! FTS5). **Hybrid** runs lexical and vector search, min-max normalizes
//! each candidate set to `[0,1]`, and blends them `score = (1-α)·lexical +
//! α·semantic`, document-level MAX aggregation when vector hits land on
//! the same document from different chunks — the same normalize-then-blend
//! shape the teacher's keyword/semantic merge uses, generalized from
//! chunk-level to document-level candidates since lexical search here is
//! document-granular (one FTS row per document) while vector search is
//! chunk-granular.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::errors::EngineError;
use crate::models::SearchResultItem;
use crate::ports::LlmPorts;
use crate::store::{self, fts, StoreEngine};
use crate::vector::{l2_normalize, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Lexical,
    Hybrid,
}

pub struct SearchOptions<'a> {
    pub collection: Option<&'a str>,
    pub tags_all: &'a [String],
    pub tags_any: &'a [String],
    pub limit: i64,
    pub no_expand: bool,
    pub no_rerank: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchMeta {
    pub mode: String,
    pub embedding_used: bool,
    pub reranked: bool,
    pub expanded_queries: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResultItem>,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AskOutcome {
    pub answer: Option<String>,
    pub citations: Vec<String>,
    pub results: Vec<SearchResultItem>,
    pub meta: SearchMeta,
}

struct DocCandidate {
    document_id: i64,
    raw_score: f64,
    snippet: String,
}

pub async fn search(
    store: &StoreEngine,
    config: &Config,
    ports: &LlmPorts,
    query: &str,
    mode: SearchMode,
    opts: SearchOptions<'_>,
) -> Result<SearchOutcome, EngineError> {
    if query.trim().is_empty() {
        return Ok(SearchOutcome {
            results: Vec::new(),
            meta: SearchMeta {
                mode: mode_name(mode).to_string(),
                embedding_used: false,
                reranked: false,
                expanded_queries: Vec::new(),
            },
        });
    }

    let pool = store.pool();
    let limit = if opts.limit > 0 {
        opts.limit
    } else {
        config.retrieval.final_limit
    };

    if mode == SearchMode::Lexical {
        let results = fts::search_fts(
            pool,
            query,
            fts::FtsOptions {
                collection: opts.collection,
                tags_all: opts.tags_all,
                tags_any: opts.tags_any,
                snippet: true,
                limit,
            },
        )
        .await?;
        return Ok(SearchOutcome {
            results,
            meta: SearchMeta {
                mode: "lexical".to_string(),
                embedding_used: false,
                reranked: false,
                expanded_queries: Vec::new(),
            },
        });
    }

    let embedding_used = config.embedding.is_enabled() && ports.embed.is_enabled();
    if !embedding_used {
        // No embedding provider: hybrid degrades to lexical-only, same
        // candidate pool a pure keyword search would return.
        let results = fts::search_fts(
            pool,
            query,
            fts::FtsOptions {
                collection: opts.collection,
                tags_all: opts.tags_all,
                tags_any: opts.tags_any,
                snippet: true,
                limit,
            },
        )
        .await?;
        return Ok(SearchOutcome {
            results,
            meta: SearchMeta {
                mode: "hybrid".to_string(),
                embedding_used: false,
                reranked: false,
                expanded_queries: Vec::new(),
            },
        });
    }

    let mut queries = vec![query.to_string()];
    let mut expanded_queries = Vec::new();
    if !opts.no_expand {
        if let Ok(text) = ports
            .generate
            .complete(
                &format!(
                    "Suggest up to 3 short alternative search phrasings for: \"{query}\". One per line, no numbering."
                ),
                80,
                Some(0.3),
            )
            .await
        {
            let extra: Vec<String> = text
                .lines()
                .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
                .filter(|l| !l.is_empty())
                .take(3)
                .collect();
            expanded_queries = extra.clone();
            queries.extend(extra);
        }
    }

    let mut lexical_candidates: HashMap<i64, DocCandidate> = HashMap::new();
    for q in &queries {
        for c in fetch_lexical_doc_candidates(pool, q, opts.collection, config.retrieval.candidate_k_keyword).await? {
            lexical_candidates
                .entry(c.document_id)
                .and_modify(|existing| {
                    if c.raw_score > existing.raw_score {
                        existing.raw_score = c.raw_score;
                        existing.snippet = c.snippet.clone();
                    }
                })
                .or_insert(c);
        }
    }

    let query_vecs = ports.embed.embed(std::slice::from_ref(&query.to_string())).await?;
    let query_vec = l2_normalize(query_vecs.first().map(|v| v.as_slice()).unwrap_or(&[]));

    let model = config.embedding.model.clone().unwrap_or_default();
    let index = VectorIndex::open(pool.clone(), &model, config.embedding.dims.unwrap_or(0)).await;
    let vector_candidates =
        fetch_vector_doc_candidates(store, &index, &query_vec, opts.collection, config.retrieval.candidate_k_vector)
            .await?;

    let lexical_vec: Vec<DocCandidate> = lexical_candidates.into_values().collect();
    let norm_lexical = normalize_scores(&lexical_vec);
    let norm_vector = normalize_scores(&vector_candidates);

    let lex_map: HashMap<i64, f64> = norm_lexical.iter().map(|(c, s)| (c.document_id, *s)).collect();
    let vec_map: HashMap<i64, f64> = norm_vector.iter().map(|(c, s)| (c.document_id, *s)).collect();

    let mut all_doc_ids: Vec<i64> = lex_map.keys().chain(vec_map.keys()).copied().collect();
    all_doc_ids.sort_unstable();
    all_doc_ids.dedup();

    let alpha = config.retrieval.hybrid_alpha;
    let mut fused: Vec<(i64, f64, String)> = all_doc_ids
        .into_iter()
        .map(|id| {
            let l = lex_map.get(&id).copied().unwrap_or(0.0);
            let v = vec_map.get(&id).copied().unwrap_or(0.0);
            let score = (1.0 - alpha) * l + alpha * v;
            let snippet = lexical_vec
                .iter()
                .find(|c| c.document_id == id)
                .map(|c| c.snippet.clone())
                .or_else(|| vector_candidates.iter().find(|c| c.document_id == id).map(|c| c.snippet.clone()))
                .unwrap_or_default();
            (id, score, snippet)
        })
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut candidate_limit = (limit * 4).max(limit);
    candidate_limit = candidate_limit.min(fused.len() as i64);
    fused.truncate(candidate_limit.max(0) as usize);

    let mut reranked = false;
    if !opts.no_rerank && !fused.is_empty() {
        // Rerank is best-effort: score each candidate's snippet text against
        // the query, then resort. Errors (including a disabled provider)
        // fall back to the fused order.
        let docs: Vec<String> = fused.iter().map(|(_, _, s)| s.clone()).collect();
        if let Ok(scores) = ports.rerank.score(query, &docs).await {
            if scores.len() == fused.len() {
                for (entry, score) in fused.iter_mut().zip(scores.into_iter()) {
                    entry.1 = score as f64;
                }
                fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                reranked = true;
            }
        }
    }

    fused.truncate(limit.max(0) as usize);

    let mut results = Vec::with_capacity(fused.len());
    for (doc_id, score, snippet) in fused {
        if let Some(item) = doc_to_result(pool, doc_id, score, snippet, opts.tags_all, opts.tags_any).await? {
            results.push(item);
        }
    }

    Ok(SearchOutcome {
        results,
        meta: SearchMeta {
            mode: "hybrid".to_string(),
            embedding_used: true,
            reranked,
            expanded_queries,
        },
    })
}

pub async fn ask(
    store: &StoreEngine,
    config: &Config,
    ports: &LlmPorts,
    question: &str,
    opts: SearchOptions<'_>,
) -> Result<AskOutcome, EngineError> {
    let outcome = search(store, config, ports, question, SearchMode::Hybrid, opts).await?;

    if outcome.results.is_empty() {
        return Ok(AskOutcome {
            answer: None,
            citations: Vec::new(),
            results: outcome.results,
            meta: outcome.meta,
        });
    }

    let context: String = outcome
        .results
        .iter()
        .map(|r| format!("[{}] {}\n{}", r.docid, r.title.as_deref().unwrap_or(r.uri.as_str()), r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Answer the question using only the context below. Cite sources by their [docid] tag.\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:"
    );

    let answer = ports.generate.complete(&prompt, 400, Some(0.2)).await.ok();

    let mut citations = Vec::new();
    if let Some(text) = &answer {
        for r in &outcome.results {
            if text.contains(&r.docid) {
                citations.push(r.docid.clone());
            }
        }
    }

    Ok(AskOutcome {
        answer,
        citations,
        results: outcome.results,
        meta: outcome.meta,
    })
}

pub struct SimilarOptions {
    pub limit: i64,
    pub threshold: f64,
    pub cross_collection: bool,
}

pub async fn similar_documents(
    store: &StoreEngine,
    config: &Config,
    source_docid: &str,
    opts: SimilarOptions,
) -> Result<Vec<SearchResultItem>, EngineError> {
    let model = config
        .embedding
        .model
        .as_ref()
        .ok_or_else(|| EngineError::Unavailable("no embedding model configured".into()))?;

    let source = store.get_document_by_docid(source_docid).await?;
    let pool = store.pool();

    let row = sqlx::query(
        "SELECT seq, embedding FROM content_vectors WHERE mirror_hash = ? AND model = ? ORDER BY seq LIMIT 1",
    )
    .bind(&source.mirror_hash)
    .bind(model)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Err(EngineError::VecSearchUnavailable(
            "source document has no embedding".into(),
        ));
    };
    let blob: Vec<u8> = row.get("embedding");
    let source_vec = l2_normalize(&crate::vector::decode_embedding(&blob)?);

    let index = VectorIndex::open(pool.clone(), model, config.embedding.dims.unwrap_or(0)).await;
    let overshoot = (opts.limit.max(1) * 20).min(2000);
    let hits = index.search_nearest(&source_vec, overshoot as usize, None).await?;

    let mut seen_mirrors: std::collections::HashSet<String> = std::collections::HashSet::new();
    seen_mirrors.insert(source.mirror_hash.clone());

    let mut results = Vec::new();
    for (mirror_hash, _seq, distance) in hits {
        if !seen_mirrors.insert(mirror_hash.clone()) {
            continue;
        }
        let similarity = 1.0 - distance;
        if similarity < opts.threshold {
            continue;
        }
        let doc_row = sqlx::query(
            "SELECT id, docid, uri, title, collection, rel_path, updated_at FROM documents
             WHERE mirror_hash = ? AND active = 1 LIMIT 1",
        )
        .bind(&mirror_hash)
        .fetch_optional(pool)
        .await?;
        let Some(doc_row) = doc_row else { continue };
        let collection: String = doc_row.get("collection");
        if !opts.cross_collection && collection != source.collection {
            continue;
        }
        let updated_at: i64 = doc_row.get("updated_at");
        results.push(SearchResultItem {
            docid: doc_row.get("docid"),
            uri: doc_row.get("uri"),
            title: doc_row.get("title"),
            collection,
            rel_path: doc_row.get("rel_path"),
            score: similarity,
            snippet: String::new(),
            updated_at: store::format_ts_iso(updated_at),
        });
        if results.len() as i64 >= opts.limit {
            break;
        }
    }

    Ok(results)
}

async fn fetch_lexical_doc_candidates(
    pool: &SqlitePool,
    query: &str,
    collection: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<DocCandidate>, EngineError> {
    let escaped = fts::escape_query(query);
    let sql = format!(
        "SELECT d.id AS doc_id, fts.rank AS rank,
                snippet(fts_documents, 2, '>>>', '<<<', '...', 32) AS snippet
         FROM fts_documents fts
         JOIN documents d ON d.id = fts.rowid
         WHERE fts_documents MATCH ? AND d.active = 1
         {filter}
         ORDER BY fts.rank
         LIMIT ?",
        filter = if collection.is_some() { "AND d.collection = ?" } else { "" },
    );
    let mut q = sqlx::query(&sql).bind(&escaped);
    if let Some(c) = collection {
        q = q.bind(c);
    }
    q = q.bind(candidate_k);

    let rows = q.fetch_all(pool).await.map_err(|e| {
        let msg = e.to_string();
        if msg.to_lowercase().contains("fts5") || msg.to_lowercase().contains("syntax") {
            EngineError::InvalidInput(msg)
        } else {
            EngineError::QueryFailed(msg)
        }
    })?;

    Ok(rows
        .into_iter()
        .map(|r| DocCandidate {
            document_id: r.get("doc_id"),
            raw_score: -r.get::<f64, _>("rank"),
            snippet: r.get("snippet"),
        })
        .collect())
}

async fn fetch_vector_doc_candidates(
    store: &StoreEngine,
    index: &VectorIndex,
    query_vec: &[f32],
    collection: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<DocCandidate>, EngineError> {
    if !index.search_available() {
        return Ok(Vec::new());
    }
    let hits = index.search_nearest(query_vec, candidate_k.max(1) as usize, None).await?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let mirror_hashes: Vec<String> = hits.iter().map(|(m, _, _)| m.clone()).collect();
    let chunk_rows = store.get_chunks_batch(&mirror_hashes).await?;
    let chunk_text: HashMap<(String, i64), String> = chunk_rows
        .into_iter()
        .map(|c| ((c.mirror_hash, c.seq), c.text))
        .collect();

    let pool = store.pool();
    let mut by_doc: HashMap<i64, DocCandidate> = HashMap::new();
    for (mirror_hash, seq, distance) in hits {
        let row = sqlx::query(
            "SELECT id, collection FROM documents WHERE mirror_hash = ? AND active = 1 LIMIT 1",
        )
        .bind(&mirror_hash)
        .fetch_optional(pool)
        .await?;
        let Some(row) = row else { continue };
        if let Some(c) = collection {
            let doc_collection: String = row.get("collection");
            if doc_collection != c {
                continue;
            }
        }
        let doc_id: i64 = row.get("id");
        let similarity = 1.0 - distance;
        let snippet = chunk_text
            .get(&(mirror_hash.clone(), seq))
            .map(|t| t.chars().take(240).collect::<String>())
            .unwrap_or_default();

        by_doc
            .entry(doc_id)
            .and_modify(|existing| {
                if similarity > existing.raw_score {
                    existing.raw_score = similarity;
                    existing.snippet = snippet.clone();
                }
            })
            .or_insert(DocCandidate {
                document_id: doc_id,
                raw_score: similarity,
                snippet,
            });
    }

    Ok(by_doc.into_values().collect())
}

async fn doc_to_result(
    pool: &SqlitePool,
    doc_id: i64,
    score: f64,
    snippet: String,
    tags_all: &[String],
    tags_any: &[String],
) -> Result<Option<SearchResultItem>, EngineError> {
    if !tags_all.is_empty() || !tags_any.is_empty() {
        let rows = sqlx::query("SELECT tag FROM tags WHERE document_id = ?")
            .bind(doc_id)
            .fetch_all(pool)
            .await?;
        let doc_tags: std::collections::HashSet<String> =
            rows.into_iter().map(|r| r.get::<String, _>("tag")).collect();
        if !tags_all.is_empty() && !tags_all.iter().all(|t| doc_tags.contains(t)) {
            return Ok(None);
        }
        if !tags_any.is_empty() && !tags_any.iter().any(|t| doc_tags.contains(t)) {
            return Ok(None);
        }
    }

    let row = sqlx::query(
        "SELECT docid, uri, title, collection, rel_path, updated_at FROM documents WHERE id = ? AND active = 1",
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else { return Ok(None) };
    let updated_at: i64 = row.get("updated_at");
    Ok(Some(SearchResultItem {
        docid: row.get("docid"),
        uri: row.get("uri"),
        title: row.get("title"),
        collection: row.get("collection"),
        rel_path: row.get("rel_path"),
        score,
        snippet,
        updated_at: store::format_ts_iso(updated_at),
    }))
}

/// Min-max normalize raw scores to `[0.0, 1.0]`; a single-candidate or
/// all-equal set normalizes to `1.0`.
fn normalize_scores(candidates: &[DocCandidate]) -> Vec<(&DocCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let s_min = candidates.iter().map(|c| c.raw_score).fold(f64::INFINITY, f64::min);
    let s_max = candidates.iter().map(|c| c.raw_score).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

fn mode_name(mode: SearchMode) -> &'static str {
    match mode {
        SearchMode::Lexical => "lexical",
        SearchMode::Hybrid => "hybrid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, score: f64) -> DocCandidate {
        DocCandidate {
            document_id: id,
            raw_score: score,
            snippet: String::new(),
        }
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_is_one() {
        let result = normalize_scores(&[candidate(1, 5.0)]);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_range_spans_unit_interval() {
        let candidates = vec![candidate(1, 10.0), candidate(2, 5.0), candidate(3, 0.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_all_equal_is_one() {
        let candidates = vec![candidate(1, 3.0), candidate(2, 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }
}
