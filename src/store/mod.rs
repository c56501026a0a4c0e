//! The embedded relational store: migrations, entity tables, transactions,
//! the FTS projection, the tag/link indexes, link resolution, and the
//! graph projection.

pub mod fts;
pub mod graph;

use sqlx::{Row, SqlitePool};

use crate::config::FtsTokenizer;
use crate::errors::EngineError;
use crate::models::{
    Backlink, Chunk, Collection, Context, Document, DocumentUpsert, Link, LinkType,
    ResolvedTarget, TagSource,
};

pub use fts::{search_fts, FtsOptions};
pub use graph::{get_graph, Graph, GraphOptions};

/// Per-collection/global document and chunk counts reported by `status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionStatus {
    pub collection: String,
    pub documents: i64,
    pub chunks: i64,
    pub vectors: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStatus {
    pub collections: Vec<CollectionStatus>,
    pub embedding_backlog: i64,
    pub recent_error_count: i64,
    pub healthy: bool,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct OrphanCleanupReport {
    pub content_bodies_removed: i64,
    pub chunks_removed: i64,
    pub vectors_removed: i64,
    pub fts_rows_removed: i64,
}

pub struct StoreEngine {
    pool: SqlitePool,
}

impl StoreEngine {
    /// Open the store: runs migrations and, if the requested tokenizer
    /// needs a stemmer extension that can't load, fails with
    /// `EXTENSION_LOAD_FAILED`.
    pub async fn open(pool: SqlitePool, tokenizer: FtsTokenizer) -> Result<Self, EngineError> {
        crate::schema::run_migrations(&pool, tokenizer).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drops and recreates the entire schema. Used by `gno reset`.
    pub async fn reset(&self, tokenizer: FtsTokenizer) -> Result<(), EngineError> {
        crate::schema::reset_all(&self.pool, tokenizer).await
    }

    /// Run `f` inside a transaction, rolling back on error. `sqlx`
    /// transactions nest as savepoints automatically when begun on an
    /// already-open transaction's connection; callers that need nesting
    /// should thread the `Transaction` through rather than re-entering
    /// `with_transaction`.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::Transaction<'_, sqlx::Sqlite>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<T, EngineError>> + Send + 'c>,
        >,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed after transaction error");
                }
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------
    // Config sync
    // ---------------------------------------------------------------

    pub async fn sync_collections(&self, collections: &[Collection]) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM collections")
            .fetch_all(&mut *tx)
            .await?;
        let keep: std::collections::HashSet<&str> =
            collections.iter().map(|c| c.name.as_str()).collect();
        for name in &existing {
            if !keep.contains(name.as_str()) {
                sqlx::query("DELETE FROM collections WHERE name = ?")
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for c in collections {
            let include_json = serde_json::to_string(&c.include).unwrap_or_else(|_| "[]".into());
            let exclude_json = serde_json::to_string(&c.exclude).unwrap_or_else(|_| "[]".into());
            sqlx::query(
                "INSERT INTO collections (name, path, pattern, include_json, exclude_json, update_cmd, language_hint, synced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(name) DO UPDATE SET
                    path = excluded.path, pattern = excluded.pattern,
                    include_json = excluded.include_json, exclude_json = excluded.exclude_json,
                    update_cmd = excluded.update_cmd, language_hint = excluded.language_hint",
            )
            .bind(&c.name)
            .bind(c.path.to_string_lossy().to_string())
            .bind(&c.pattern)
            .bind(include_json)
            .bind(exclude_json)
            .bind(&c.update_cmd)
            .bind(&c.language_hint)
            .bind(c.synced_at.map(|t| t.timestamp()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// Remove a single collection; fails `HAS_REFERENCES` if any context
    /// still scopes to it.
    pub async fn remove_collection(&self, name: &str) -> Result<(), EngineError> {
        let referenced: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM contexts WHERE scope_type = 'collection' AND scope_key = ?",
        )
        .bind(format!("name:{name}"))
        .fetch_one(&self.pool)
        .await?;
        if referenced > 0 {
            return Err(EngineError::HasReferences(format!(
                "collection '{name}' is referenced by {referenced} context(s)"
            )));
        }

        let exists: Option<String> = sqlx::query_scalar("SELECT name FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(EngineError::NotFound(format!("collection '{name}' not found")));
        }

        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn sync_contexts(&self, contexts: &[Context]) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM contexts").execute(&mut *tx).await?;
        for c in contexts {
            let scope_type = match c.scope_type {
                crate::models::ScopeType::Global => "global",
                crate::models::ScopeType::Collection => "collection",
                crate::models::ScopeType::Prefix => "prefix",
            };
            sqlx::query(
                "INSERT INTO contexts (scope_type, scope_key, text) VALUES (?, ?, ?)",
            )
            .bind(scope_type)
            .bind(&c.scope_key)
            .bind(&c.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------

    pub async fn upsert_document(
        &self,
        input: &DocumentUpsert,
    ) -> Result<(i64, String), EngineError> {
        let docid = crate::id::docid(&input.source_hash);
        let uri = crate::id::build_uri(&input.collection, &input.rel_path);
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO documents
                (collection, rel_path, source_hash, source_mime, source_ext, source_size,
                 source_mtime, docid, uri, title, mirror_hash, converter_id, converter_version,
                 language_hint, active, ingest_version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
             ON CONFLICT(collection, rel_path) DO UPDATE SET
                source_hash = excluded.source_hash,
                source_mime = excluded.source_mime,
                source_ext = excluded.source_ext,
                source_size = excluded.source_size,
                source_mtime = excluded.source_mtime,
                docid = excluded.docid,
                uri = excluded.uri,
                title = excluded.title,
                mirror_hash = excluded.mirror_hash,
                converter_id = excluded.converter_id,
                converter_version = excluded.converter_version,
                language_hint = excluded.language_hint,
                active = 1,
                ingest_version = excluded.ingest_version,
                last_error_code = NULL,
                last_error_message = NULL,
                last_error_at = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(&input.collection)
        .bind(&input.rel_path)
        .bind(&input.source_hash)
        .bind(&input.source_mime)
        .bind(&input.source_ext)
        .bind(input.source_size)
        .bind(input.source_mtime)
        .bind(&docid)
        .bind(&uri)
        .bind(&input.title)
        .bind(&input.mirror_hash)
        .bind(&input.converter_id)
        .bind(&input.converter_version)
        .bind(&input.language_hint)
        .bind(input.ingest_version)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM documents WHERE collection = ? AND rel_path = ?",
        )
        .bind(&input.collection)
        .bind(&input.rel_path)
        .fetch_one(&self.pool)
        .await?;

        Ok((id, docid))
    }

    pub async fn get_document_by_id(&self, id: i64) -> Result<Document, EngineError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("document {id} not found")))?;
        Ok(row_to_document(&row))
    }

    pub async fn get_document_by_rel_path(
        &self,
        collection: &str,
        rel_path: &str,
    ) -> Result<Option<Document>, EngineError> {
        let row = sqlx::query("SELECT * FROM documents WHERE collection = ? AND rel_path = ?")
            .bind(collection)
            .bind(rel_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn get_document_by_docid(&self, docid: &str) -> Result<Document, EngineError> {
        let row = sqlx::query("SELECT * FROM documents WHERE docid = ?")
            .bind(docid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("document {docid} not found")))?;
        Ok(row_to_document(&row))
    }

    /// Lists active documents, optionally scoped to a collection, newest first.
    pub async fn list_documents(
        &self,
        collection: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Document>, EngineError> {
        let sql = if collection.is_some() {
            "SELECT * FROM documents WHERE active = 1 AND collection = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?"
        } else {
            "SELECT * FROM documents WHERE active = 1 ORDER BY updated_at DESC LIMIT ? OFFSET ?"
        };
        let mut q = sqlx::query(sql);
        if let Some(c) = collection {
            q = q.bind(c);
        }
        let rows = q.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Distinct tags in use across active documents, with document counts.
    pub async fn list_tags(&self) -> Result<Vec<(String, i64)>, EngineError> {
        let rows = sqlx::query(
            "SELECT t.tag, COUNT(*) as n
             FROM tags t
             JOIN documents d ON d.id = t.document_id
             WHERE d.active = 1
             GROUP BY t.tag
             ORDER BY n DESC, t.tag ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.get("tag"), r.get("n"))).collect())
    }

    pub async fn mark_inactive(&self, collection: &str, rel_path: &str) -> Result<(), EngineError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE documents SET active = 0, updated_at = ? WHERE collection = ? AND rel_path = ?",
        )
        .bind(now)
        .bind(collection)
        .bind(rel_path)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "DELETE FROM fts_documents WHERE rowid IN
             (SELECT id FROM documents WHERE collection = ? AND rel_path = ?)",
        )
        .bind(collection)
        .bind(rel_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate(&self, doc_id: i64) -> Result<(), EngineError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE documents SET active = 0, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("document {doc_id} not found")));
        }
        sqlx::query("DELETE FROM fts_documents WHERE rowid = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_active_paths(&self, collection: &str) -> Result<Vec<String>, EngineError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT rel_path FROM documents WHERE collection = ? AND active = 1",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Content and chunks
    // ---------------------------------------------------------------

    pub async fn upsert_content(&self, mirror_hash: &str, body: &str) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO content_bodies (mirror_hash, body) VALUES (?, ?)
             ON CONFLICT(mirror_hash) DO NOTHING",
        )
        .bind(mirror_hash)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_chunks(&self, mirror_hash: &str, chunks: &[Chunk]) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM chunks WHERE mirror_hash = ?")
            .bind(mirror_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        for c in chunks {
            sqlx::query(
                "INSERT INTO chunks (mirror_hash, seq, pos, text, start_line, end_line, language, token_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(mirror_hash)
            .bind(c.seq)
            .bind(c.pos)
            .bind(&c.text)
            .bind(c.start_line)
            .bind(c.end_line)
            .bind(&c.language)
            .bind(c.token_count)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// Split into batches to respect SQLite's default bound parameter limit.
    pub async fn get_chunks_batch(&self, hashes: &[String]) -> Result<Vec<Chunk>, EngineError> {
        const BATCH: usize = 200;
        let mut out = Vec::new();
        for batch in hashes.chunks(BATCH) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!(
                "SELECT mirror_hash, seq, pos, text, start_line, end_line, language, token_count
                 FROM chunks WHERE mirror_hash IN ({placeholders}) ORDER BY mirror_hash, seq"
            );
            let mut q = sqlx::query(&sql);
            for h in batch {
                q = q.bind(h);
            }
            let rows = q.fetch_all(&self.pool).await?;
            for row in rows {
                out.push(Chunk {
                    mirror_hash: row.get("mirror_hash"),
                    seq: row.get("seq"),
                    pos: row.get("pos"),
                    text: row.get("text"),
                    start_line: row.get("start_line"),
                    end_line: row.get("end_line"),
                    language: row.get("language"),
                    token_count: row.get("token_count"),
                });
            }
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // FTS projection
    // ---------------------------------------------------------------

    pub async fn sync_document_fts(&self, collection: &str, rel_path: &str) -> Result<(), EngineError> {
        let row = sqlx::query(
            "SELECT d.id, d.rel_path, d.title, cb.body
             FROM documents d JOIN content_bodies cb ON cb.mirror_hash = d.mirror_hash
             WHERE d.collection = ? AND d.rel_path = ? AND d.active = 1",
        )
        .bind(collection)
        .bind(rel_path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(()) };
        let id: i64 = row.get("id");
        let title: Option<String> = row.get("title");
        let body: String = row.get("body");

        sqlx::query("DELETE FROM fts_documents WHERE rowid = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO fts_documents (rowid, filepath, title, body) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(rel_path)
        .bind(title.unwrap_or_default())
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn rebuild_all_documents_fts(&self) -> Result<i64, EngineError> {
        sqlx::query("DELETE FROM fts_documents").execute(&self.pool).await?;
        let rows = sqlx::query(
            "SELECT d.id, d.rel_path, d.title, cb.body
             FROM documents d JOIN content_bodies cb ON cb.mirror_hash = d.mirror_hash
             WHERE d.active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        let count = rows.len() as i64;
        for row in rows {
            let id: i64 = row.get("id");
            let rel_path: String = row.get("rel_path");
            let title: Option<String> = row.get("title");
            let body: String = row.get("body");
            sqlx::query(
                "INSERT INTO fts_documents (rowid, filepath, title, body) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(rel_path)
            .bind(title.unwrap_or_default())
            .bind(body)
            .execute(&self.pool)
            .await?;
        }
        Ok(count)
    }

    // ---------------------------------------------------------------
    // Tags
    // ---------------------------------------------------------------

    pub async fn set_doc_tags(
        &self,
        document_id: i64,
        tags: &[String],
        source: TagSource,
    ) -> Result<(), EngineError> {
        let source_str = tag_source_str(source);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM tags WHERE document_id = ? AND source = ?")
            .bind(document_id)
            .bind(source_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        for tag in tags {
            sqlx::query(
                "INSERT INTO tags (document_id, tag, source) VALUES (?, ?, ?)
                 ON CONFLICT DO NOTHING",
            )
            .bind(document_id)
            .bind(tag)
            .bind(source_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn get_tag_counts(
        &self,
        collection: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, i64)>, EngineError> {
        let mut sql = "SELECT t.tag, COUNT(*) AS n FROM tags t
                        JOIN documents d ON d.id = t.document_id
                        WHERE d.active = 1".to_string();
        if collection.is_some() {
            sql.push_str(" AND d.collection = ?");
        }
        if prefix.is_some() {
            sql.push_str(" AND (t.tag = ? OR t.tag LIKE ?)");
        }
        sql.push_str(" GROUP BY t.tag ORDER BY n DESC, t.tag ASC");

        let mut q = sqlx::query(&sql);
        if let Some(c) = collection {
            q = q.bind(c);
        }
        if let Some(p) = prefix {
            q = q.bind(p).bind(format!("{p}/%"));
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("tag"), r.get("n")))
            .collect())
    }

    // ---------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------

    pub async fn set_doc_links(
        &self,
        document_id: i64,
        links: &[Link],
        source: crate::models::LinkSource,
    ) -> Result<(), EngineError> {
        let source_str = link_source_str(source);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM links WHERE source_doc_id = ? AND source = ?")
            .bind(document_id)
            .bind(source_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;

        for link in links {
            let target_collection = link
                .target_collection
                .as_ref()
                .filter(|s| !s.is_empty());
            sqlx::query(
                "INSERT INTO links
                    (source_doc_id, target_ref, target_ref_norm, target_anchor, target_collection,
                     link_type, link_text, start_line, start_col, end_line, end_col, source)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(document_id)
            .bind(&link.target_ref)
            .bind(&link.target_ref_norm)
            .bind(&link.target_anchor)
            .bind(target_collection)
            .bind(link_type_str(link.link_type))
            .bind(&link.link_text)
            .bind(link.start_line)
            .bind(link.start_col)
            .bind(link.end_line)
            .bind(link.end_col)
            .bind(source_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    pub async fn get_links_for_doc(&self, document_id: i64) -> Result<Vec<Link>, EngineError> {
        let rows = sqlx::query(
            "SELECT * FROM links WHERE source_doc_id = ? ORDER BY start_line, start_col",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_link).collect())
    }

    /// Batched best-match resolution of wiki/markdown link targets. The
    /// wiki tier order (most to least specific) is load-bearing: titles
    /// win over path suffixes so a short wiki name never accidentally
    /// jumps to an unrelated deeply nested file.
    pub async fn resolve_links(
        &self,
        targets: &[(String, Option<String>, LinkType, String)],
    ) -> Result<Vec<Option<ResolvedTarget>>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, docid, uri, title, collection, rel_path FROM documents WHERE active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<LinkCandidate> = rows
            .into_iter()
            .map(|r| LinkCandidate {
                id: r.get("id"),
                docid: r.get("docid"),
                uri: r.get("uri"),
                title: r.get("title"),
                collection: r.get("collection"),
                rel_path: r.get("rel_path"),
            })
            .collect();

        let mut out = Vec::with_capacity(targets.len());
        for (source_collection, target_collection, link_type, target_norm) in targets {
            let collection = target_collection.as_deref().unwrap_or(source_collection);

            let resolved = match link_type {
                LinkType::Markdown => candidates
                    .iter()
                    .find(|c| c.collection == collection && c.rel_path == *target_norm),
                LinkType::Wiki => resolve_wiki_tiered(&candidates, collection, target_norm),
            };

            out.push(resolved.map(|c| ResolvedTarget {
                docid: c.docid.clone(),
                uri: c.uri.clone(),
                title: c.title.clone(),
            }));
        }

        Ok(out)
    }

    // ---------------------------------------------------------------
    // Backlinks
    // ---------------------------------------------------------------

    pub async fn get_backlinks_for_doc(
        &self,
        document_id: i64,
        collection_filter: Option<&str>,
    ) -> Result<Vec<Backlink>, EngineError> {
        let target = self.get_document_by_id(document_id).await?;

        let title_norm = target.title.as_deref().map(crate::id::normalize_wiki_name);
        let basename = target
            .rel_path
            .rsplit('/')
            .next()
            .unwrap_or(&target.rel_path)
            .to_string();
        let basename_noext = crate::id::strip_wiki_md_ext(&basename).to_string();

        let mut wiki_variants: Vec<String> = vec![
            crate::id::normalize_wiki_name(&target.rel_path),
            crate::id::normalize_wiki_name(&basename),
            crate::id::normalize_wiki_name(&basename_noext),
        ];
        if let Some(t) = title_norm {
            wiki_variants.push(t);
        }
        wiki_variants.sort();
        wiki_variants.dedup();

        let mut sql = "SELECT l.*, d.uri AS source_uri, d.title AS source_title, d.collection AS source_collection
                        FROM links l JOIN documents d ON d.id = l.source_doc_id
                        WHERE d.active = 1 AND (
                            (l.link_type = 'markdown' AND l.target_ref_norm = ? AND COALESCE(l.target_collection, d.collection) = ?)
                            OR (l.link_type = 'wiki' AND l.target_ref_norm IN ("
            .to_string();
        sql.push_str(&vec!["?"; wiki_variants.len()].join(","));
        sql.push_str(") AND COALESCE(l.target_collection, d.collection) = ?))");
        sql.push_str(" ORDER BY source_uri, l.start_line, l.start_col");

        let mut q = sqlx::query(&sql)
            .bind(&target.rel_path)
            .bind(&target.collection);
        for v in &wiki_variants {
            q = q.bind(v);
        }
        q = q.bind(&target.collection);

        let rows = q.fetch_all(&self.pool).await?;

        let mut out: Vec<Backlink> = rows
            .into_iter()
            .filter(|r| {
                collection_filter
                    .map(|c| r.get::<String, _>("source_collection") == c)
                    .unwrap_or(true)
            })
            .map(|r| Backlink {
                source_doc_id: r.get("source_doc_id"),
                source_uri: r.get("source_uri"),
                source_title: r.get("source_title"),
                link_type: if r.get::<String, _>("link_type") == "wiki" {
                    LinkType::Wiki
                } else {
                    LinkType::Markdown
                },
                link_text: r.get("link_text"),
                start_line: r.get("start_line"),
                start_col: r.get("start_col"),
            })
            .collect();

        out.sort_by(|a, b| {
            a.source_uri
                .cmp(&b.source_uri)
                .then(a.start_line.cmp(&b.start_line))
                .then(a.start_col.cmp(&b.start_col))
        });
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Status and cleanup
    // ---------------------------------------------------------------

    pub async fn get_status(&self, active_model: Option<&str>) -> Result<StoreStatus, EngineError> {
        let collections: Vec<String> =
            sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        let mut out = Vec::with_capacity(collections.len());
        for name in &collections {
            let documents: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM documents WHERE collection = ? AND active = 1",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
            let chunks: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM chunks c
                 JOIN documents d ON d.mirror_hash = c.mirror_hash
                 WHERE d.collection = ? AND d.active = 1",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
            let vectors: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM content_vectors cv
                 JOIN documents d ON d.mirror_hash = cv.mirror_hash
                 WHERE d.collection = ? AND d.active = 1",
            )
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
            out.push(CollectionStatus {
                collection: name.clone(),
                documents,
                chunks,
                vectors,
            });
        }

        let embedding_backlog: i64 = if let Some(model) = active_model {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM chunks c
                 JOIN documents d ON d.mirror_hash = c.mirror_hash
                 WHERE d.active = 1 AND NOT EXISTS (
                     SELECT 1 FROM content_vectors cv
                     WHERE cv.mirror_hash = c.mirror_hash AND cv.seq = c.seq AND cv.model = ?
                 )",
            )
            .bind(model)
            .fetch_one(&self.pool)
            .await?
        } else {
            0
        };

        let one_day_ago = chrono::Utc::now().timestamp() - 86_400;
        let recent_error_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ingest_errors WHERE occurred_at >= ?",
        )
        .bind(one_day_ago)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStatus {
            collections: out,
            embedding_backlog,
            recent_error_count,
            healthy: true,
        })
    }

    pub async fn cleanup_orphans(&self) -> Result<OrphanCleanupReport, EngineError> {
        let mut report = OrphanCleanupReport::default();

        let chunks_removed = sqlx::query(
            "DELETE FROM chunks WHERE mirror_hash NOT IN (SELECT mirror_hash FROM documents)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        report.chunks_removed = chunks_removed as i64;

        let vectors_removed = sqlx::query(
            "DELETE FROM content_vectors WHERE mirror_hash NOT IN (SELECT mirror_hash FROM documents)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        report.vectors_removed = vectors_removed as i64;

        let bodies_removed = sqlx::query(
            "DELETE FROM content_bodies WHERE mirror_hash NOT IN (SELECT mirror_hash FROM documents)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        report.content_bodies_removed = bodies_removed as i64;

        let fts_removed = sqlx::query(
            "DELETE FROM fts_documents WHERE rowid NOT IN (SELECT id FROM documents WHERE active = 1)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        report.fts_rows_removed = fts_removed as i64;

        Ok(report)
    }

    pub async fn log_ingest_error(
        &self,
        collection: &str,
        rel_path: &str,
        code: &str,
        message: &str,
        details_json: Option<&str>,
    ) -> Result<(), EngineError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO ingest_errors (collection, rel_path, occurred_at, code, message, details_json)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(rel_path)
        .bind(now)
        .bind(code)
        .bind(message)
        .bind(details_json)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE documents SET last_error_code = ?, last_error_message = ?, last_error_at = ?
             WHERE collection = ? AND rel_path = ?",
        )
        .bind(code)
        .bind(message)
        .bind(now)
        .bind(collection)
        .bind(rel_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

struct LinkCandidate {
    id: i64,
    docid: String,
    uri: String,
    title: Option<String>,
    collection: String,
    rel_path: String,
}

/// Wiki-link resolution tier order, most to least specific: exact title,
/// exact normalized rel_path, basename, then shortest path-suffix match.
/// Titles winning over path suffixes keeps a short wiki name from
/// accidentally jumping to an unrelated deeply nested file.
fn resolve_wiki_tiered<'a>(
    candidates: &'a [LinkCandidate],
    collection: &str,
    target_norm: &str,
) -> Option<&'a LinkCandidate> {
    let in_collection: Vec<&LinkCandidate> = candidates
        .iter()
        .filter(|c| c.collection == collection)
        .collect();

    if let Some(c) = in_collection.iter().find(|c| {
        c.title.as_deref().map(crate::id::normalize_wiki_name).as_deref() == Some(target_norm)
    }) {
        return Some(*c);
    }
    if let Some(c) = in_collection
        .iter()
        .find(|c| crate::id::normalize_wiki_name(&c.rel_path) == target_norm)
    {
        return Some(*c);
    }
    if let Some(c) = in_collection.iter().find(|c| {
        let base = c.rel_path.rsplit('/').next().unwrap_or(&c.rel_path);
        crate::id::normalize_wiki_name(base) == target_norm
    }) {
        return Some(*c);
    }
    in_collection
        .into_iter()
        .filter(|c| crate::id::normalize_wiki_name(&c.rel_path).ends_with(target_norm))
        .min_by_key(|c| c.id)
}

fn tag_source_str(s: TagSource) -> &'static str {
    match s {
        TagSource::Frontmatter => "frontmatter",
        TagSource::User => "user",
    }
}

fn link_source_str(s: crate::models::LinkSource) -> &'static str {
    match s {
        crate::models::LinkSource::Parsed => "parsed",
        crate::models::LinkSource::User => "user",
        crate::models::LinkSource::Suggested => "suggested",
    }
}

fn link_type_str(t: LinkType) -> &'static str {
    match t {
        LinkType::Wiki => "wiki",
        LinkType::Markdown => "markdown",
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        collection: row.get("collection"),
        rel_path: row.get("rel_path"),
        source_hash: row.get("source_hash"),
        source_mime: row.get("source_mime"),
        source_ext: row.get("source_ext"),
        source_size: row.get("source_size"),
        source_mtime: row.get("source_mtime"),
        docid: row.get("docid"),
        uri: row.get("uri"),
        title: row.get("title"),
        mirror_hash: row.get("mirror_hash"),
        converter_id: row.get("converter_id"),
        converter_version: row.get("converter_version"),
        language_hint: row.get("language_hint"),
        active: row.get::<i64, _>("active") != 0,
        ingest_version: row.get("ingest_version"),
        last_error_code: row.get("last_error_code"),
        last_error_message: row.get("last_error_message"),
        last_error_at: row.get("last_error_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_link(row: &sqlx::sqlite::SqliteRow) -> Link {
    Link {
        source_doc_id: row.get("source_doc_id"),
        target_ref: row.get("target_ref"),
        target_ref_norm: row.get("target_ref_norm"),
        target_anchor: row.get("target_anchor"),
        target_collection: row.get("target_collection"),
        link_type: if row.get::<String, _>("link_type") == "wiki" {
            LinkType::Wiki
        } else {
            LinkType::Markdown
        },
        link_text: row.get("link_text"),
        start_line: row.get("start_line"),
        start_col: row.get("start_col"),
        end_line: row.get("end_line"),
        end_col: row.get("end_col"),
        source: match row.get::<String, _>("source").as_str() {
            "user" => crate::models::LinkSource::User,
            "suggested" => crate::models::LinkSource::Suggested,
            _ => crate::models::LinkSource::Parsed,
        },
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
