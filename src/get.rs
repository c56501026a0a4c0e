//! Document retrieval by `docid` or `uri`, with links/backlinks/tags.
//!
//! Used by the `gno get <id>` CLI command and the `/api/docs/:id` and
//! `/api/doc` HTTP endpoints.

use serde::Serialize;
use sqlx::Row;

use crate::errors::EngineError;
use crate::models::{Backlink, Chunk, Link};
use crate::store::{self, StoreEngine};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub docid: String,
    pub uri: String,
    pub collection: String,
    pub rel_path: String,
    pub title: Option<String>,
    pub source_mime: String,
    pub language_hint: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub active: bool,
    pub tags: Vec<String>,
    pub body: String,
    pub chunks: Vec<ChunkResponse>,
    pub links: Vec<Link>,
    pub backlinks: Vec<Backlink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub seq: i64,
    pub text: String,
}

/// Resolves either a `#`-prefixed docid or a `gno://collection/path` URI.
pub async fn get_document(store: &StoreEngine, id: &str) -> Result<DocumentResponse, EngineError> {
    let document = if crate::id::is_docid(id) {
        store.get_document_by_docid(id).await?
    } else if let Some((collection, rel_path)) = crate::id::parse_uri(id) {
        store
            .get_document_by_rel_path(&collection, &rel_path)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("document not found: {id}")))?
    } else {
        return Err(EngineError::InvalidInput(format!(
            "'{id}' is neither a docid nor a gno:// uri"
        )));
    };

    let pool = store.pool();
    let body_row = sqlx::query("SELECT body FROM content_bodies WHERE mirror_hash = ?")
        .bind(&document.mirror_hash)
        .fetch_optional(pool)
        .await?;
    let body: String = body_row.map(|r| r.get("body")).unwrap_or_default();

    let chunks: Vec<Chunk> = store.get_chunks_batch(std::slice::from_ref(&document.mirror_hash)).await?;
    let chunks = chunks
        .into_iter()
        .map(|c| ChunkResponse { seq: c.seq, text: c.text })
        .collect();

    let tag_rows = sqlx::query("SELECT tag FROM tags WHERE document_id = ? ORDER BY tag")
        .bind(document.id)
        .fetch_all(pool)
        .await?;
    let tags = tag_rows.into_iter().map(|r| r.get("tag")).collect();

    let links = store.get_links_for_doc(document.id).await?;
    let backlinks = store.get_backlinks_for_doc(document.id, None).await?;

    Ok(DocumentResponse {
        docid: document.docid,
        uri: document.uri,
        collection: document.collection,
        rel_path: document.rel_path,
        title: document.title,
        source_mime: document.source_mime,
        language_hint: document.language_hint,
        created_at: store::format_ts_iso(document.created_at),
        updated_at: store::format_ts_iso(document.updated_at),
        active: document.active,
        tags,
        body,
        chunks,
        links,
        backlinks,
    })
}

/// CLI entry point — fetches the document and prints it to stdout.
pub async fn run_get(store: &StoreEngine, id: &str) -> Result<(), EngineError> {
    let doc = get_document(store, id).await?;

    println!("--- Document ---");
    println!("docid:        {}", doc.docid);
    println!("uri:          {}", doc.uri);
    println!("title:        {}", doc.title.as_deref().unwrap_or("(untitled)"));
    println!("collection:   {}", doc.collection);
    println!("rel_path:     {}", doc.rel_path);
    println!("tags:         {}", doc.tags.join(", "));
    println!("created_at:   {}", doc.created_at);
    println!("updated_at:   {}", doc.updated_at);
    println!("active:       {}", doc.active);
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}]", chunk.seq);
        println!("{}", chunk.text);
        println!();
    }

    if !doc.links.is_empty() {
        println!("--- Links ({}) ---", doc.links.len());
        for link in &doc.links {
            println!("  -> {} ({:?})", link.target_ref, link.link_type);
        }
        println!();
    }

    if !doc.backlinks.is_empty() {
        println!("--- Backlinks ({}) ---", doc.backlinks.len());
        for bl in &doc.backlinks {
            println!("  <- {} ({})", bl.source_uri, bl.link_text.as_deref().unwrap_or(""));
        }
    }

    Ok(())
}
