//! Core data models used throughout the knowledge indexer.
//!
//! These types represent the collections, documents, chunks, links, and
//! search results that flow through the ingestion and retrieval pipeline.
//! See `DESIGN.md` for the storage layout each type is persisted under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-named root folder registered with the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub path: std::path::PathBuf,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub update_cmd: Option<String>,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

fn default_pattern() -> String {
    "**/*".to_string()
}

fn default_exclude() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ]
}

/// Scope that a [`Context`] note applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Global,
    Collection,
    Prefix,
}

/// Scoped free-text metadata attached to a global/collection/URI-prefix scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub scope_type: ScopeType,
    pub scope_key: String,
    pub text: String,
}

/// A normalized document persisted by the store, one row per `(collection, rel_path)`.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub collection: String,
    pub rel_path: String,
    pub source_hash: String,
    pub source_mime: String,
    pub source_ext: String,
    pub source_size: i64,
    pub source_mtime: i64,
    pub docid: String,
    pub uri: String,
    pub title: Option<String>,
    pub mirror_hash: String,
    pub converter_id: String,
    pub converter_version: String,
    pub language_hint: Option<String>,
    pub active: bool,
    pub ingest_version: i64,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input accepted by `StoreEngine::upsert_document`.
#[derive(Debug, Clone)]
pub struct DocumentUpsert {
    pub collection: String,
    pub rel_path: String,
    pub source_hash: String,
    pub source_mime: String,
    pub source_ext: String,
    pub source_size: i64,
    pub source_mtime: i64,
    pub title: Option<String>,
    pub mirror_hash: String,
    pub converter_id: String,
    pub converter_version: String,
    pub language_hint: Option<String>,
    pub ingest_version: i64,
}

/// A contiguous slice of a document's canonical body, the unit of lexical
/// and vector indexing. Chunks for a given `mirror_hash` are ordered by
/// `seq` starting at 0 with no gaps (§8 invariant).
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub mirror_hash: String,
    pub seq: i64,
    pub pos: i64,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: Option<String>,
    pub token_count: Option<i64>,
}

/// Source of a tag or link row — distinguishes machine-derived facts from
/// user edits so re-ingestion never clobbers user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    Frontmatter,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub document_id: i64,
    pub tag: String,
    pub source: TagSource,
}

/// Kind of a Markdown reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Wiki,
    Markdown,
}

/// Provenance of a link row, mirroring [`TagSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSource {
    Parsed,
    User,
    Suggested,
}

/// One outgoing reference parsed out of a document's body.
#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub source_doc_id: i64,
    pub target_ref: String,
    pub target_ref_norm: String,
    pub target_anchor: Option<String>,
    pub target_collection: Option<String>,
    pub link_type: LinkType,
    pub link_text: Option<String>,
    pub start_line: i64,
    pub start_col: i64,
    pub end_line: i64,
    pub end_col: i64,
    pub source: LinkSource,
}

/// A single search result row, shaped for both CLI and HTTP/RPC consumption.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub docid: String,
    pub uri: String,
    pub title: Option<String>,
    pub collection: String,
    pub rel_path: String,
    pub score: f64,
    pub snippet: String,
    pub updated_at: String,
}

/// Outcome of resolving a parsed link target against the document table.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTarget {
    pub docid: String,
    pub uri: String,
    pub title: Option<String>,
}

/// A single backlink: some other active document links to the queried one.
#[derive(Debug, Clone, Serialize)]
pub struct Backlink {
    pub source_doc_id: i64,
    pub source_uri: String,
    pub source_title: Option<String>,
    pub link_type: LinkType,
    pub link_text: Option<String>,
    pub start_line: i64,
    pub start_col: i64,
}

/// A single ingestion failure recorded against a collection/relPath, kept so
/// `doctor`/`status` can surface what failed without aborting the whole sync.
#[derive(Debug, Clone, Serialize)]
pub struct IngestError {
    pub id: i64,
    pub collection: String,
    pub rel_path: String,
    pub occurred_at: i64,
    pub code: String,
    pub message: String,
    pub details_json: Option<String>,
}

/// A row in the `schema_meta` key/value table, used to gate migrations and
/// to detect an index built by an incompatible engine version.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaMeta {
    pub key: String,
    pub value: String,
}
