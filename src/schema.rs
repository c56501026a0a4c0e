//! Database schema migrations.
//!
//! Creates every table named in the data model: `collections`, `contexts`,
//! `documents`, `content_bodies`, `chunks`, `content_vectors`,
//! `fts_documents` (per-document FTS5, rowid = document id), `tags`,
//! `links`, `ingest_errors`, and `schema_meta`. Per-model vector mirror
//! tables (`vec_<hash8(model)>`) are created lazily by [`crate::vector`],
//! not here, since their name and shape depend on the active embedding
//! model.
//!
//! Migration is idempotent: every statement is `CREATE TABLE IF NOT
//! EXISTS` (FTS5 virtual tables are checked against `sqlite_master` first,
//! since `IF NOT EXISTS` is not honored consistently across SQLite builds
//! for virtual tables).

use sqlx::SqlitePool;

use crate::config::FtsTokenizer;
use crate::errors::EngineError;

pub const SCHEMA_VERSION: &str = "1";

pub async fn run_migrations(
    pool: &SqlitePool,
    tokenizer: FtsTokenizer,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            pattern TEXT NOT NULL DEFAULT '**/*',
            include_json TEXT NOT NULL DEFAULT '[]',
            exclude_json TEXT NOT NULL DEFAULT '[]',
            update_cmd TEXT,
            language_hint TEXT,
            synced_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contexts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(scope_type, scope_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            rel_path TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            source_mime TEXT NOT NULL,
            source_ext TEXT NOT NULL,
            source_size INTEGER NOT NULL,
            source_mtime INTEGER NOT NULL,
            docid TEXT NOT NULL,
            uri TEXT NOT NULL,
            title TEXT,
            mirror_hash TEXT NOT NULL,
            converter_id TEXT NOT NULL,
            converter_version TEXT NOT NULL,
            language_hint TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            ingest_version INTEGER NOT NULL DEFAULT 0,
            last_error_code TEXT,
            last_error_message TEXT,
            last_error_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(collection, rel_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_bodies (
            mirror_hash TEXT PRIMARY KEY,
            body TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            mirror_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            pos INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            language TEXT,
            token_count INTEGER,
            PRIMARY KEY (mirror_hash, seq),
            FOREIGN KEY (mirror_hash) REFERENCES content_bodies(mirror_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_vectors (
            mirror_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (mirror_hash, seq, model),
            FOREIGN KEY (mirror_hash, seq) REFERENCES chunks(mirror_hash, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='fts_documents'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        let ddl = format!(
            "CREATE VIRTUAL TABLE fts_documents USING fts5(filepath, title, body, tokenize = '{}')",
            tokenizer.tokenize_arg()
        );
        sqlx::query(&ddl).execute(pool).await.map_err(|e| {
            if tokenizer.requires_extension() {
                EngineError::ExtensionLoadFailed(e.to_string())
            } else {
                EngineError::ConnectionFailed(e.to_string())
            }
        })?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            document_id INTEGER NOT NULL,
            tag TEXT NOT NULL,
            source TEXT NOT NULL,
            PRIMARY KEY (document_id, tag, source),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_doc_id INTEGER NOT NULL,
            target_ref TEXT NOT NULL,
            target_ref_norm TEXT NOT NULL,
            target_anchor TEXT,
            target_collection TEXT,
            link_type TEXT NOT NULL,
            link_text TEXT,
            start_line INTEGER NOT NULL,
            start_col INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_col INTEGER NOT NULL,
            source TEXT NOT NULL,
            FOREIGN KEY (source_doc_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            rel_path TEXT NOT NULL,
            occurred_at INTEGER NOT NULL,
            code TEXT NOT NULL,
            message TEXT NOT NULL,
            details_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO schema_meta (key, value) VALUES ('version', ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_mirror_hash ON documents(mirror_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_active ON documents(active)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_source_doc ON links(source_doc_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_links_target_norm ON links(target_ref_norm)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ingest_errors_occurred ON ingest_errors(occurred_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Drops every table this build creates, including any per-model vector
/// mirror tables (`vec_*`), then re-runs migrations from scratch. Used by
/// `gno reset`.
pub async fn reset_all(pool: &SqlitePool, tokenizer: FtsTokenizer) -> Result<(), EngineError> {
    let mirror_tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'vec\\_%' ESCAPE '\\'",
    )
    .fetch_all(pool)
    .await?;

    for table in mirror_tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\""))
            .execute(pool)
            .await?;
    }

    const TABLES: &[&str] = &[
        "fts_documents",
        "ingest_errors",
        "links",
        "tags",
        "content_vectors",
        "chunks",
        "content_bodies",
        "documents",
        "contexts",
        "collections",
        "schema_meta",
    ];
    for table in TABLES {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{table}\""))
            .execute(pool)
            .await?;
    }

    run_migrations(pool, tokenizer).await
}
