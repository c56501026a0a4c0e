//! Lexical search over `fts_documents`.

use sqlx::{Row, SqlitePool};

use crate::errors::EngineError;
use crate::models::SearchResultItem;

/// Escape a free-text query into a safe FTS5 token-conjunction: split on
/// whitespace, wrap each token in double quotes (doubling embedded
/// quotes), so user input can never break out into FTS query syntax.
pub fn escape_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct FtsOptions<'a> {
    pub collection: Option<&'a str>,
    pub tags_all: &'a [String],
    pub tags_any: &'a [String],
    pub snippet: bool,
    pub limit: i64,
}

pub async fn search_fts(
    pool: &SqlitePool,
    query: &str,
    opts: FtsOptions<'_>,
) -> Result<Vec<SearchResultItem>, EngineError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let escaped = escape_query(query);

    let snippet_expr = if opts.snippet {
        "snippet(fts_documents, 2, '>>>', '<<<', '...', 32)"
    } else {
        "substr(d.body, 1, 200)"
    };

    let base_sql = format!(
        "SELECT d.id AS doc_id, d.docid, d.uri, d.title, d.collection, d.rel_path, d.updated_at,
                fts.rank AS rank, {snippet} AS snippet
         FROM fts_documents fts
         JOIN documents d ON d.id = fts.rowid
         WHERE fts_documents MATCH ? AND d.active = 1
         {collection_filter}
         ORDER BY fts.rank
         LIMIT ?",
        snippet = snippet_expr,
        collection_filter = if opts.collection.is_some() {
            "AND d.collection = ?"
        } else {
            ""
        },
    );

    let mut q = sqlx::query(&base_sql).bind(&escaped);
    if let Some(c) = opts.collection {
        q = q.bind(c);
    }
    q = q.bind(opts.limit.max(opts.limit * 4).max(200));

    let rows = q.fetch_all(pool).await.map_err(map_fts_error)?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let doc_id: i64 = row.get("doc_id");
        if !opts.tags_all.is_empty() || !opts.tags_any.is_empty() {
            if !tag_filters_match(pool, doc_id, opts.tags_all, opts.tags_any).await? {
                continue;
            }
        }
        let updated_at: i64 = row.get("updated_at");
        results.push(SearchResultItem {
            docid: row.get("docid"),
            uri: row.get("uri"),
            title: row.get("title"),
            collection: row.get("collection"),
            rel_path: row.get("rel_path"),
            score: -row.get::<f64, _>("rank"),
            snippet: row.get("snippet"),
            updated_at: crate::store::format_ts_iso(updated_at),
        });
        if results.len() as i64 >= opts.limit {
            break;
        }
    }

    Ok(results)
}

async fn tag_filters_match(
    pool: &SqlitePool,
    doc_id: i64,
    tags_all: &[String],
    tags_any: &[String],
) -> Result<bool, EngineError> {
    let rows = sqlx::query("SELECT tag FROM tags WHERE document_id = ?")
        .bind(doc_id)
        .fetch_all(pool)
        .await?;
    let doc_tags: std::collections::HashSet<String> =
        rows.into_iter().map(|r| r.get::<String, _>("tag")).collect();

    if !tags_all.is_empty() && !tags_all.iter().all(|t| doc_tags.contains(t)) {
        return Ok(false);
    }
    if !tags_any.is_empty() && !tags_any.iter().any(|t| doc_tags.contains(t)) {
        return Ok(false);
    }
    Ok(true)
}

fn map_fts_error(e: sqlx::Error) -> EngineError {
    let msg = e.to_string();
    if msg.to_lowercase().contains("fts5") || msg.to_lowercase().contains("syntax") {
        EngineError::InvalidInput(msg)
    } else {
        EngineError::QueryFailed(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_query_quotes_each_token() {
        assert_eq!(escape_query("hello world"), "\"hello\" \"world\"");
    }

    #[test]
    fn escape_query_doubles_embedded_quotes() {
        assert_eq!(escape_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
    }

    #[test]
    fn escape_query_lone_quote_does_not_panic() {
        let escaped = escape_query("\"");
        assert!(escaped.contains("\"\"\"\""));
    }
}
