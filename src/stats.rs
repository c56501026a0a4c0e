//! Database statistics and health overview.
//!
//! A thin CLI-facing formatter over [`StoreEngine::get_status`]: per-
//! collection document/chunk/vector counts, embedding backlog, recent
//! ingest error count, and an overall health bit. Used by `gno status`.

use crate::config::Config;
use crate::errors::EngineError;
use crate::store::StoreEngine;

pub async fn run_status(store: &StoreEngine, config: &Config) -> Result<(), EngineError> {
    let active_model = config.embedding.model.as_deref();
    let status = store.get_status(active_model).await?;

    let db_size = std::fs::metadata(config.db.db_path())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("gnosis — index status");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.db_path().display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Healthy:     {}", status.healthy);
    println!("  Errors(24h): {}", status.recent_error_count);
    println!("  Backlog:     {}", status.embedding_backlog);
    println!();

    if !status.collections.is_empty() {
        println!(
            "  {:<24} {:>10} {:>10} {:>10}",
            "COLLECTION", "DOCS", "CHUNKS", "VECTORS"
        );
        println!("  {}", "-".repeat(58));
        for c in &status.collections {
            println!(
                "  {:<24} {:>10} {:>10} {:>10}",
                c.collection, c.documents, c.chunks, c.vectors
            );
        }
    } else {
        println!("  (no collections registered)");
    }
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
