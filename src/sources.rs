//! Diagnostic health checks: database reachability, FTS tokenizer
//! availability, vector mirror availability, and collection root
//! reachability. Used by both the `gno doctor` CLI command and any
//! front-end surfacing engine health.

use serde::Serialize;

use crate::config::Config;
use crate::errors::EngineError;
use crate::store::StoreEngine;

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub healthy: bool,
    pub notes: Option<String>,
}

/// Runs every diagnostic check and returns their results in a fixed order.
pub async fn run_checks(store: &StoreEngine, config: &Config) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    checks.push(check_database(store).await);
    checks.push(check_tokenizer(config));
    checks.push(check_vector_mirror(store, config).await);

    for collection in &config.collections {
        checks.push(check_collection_root(collection));
    }

    checks
}

async fn check_database(store: &StoreEngine) -> CheckResult {
    match sqlx::query("SELECT 1").fetch_one(store.pool()).await {
        Ok(_) => CheckResult {
            name: "database".into(),
            healthy: true,
            notes: None,
        },
        Err(e) => CheckResult {
            name: "database".into(),
            healthy: false,
            notes: Some(e.to_string()),
        },
    }
}

fn check_tokenizer(config: &Config) -> CheckResult {
    CheckResult {
        name: "fts_tokenizer".into(),
        healthy: true,
        notes: if config.fts_tokenizer.requires_extension() {
            Some(format!(
                "{:?} requires a loadable stemmer extension at migration time",
                config.fts_tokenizer
            ))
        } else {
            None
        },
    }
}

async fn check_vector_mirror(store: &StoreEngine, config: &Config) -> CheckResult {
    let Some(model) = &config.embedding.model else {
        return CheckResult {
            name: "vector_mirror".into(),
            healthy: true,
            notes: Some("no embedding model configured".into()),
        };
    };
    let index = crate::vector::VectorIndex::open(store.pool().clone(), model, config.embedding.dims.unwrap_or(0)).await;
    CheckResult {
        name: "vector_mirror".into(),
        healthy: index.search_available(),
        notes: if index.search_available() {
            None
        } else {
            Some("mirror table unavailable; falling back to canonical table only".into())
        },
    }
}

fn check_collection_root(collection: &crate::models::Collection) -> CheckResult {
    CheckResult {
        name: format!("collection:{}", collection.name),
        healthy: collection.path.exists(),
        notes: if collection.path.exists() {
            None
        } else {
            Some(format!("root does not exist: {}", collection.path.display()))
        },
    }
}

/// CLI entry point for `gno doctor`.
pub async fn run_doctor(store: &StoreEngine, config: &Config) -> Result<(), EngineError> {
    let checks = run_checks(store, config).await;

    println!("{:<28} {:<8} NOTES", "CHECK", "STATUS");
    let mut all_healthy = true;
    for c in &checks {
        if !c.healthy {
            all_healthy = false;
        }
        println!(
            "{:<28} {:<8} {}",
            c.name,
            if c.healthy { "OK" } else { "FAIL" },
            c.notes.as_deref().unwrap_or("")
        );
    }

    if !all_healthy {
        return Err(EngineError::Unavailable(
            "one or more diagnostic checks failed".into(),
        ));
    }
    Ok(())
}
