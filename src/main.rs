//! # gnosis
//!
//! A local-first personal knowledge indexer: a content-addressed SQLite
//! store, a filesystem ingestion pipeline, and a hybrid lexical/semantic
//! search pipeline, exposed through a CLI, an HTTP API, and a JSON-RPC
//! tool server.
//!
//! ## Architecture
//!
//! ```text
//! Collections (filesystem) → Ingest → Chunk → Embed → SQLite → Search → CLI / HTTP / JSON-RPC
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing, validation, atomic save
//! - [`config_mutex`] — serialized load/mutate/save/sync critical section
//! - [`models`] — core data types: `Collection`, `Document`, `Chunk`, `SearchResultItem`
//! - [`scan`] — collection filesystem walk
//! - [`convert`] — raw bytes to canonical body + frontmatter extraction
//! - [`chunk`] — token-bounded text chunker
//! - [`links`] — wiki/markdown link extraction
//! - [`ingest`] — ingestion pipeline orchestration
//! - [`ports`] — pluggable embedding/rerank/generation interfaces
//! - [`embed_cmd`] — standalone embedding backfill/rebuild
//! - [`search`] — lexical, hybrid, expansion, rerank, ask, similar-documents
//! - [`get`] — document retrieval by docid/uri
//! - [`sources`] — diagnostic health checks (`gno doctor`)
//! - [`stats`] — index status overview (`gno status`)
//! - [`progress`] — ingestion progress reporting
//! - [`jobs`] — single-slot background job tracker
//! - [`store`] — SQLite persistence, FTS projection, link graph
//! - [`schema`] — database schema migrations
//! - [`vector`] — per-model vector mirror tables and nearest-neighbor search
//! - [`id`] — docid/URI derivation and content hashing
//! - [`errors`] — typed engine error vocabulary
//! - [`cli`] — command-line argument definitions
//! - [`http`] — loopback HTTP API (Axum)
//! - [`rpc`] — JSON-RPC tool server

mod chunk;
mod cli;
mod config;
mod config_mutex;
mod convert;
mod db;
mod embed_cmd;
mod errors;
mod get;
mod http;
mod id;
mod ingest;
mod jobs;
mod links;
mod models;
mod ports;
mod progress;
mod rpc;
mod scan;
mod schema;
mod search;
mod sources;
mod stats;
mod store;
mod vector;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, CollectionAction, Commands, EmbedAction, ServeService};
use errors::EngineError;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                let body = serde_json::json!({"error": {"code": e.code(), "message": e.to_string()}});
                eprintln!("{}", serde_json::to_string(&body).unwrap_or_default());
            } else {
                eprintln!("error [{}]: {e}", e.code());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), EngineError> {
    let config = config::load_config(&cli.config)?;
    let pool = db::connect(&config).await?;
    let store = store::StoreEngine::open(pool, config.fts_tokenizer).await?;
    store.sync_collections(&config.collections).await?;
    let contexts: Vec<models::Context> = config.contexts.iter().cloned().map(Into::into).collect();
    store.sync_contexts(&contexts).await?;
    let ports = ports::LlmPorts::from_config(&config);

    match &cli.command {
        Commands::Status => {
            if cli.json {
                let status = store.get_status(config.embedding.model.as_deref()).await?;
                print_json(&status);
            } else {
                stats::run_status(&store, &config).await?;
            }
        }

        Commands::Doctor => {
            if cli.json {
                let checks = sources::run_checks(&store, &config).await;
                let failed = checks.iter().any(|c| !c.healthy);
                print_json(&checks);
                if failed {
                    return Err(EngineError::Unavailable("one or more diagnostic checks failed".into()));
                }
            } else {
                sources::run_doctor(&store, &config).await?;
            }
        }

        Commands::Update { collection } => {
            let targets: Vec<&models::Collection> = config
                .collections
                .iter()
                .filter(|c| collection.as_deref().is_none_or(|name| c.name == name))
                .collect();
            if targets.is_empty() {
                return Err(EngineError::NotFound(match collection {
                    Some(name) => format!("collection '{name}' is not registered"),
                    None => "no collections registered".to_string(),
                }));
            }

            let mode = if cli.json {
                progress::ProgressMode::Json
            } else {
                progress::ProgressMode::default_for_tty()
            };
            let reporter = mode.reporter();

            for collection in targets {
                let summary = ingest::run_ingest(&store, &config, collection, &ports, Some(reporter.as_ref())).await?;
                if cli.json {
                    print_json(&summary);
                } else {
                    println!(
                        "{}: seen {} added {} updated {} unchanged {} errored {} removed {}",
                        summary.collection,
                        summary.files_seen,
                        summary.files_added,
                        summary.files_updated,
                        summary.files_unchanged,
                        summary.files_errored,
                        summary.files_removed
                    );
                }
            }
        }

        Commands::Reset { yes } => {
            if !*yes {
                return Err(EngineError::InvalidInput(
                    "gno reset is destructive; re-run with --yes to confirm".into(),
                ));
            }
            store.reset(config.fts_tokenizer).await?;
            println!("schema reset.");
        }

        Commands::Collection { action } => {
            let config_mutex = config_mutex::ConfigMutex::new(cli.config.clone(), config.clone());
            match action {
                CollectionAction::Add { name, path, pattern } => {
                    let name = name.clone();
                    let path = path.clone();
                    let pattern = pattern.clone();
                    config_mutex
                        .mutate(&store, move |mut c| {
                            if c.collections.iter().any(|existing| existing.name == name) {
                                return Err(EngineError::Conflict(format!("collection '{name}' already exists")));
                            }
                            c.collections.push(models::Collection {
                                name,
                                path,
                                pattern,
                                include: vec![],
                                exclude: vec![
                                    "**/.git/**".to_string(),
                                    "**/node_modules/**".to_string(),
                                    "**/target/**".to_string(),
                                ],
                                update_cmd: None,
                                language_hint: None,
                                synced_at: None,
                            });
                            Ok(c)
                        })
                        .await?;
                    println!("collection added.");
                }
                CollectionAction::Remove { name } => {
                    let name = name.clone();
                    let name_for_store = name.clone();
                    config_mutex
                        .mutate(&store, move |mut c| {
                            let before = c.collections.len();
                            c.collections.retain(|existing| existing.name != name);
                            if c.collections.len() == before {
                                return Err(EngineError::NotFound(format!("collection '{name}' not found")));
                            }
                            Ok(c)
                        })
                        .await?;
                    store.remove_collection(&name_for_store).await?;
                    println!("collection removed.");
                }
            }
        }

        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                let summary = embed_cmd::run_embed_pending(&store, &config, &ports, *limit, *dry_run).await?;
                if cli.json {
                    print_json(&summary);
                } else {
                    embed_cmd::print_summary("embed pending", &summary);
                }
            }
            EmbedAction::Rebuild => {
                let summary = embed_cmd::run_embed_rebuild(&store, &config, &ports).await?;
                if cli.json {
                    print_json(&summary);
                } else {
                    embed_cmd::print_summary("embed rebuild", &summary);
                }
            }
        },

        Commands::Search { query, collection, limit } => {
            let opts = search::SearchOptions {
                collection: collection.as_deref(),
                tags_all: &[],
                tags_any: &[],
                limit: limit.unwrap_or(config.retrieval.final_limit),
                no_expand: true,
                no_rerank: true,
            };
            let outcome = search::search(&store, &config, &ports, query, search::SearchMode::Lexical, opts).await?;
            if cli.json {
                print_json(&outcome);
            } else {
                print_results(&outcome.results);
            }
        }

        Commands::Query {
            query,
            collection,
            limit,
            no_expand,
            no_rerank,
        } => {
            let opts = search::SearchOptions {
                collection: collection.as_deref(),
                tags_all: &[],
                tags_any: &[],
                limit: limit.unwrap_or(config.retrieval.final_limit),
                no_expand: *no_expand || config.retrieval.no_expand,
                no_rerank: *no_rerank || config.retrieval.no_rerank,
            };
            let outcome = search::search(&store, &config, &ports, query, search::SearchMode::Hybrid, opts).await?;
            if cli.json {
                print_json(&outcome);
            } else {
                print_results(&outcome.results);
            }
        }

        Commands::Ask { question, collection } => {
            let opts = search::SearchOptions {
                collection: collection.as_deref(),
                tags_all: &[],
                tags_any: &[],
                limit: config.retrieval.final_limit,
                no_expand: config.retrieval.no_expand,
                no_rerank: config.retrieval.no_rerank,
            };
            let outcome = search::ask(&store, &config, &ports, question, opts).await?;
            if cli.json {
                print_json(&outcome);
            } else {
                match &outcome.answer {
                    Some(answer) => println!("{answer}\n"),
                    None => println!("(no generation provider configured; showing supporting results)\n"),
                }
                if !outcome.citations.is_empty() {
                    println!("citations: {}", outcome.citations.join(", "));
                }
                print_results(&outcome.results);
            }
        }

        Commands::Similar {
            docid,
            limit,
            cross_collection,
        } => {
            let opts = search::SimilarOptions {
                limit: limit.unwrap_or(config.retrieval.final_limit),
                threshold: config.retrieval.similar_threshold,
                cross_collection: *cross_collection,
            };
            let results = search::similar_documents(&store, &config, docid, opts).await?;
            if cli.json {
                print_json(&results);
            } else {
                print_results(&results);
            }
        }

        Commands::Get { id } => {
            if cli.json {
                let doc = get::get_document(&store, id).await?;
                print_json(&doc);
            } else {
                get::run_get(&store, id).await?;
            }
        }

        Commands::Links { docid } => {
            let doc = get::get_document(&store, docid).await?;
            if cli.json {
                print_json(&doc.links);
            } else if doc.links.is_empty() {
                println!("(no outgoing links)");
            } else {
                for link in &doc.links {
                    println!("-> {} ({:?})", link.target_ref, link.link_type);
                }
            }
        }

        Commands::Backlinks { docid } => {
            let doc = get::get_document(&store, docid).await?;
            if cli.json {
                print_json(&doc.backlinks);
            } else if doc.backlinks.is_empty() {
                println!("(no backlinks)");
            } else {
                for bl in &doc.backlinks {
                    println!("<- {} ({})", bl.source_uri, bl.link_text.as_deref().unwrap_or(""));
                }
            }
        }

        Commands::Serve { service } => match service {
            ServeService::Http => http::run_server(store, config, ports).await?,
            ServeService::Rpc => rpc::run_rpc(store, config, ports).await?,
        },
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

fn print_results(results: &[models::SearchResultItem]) {
    if results.is_empty() {
        println!("(no results)");
        return;
    }
    for r in results {
        println!("{:<10.4} {}  {}", r.score, r.docid, r.title.as_deref().unwrap_or("(untitled)"));
        println!("  {} | {}", r.collection, r.uri);
        if !r.snippet.is_empty() {
            println!("  {}", r.snippet);
        }
        println!();
    }
}
