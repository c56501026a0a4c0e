//! CLI argument definitions.
//!
//! Subcommands mirror spec §6.3 exactly: `status`, `doctor`, `update`,
//! `reset`, `collection add/remove`, `embed`, `search`, `query`, `ask`,
//! `similar`, `links`, `backlinks`. `--json`/`--md` are global output
//! switches the way the teacher's `--config` is a global flag.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "gno",
    about = "gnosis — a local-first personal knowledge indexer",
    version
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/gno.toml")]
    pub config: PathBuf,

    /// Emit machine-readable JSON instead of a human summary
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit a Markdown-formatted summary
    #[arg(long, global = true)]
    pub md: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print index status: per-collection counts, embedding backlog, health
    Status,

    /// Run diagnostic health checks (database, tokenizer, vector mirror, collection roots)
    Doctor,

    /// Scan and ingest one or all registered collections
    Update {
        /// Limit to a single collection by name; all collections if omitted
        collection: Option<String>,
    },

    /// Drop and recreate the database schema
    Reset {
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Manage registered collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Backfill or rebuild vector embeddings
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Lexical (BM25) search
    Search {
        query: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Hybrid (lexical + semantic) search
    Query {
        query: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        no_expand: bool,
        #[arg(long)]
        no_rerank: bool,
    },

    /// Grounded-answer generation over hybrid search results
    Ask {
        question: String,
        #[arg(long)]
        collection: Option<String>,
    },

    /// Find documents similar to a given document
    Similar {
        docid: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        cross_collection: bool,
    },

    /// Retrieve a document by docid or uri
    Get { id: String },

    /// List outgoing links for a document
    Links { docid: String },

    /// List incoming links (backlinks) for a document
    Backlinks { docid: String },

    /// Start a long-running server
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
pub enum ServeService {
    /// Loopback-only HTTP API
    Http,
    /// JSON-RPC tool server over stdio
    Rpc,
}

#[derive(Subcommand)]
pub enum CollectionAction {
    /// Register a new collection root
    Add {
        name: String,
        path: PathBuf,
        #[arg(long, default_value = "**/*")]
        pattern: String,
    },
    /// Remove a registered collection (fails if still referenced by a context)
    Remove { name: String },
}

#[derive(Subcommand)]
pub enum EmbedAction {
    /// Embed chunks that are missing a vector for the active model
    Pending {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete and regenerate all embeddings for the active model
    Rebuild,
}
