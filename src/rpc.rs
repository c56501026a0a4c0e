//! JSON-RPC 2.0 tool server over stdio.
//!
//! One JSON object per line on stdin, one JSON-RPC response per line on
//! stdout — the transport AI tool runners (editors, agents) expect from a
//! local MCP-style tool process, without depending on a full MCP SDK.
//!
//! Read tools (`search`, `query`, `ask`, `get_document`, `similar_documents`,
//! `list_links`, `list_backlinks`, `list_collections`, `status`) are always
//! exposed. Write tools — `doc_capture`, `collection_add_collection`,
//! `collection_sync`, `collection_remove_collection` — are only registered
//! when the `GNO_RPC_ALLOW_WRITES` environment variable is set to `1`;
//! calling one while writes are disabled returns a `METHOD_NOT_FOUND`
//! error identical to an unknown method, so a caller can't probe for the
//! flag's state. `doc_capture` additionally rejects any `rel_path` that
//! traverses outside the target collection's root or enters a reserved
//! directory (see [`crate::scan::safe_join`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config_mutex::ConfigMutex;
use crate::errors::EngineError;
use crate::models::Collection;
use crate::ports::LlmPorts;
use crate::store::StoreEngine;

const WRITES_ENV_VAR: &str = "GNO_RPC_ALLOW_WRITES";

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

fn writes_enabled() -> bool {
    std::env::var(WRITES_ENV_VAR).as_deref() == Ok("1")
}

/// Runs the tool server until stdin closes.
pub async fn run_rpc(store: StoreEngine, config: crate::config::Config, ports: LlmPorts) -> Result<(), EngineError> {
    let config_path = std::env::var("GNO_CONFIG_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("./config/gno.toml"));

    let store = Arc::new(store);
    let config_mutex = Arc::new(ConfigMutex::new(config_path, config));
    let ports = Arc::new(ports);

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.map_err(EngineError::from)? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) => dispatch(&store, &config_mutex, &ports, req).await,
            Err(e) => json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": -32700, "message": format!("parse error: {e}") }
            }),
        };
        let mut out = serde_json::to_string(&response).unwrap_or_default();
        out.push('\n');
        stdout.write_all(out.as_bytes()).await.map_err(EngineError::from)?;
        stdout.flush().await.map_err(EngineError::from)?;
    }

    Ok(())
}

async fn dispatch(store: &Arc<StoreEngine>, config_mutex: &Arc<ConfigMutex>, ports: &Arc<LlmPorts>, req: RpcRequest) -> Value {
    let is_write = matches!(
        req.method.as_str(),
        "doc_capture" | "collection_add_collection" | "collection_sync" | "collection_remove_collection"
    );
    if is_write && !writes_enabled() {
        return rpc_error(req.id, -32601, format!("method not found: {}", req.method));
    }

    let result = match req.method.as_str() {
        "search" => call_search(store, config_mutex, ports, req.params, crate::search::SearchMode::Lexical).await,
        "query" => call_search(store, config_mutex, ports, req.params, crate::search::SearchMode::Hybrid).await,
        "ask" => call_ask(store, config_mutex, ports, req.params).await,
        "get_document" => call_get_document(store, req.params).await,
        "similar_documents" => call_similar(store, config_mutex, req.params).await,
        "list_links" => call_list_links(store, req.params).await,
        "list_backlinks" => call_list_backlinks(store, req.params).await,
        "list_collections" => call_list_collections(config_mutex).await,
        "status" => call_status(store, config_mutex).await,
        "doc_capture" => call_doc_capture(store, config_mutex, ports, req.params).await,
        "collection_add_collection" => call_add_collection(store, config_mutex, req.params).await,
        "collection_sync" => call_sync(store, config_mutex, ports, req.params).await,
        "collection_remove_collection" => call_remove_collection(store, config_mutex, req.params).await,
        other => Err(EngineError::NotFound(format!("unknown method: {other}"))),
    };

    match result {
        Ok(value) => json!({ "jsonrpc": "2.0", "id": req.id, "result": value }),
        Err(e) => rpc_error(req.id, engine_error_code(&e), e.to_string()),
    }
}

fn rpc_error(id: Value, code: i32, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": RpcError { code, message } })
}

fn engine_error_code(e: &EngineError) -> i32 {
    match e {
        EngineError::NotFound(_) => -32601,
        EngineError::Validation(_) | EngineError::InvalidInput(_) | EngineError::InvalidPath(_) => -32602,
        _ => -32000,
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    collection: Option<String>,
    limit: Option<i64>,
    #[serde(default)]
    no_expand: bool,
    #[serde(default)]
    no_rerank: bool,
}

async fn call_search(
    store: &StoreEngine,
    config_mutex: &ConfigMutex,
    ports: &LlmPorts,
    params: Value,
    mode: crate::search::SearchMode,
) -> Result<Value, EngineError> {
    let p: SearchParams = parse_params(params)?;
    let config = config_mutex.current().await;
    let opts = crate::search::SearchOptions {
        collection: p.collection.as_deref(),
        tags_all: &[],
        tags_any: &[],
        limit: p.limit.unwrap_or(config.retrieval.final_limit),
        no_expand: p.no_expand || config.retrieval.no_expand,
        no_rerank: p.no_rerank || config.retrieval.no_rerank,
    };
    let outcome = crate::search::search(store, &config, ports, &p.query, mode, opts).await?;
    Ok(serde_json::to_value(outcome).unwrap_or_default())
}

#[derive(Deserialize)]
struct AskParams {
    question: String,
    #[serde(default)]
    collection: Option<String>,
}

async fn call_ask(store: &StoreEngine, config_mutex: &ConfigMutex, ports: &LlmPorts, params: Value) -> Result<Value, EngineError> {
    let p: AskParams = parse_params(params)?;
    let config = config_mutex.current().await;
    let opts = crate::search::SearchOptions {
        collection: p.collection.as_deref(),
        tags_all: &[],
        tags_any: &[],
        limit: config.retrieval.final_limit,
        no_expand: config.retrieval.no_expand,
        no_rerank: config.retrieval.no_rerank,
    };
    let outcome = crate::search::ask(store, &config, ports, &p.question, opts).await?;
    Ok(serde_json::to_value(outcome).unwrap_or_default())
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

async fn call_get_document(store: &StoreEngine, params: Value) -> Result<Value, EngineError> {
    let p: IdParams = parse_params(params)?;
    let doc = crate::get::get_document(store, &p.id).await?;
    Ok(serde_json::to_value(doc).unwrap_or_default())
}

#[derive(Deserialize)]
struct SimilarParams {
    id: String,
    limit: Option<i64>,
    #[serde(default)]
    cross_collection: bool,
}

async fn call_similar(store: &StoreEngine, config_mutex: &ConfigMutex, params: Value) -> Result<Value, EngineError> {
    let p: SimilarParams = parse_params(params)?;
    let config = config_mutex.current().await;
    let opts = crate::search::SimilarOptions {
        limit: p.limit.unwrap_or(config.retrieval.final_limit),
        threshold: config.retrieval.similar_threshold,
        cross_collection: p.cross_collection,
    };
    let results = crate::search::similar_documents(store, &config, &p.id, opts).await?;
    Ok(serde_json::to_value(results).unwrap_or_default())
}

async fn call_list_links(store: &StoreEngine, params: Value) -> Result<Value, EngineError> {
    let p: IdParams = parse_params(params)?;
    let doc = crate::get::get_document(store, &p.id).await?;
    Ok(serde_json::to_value(doc.links).unwrap_or_default())
}

async fn call_list_backlinks(store: &StoreEngine, params: Value) -> Result<Value, EngineError> {
    let p: IdParams = parse_params(params)?;
    let doc = crate::get::get_document(store, &p.id).await?;
    Ok(serde_json::to_value(doc.backlinks).unwrap_or_default())
}

async fn call_list_collections(config_mutex: &ConfigMutex) -> Result<Value, EngineError> {
    let config = config_mutex.current().await;
    Ok(serde_json::to_value(&config.collections).unwrap_or_default())
}

async fn call_status(store: &StoreEngine, config_mutex: &ConfigMutex) -> Result<Value, EngineError> {
    let config = config_mutex.current().await;
    let status = store.get_status(config.embedding.model.as_deref()).await?;
    Ok(serde_json::to_value(status).unwrap_or_default())
}

#[derive(Deserialize)]
struct CaptureParams {
    collection: String,
    rel_path: String,
    body: String,
}

async fn call_doc_capture(
    store: &StoreEngine,
    config_mutex: &ConfigMutex,
    ports: &LlmPorts,
    params: Value,
) -> Result<Value, EngineError> {
    let p: CaptureParams = parse_params(params)?;
    let config = config_mutex.current().await;
    let collection = config
        .collections
        .iter()
        .find(|c| c.name == p.collection)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("collection '{}' not registered", p.collection)))?;

    let target = crate::scan::safe_join(&collection.path, &p.rel_path)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, p.body.as_bytes())?;

    let summary = crate::ingest::run_ingest(store, &config, &collection, ports, None).await?;
    Ok(serde_json::to_value(summary).unwrap_or_default())
}

#[derive(Deserialize)]
struct AddCollectionParams {
    name: String,
    path: std::path::PathBuf,
    #[serde(default = "default_pattern")]
    pattern: String,
}

fn default_pattern() -> String {
    "**/*".to_string()
}

async fn call_add_collection(store: &StoreEngine, config_mutex: &ConfigMutex, params: Value) -> Result<Value, EngineError> {
    let p: AddCollectionParams = parse_params(params)?;
    let name = p.name.clone();
    config_mutex
        .mutate(store, move |mut c| {
            if c.collections.iter().any(|existing| existing.name == p.name) {
                return Err(EngineError::Conflict(format!("collection '{}' already exists", p.name)));
            }
            c.collections.push(Collection {
                name: p.name,
                path: p.path,
                pattern: p.pattern,
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
    Ok(json!({ "name": name, "added": true }))
}

#[derive(Deserialize, Default)]
struct SyncParams {
    collection: Option<String>,
}

async fn call_sync(store: &StoreEngine, config_mutex: &ConfigMutex, ports: &LlmPorts, params: Value) -> Result<Value, EngineError> {
    let p: SyncParams = parse_params(params)?;
    let config = config_mutex.current().await;
    let targets: Vec<&Collection> = config
        .collections
        .iter()
        .filter(|c| p.collection.as_deref().is_none_or(|name| c.name == name))
        .collect();
    if targets.is_empty() {
        return Err(EngineError::NotFound(match p.collection {
            Some(name) => format!("collection '{name}' is not registered"),
            None => "no collections registered".to_string(),
        }));
    }
    let mut summaries = Vec::new();
    for collection in targets {
        summaries.push(crate::ingest::run_ingest(store, &config, collection, ports, None).await?);
    }
    Ok(serde_json::to_value(summaries).unwrap_or_default())
}

#[derive(Deserialize)]
struct RemoveCollectionParams {
    name: String,
}

async fn call_remove_collection(store: &StoreEngine, config_mutex: &ConfigMutex, params: Value) -> Result<Value, EngineError> {
    let p: RemoveCollectionParams = parse_params(params)?;
    let name = p.name.clone();
    config_mutex
        .mutate(store, move |mut c| {
            let before = c.collections.len();
            c.collections.retain(|existing| existing.name != p.name);
            if c.collections.len() == before {
                return Err(EngineError::NotFound(format!("collection '{}' not found", p.name)));
            }
            Ok(c)
        })
        .await?;
    store.remove_collection(&name).await?;
    Ok(json!({ "name": name, "removed": true }))
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, EngineError> {
    serde_json::from_value(params).map_err(|e| EngineError::InvalidInput(format!("bad params: {e}")))
}
