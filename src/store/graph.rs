//! Bounded knowledge-graph projection.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::errors::EngineError;
use crate::vector::{cosine_similarity, decode_embedding, mirror_table_name};

const SIMILARITY_NODE_BUDGET: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: i64,
    pub docid: String,
    pub uri: String,
    pub title: Option<String>,
    pub collection: String,
    pub degree: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: i64,
    pub target: i64,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphMeta {
    pub total_nodes: i64,
    pub total_edges: i64,
    pub truncated: bool,
    pub similar_available: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphEdge>,
    pub meta: GraphMeta,
}

pub struct GraphOptions<'a> {
    pub collection: Option<&'a str>,
    pub limit_nodes: i64,
    pub linked_only: bool,
    pub include_similar: bool,
    pub similar_top_k: usize,
    pub similarity_threshold: f32,
    pub active_model: Option<&'a str>,
}

struct RawDoc {
    id: i64,
    docid: String,
    uri: String,
    title: Option<String>,
    collection: String,
    rel_path: String,
}

pub async fn get_graph(pool: &SqlitePool, opts: GraphOptions<'_>) -> Result<Graph, EngineError> {
    let mut warnings = Vec::new();

    let docs_sql = if opts.collection.is_some() {
        "SELECT id, docid, uri, title, collection, rel_path FROM documents WHERE active = 1 AND collection = ?"
    } else {
        "SELECT id, docid, uri, title, collection, rel_path FROM documents WHERE active = 1"
    };
    let mut q = sqlx::query(docs_sql);
    if let Some(c) = opts.collection {
        q = q.bind(c);
    }
    let rows = q.fetch_all(pool).await?;

    let docs: HashMap<i64, RawDoc> = rows
        .into_iter()
        .map(|r| {
            let doc = RawDoc {
                id: r.get("id"),
                docid: r.get("docid"),
                uri: r.get("uri"),
                title: r.get("title"),
                collection: r.get("collection"),
                rel_path: r.get("rel_path"),
            };
            (doc.id, doc)
        })
        .collect();

    let link_rows = sqlx::query(
        "SELECT l.source_doc_id, l.target_ref_norm, l.target_collection, l.link_type
         FROM links l JOIN documents d ON d.id = l.source_doc_id
         WHERE d.active = 1",
    )
    .fetch_all(pool)
    .await?;

    // Resolve every link to a target doc id using the same variant-matching
    // idea as backlink resolution: exact rel_path / title / path-suffix.
    let mut edge_weight: HashMap<(i64, i64, &'static str), i64> = HashMap::new();
    let mut neighbors: HashMap<i64, HashSet<i64>> = HashMap::new();

    for row in &link_rows {
        let source_id: i64 = row.get("source_doc_id");
        let target_norm: String = row.get("target_ref_norm");
        let target_collection: Option<String> = row.get("target_collection");
        let link_type: String = row.get("link_type");

        let Some(source_doc) = docs.get(&source_id) else {
            continue;
        };
        let collection = target_collection.as_deref().unwrap_or(&source_doc.collection);

        let Some(target_id) = resolve_target_in_collection(&docs, collection, &target_norm) else {
            continue;
        };
        if target_id == source_id {
            continue;
        }

        let edge_type: &'static str = if link_type == "wiki" { "wiki" } else { "markdown" };
        *edge_weight.entry((source_id, target_id, edge_type)).or_insert(0) += 1;
        neighbors.entry(source_id).or_default().insert(target_id);
        neighbors.entry(target_id).or_default().insert(source_id);
    }

    let mut node_list: Vec<(&RawDoc, i64)> = docs
        .values()
        .map(|d| {
            let degree = neighbors.get(&d.id).map(|s| s.len()).unwrap_or(0) as i64;
            (d, degree)
        })
        .collect();

    node_list.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));

    if opts.linked_only {
        node_list.retain(|(_, degree)| *degree > 0);
    }

    let total_nodes = node_list.len() as i64;
    let truncated_nodes = node_list.len() as i64 > opts.limit_nodes;
    node_list.truncate(opts.limit_nodes.max(0) as usize);

    let selected: HashSet<i64> = node_list.iter().map(|(d, _)| d.id).collect();

    let nodes: Vec<GraphNode> = node_list
        .iter()
        .map(|(d, degree)| GraphNode {
            id: d.id,
            docid: d.docid.clone(),
            uri: d.uri.clone(),
            title: d.title.clone(),
            collection: d.collection.clone(),
            degree: *degree,
        })
        .collect();

    let mut links: Vec<GraphEdge> = edge_weight
        .into_iter()
        .filter(|((s, t, _), _)| selected.contains(s) && selected.contains(t))
        .map(|((s, t, ty), weight)| GraphEdge {
            source: s,
            target: t,
            edge_type: ty.to_string(),
            weight: weight as f64,
        })
        .collect();

    let mut similar_available = false;
    if opts.include_similar {
        match opts.active_model {
            Some(model) => {
                match add_similarity_edges(
                    pool,
                    model,
                    &docs,
                    &selected,
                    opts.similar_top_k,
                    opts.similarity_threshold,
                )
                .await
                {
                    Ok(mut sim_edges) => {
                        similar_available = true;
                        links.append(&mut sim_edges);
                    }
                    Err(e) => {
                        warnings.push(format!("similarity edges unavailable: {e}"));
                    }
                }
            }
            None => warnings.push("no active embedding model; similarity edges skipped".into()),
        }
    }

    let total_edges = links.len() as i64;

    Ok(Graph {
        nodes,
        links,
        meta: GraphMeta {
            total_nodes,
            total_edges,
            truncated: truncated_nodes,
            similar_available,
            warnings,
        },
    })
}

fn resolve_target_in_collection(
    docs: &HashMap<i64, RawDoc>,
    collection: &str,
    target_norm: &str,
) -> Option<i64> {
    let in_collection: Vec<&RawDoc> = docs.values().filter(|d| d.collection == collection).collect();

    if let Some(d) = in_collection.iter().find(|d| {
        d.title.as_deref().map(crate::id::normalize_wiki_name).as_deref() == Some(target_norm)
    }) {
        return Some(d.id);
    }
    if let Some(d) = in_collection
        .iter()
        .find(|d| crate::id::normalize_wiki_name(&d.rel_path) == target_norm)
    {
        return Some(d.id);
    }
    if let Some(d) = in_collection.iter().find(|d| {
        let base = d.rel_path.rsplit('/').next().unwrap_or(&d.rel_path);
        crate::id::normalize_wiki_name(base) == target_norm
    }) {
        return Some(d.id);
    }
    in_collection
        .into_iter()
        .filter(|d| crate::id::normalize_wiki_name(&d.rel_path).ends_with(target_norm))
        .min_by_key(|d| d.id)
        .map(|d| d.id)
}

async fn add_similarity_edges(
    pool: &SqlitePool,
    model: &str,
    docs: &HashMap<i64, RawDoc>,
    selected: &HashSet<i64>,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<GraphEdge>, EngineError> {
    let table = mirror_table_name(model);

    let mut budgeted: Vec<i64> = selected.iter().copied().collect();
    budgeted.truncate(SIMILARITY_NODE_BUDGET);

    // Fetch each selected node's seq-0 embedding via its document's mirror_hash.
    let mut embeddings: HashMap<i64, Vec<f32>> = HashMap::new();
    for &id in &budgeted {
        let Some(doc_mirror) = sqlx::query("SELECT mirror_hash FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
        else {
            continue;
        };
        let mirror_hash: String = doc_mirror.get("mirror_hash");
        let sql = format!("SELECT embedding FROM {table} WHERE mirror_hash = ? AND seq = 0");
        let Some(row) = sqlx::query(&sql)
            .bind(&mirror_hash)
            .fetch_optional(pool)
            .await
            .map_err(|e| EngineError::VecSearchFailed(e.to_string()))?
        else {
            continue;
        };
        let blob: Vec<u8> = row.get("embedding");
        if let Ok(vec) = decode_embedding(&blob) {
            embeddings.insert(id, vec);
        }
    }

    let mut edges = Vec::new();
    let ids: Vec<i64> = embeddings.keys().copied().collect();
    for (i, &a) in ids.iter().enumerate() {
        let mut scored: Vec<(i64, f32)> = Vec::new();
        for &b in ids.iter().skip(i + 1) {
            let sim = cosine_similarity(&embeddings[&a], &embeddings[&b]);
            if sim >= threshold {
                scored.push((b, sim));
            }
        }
        scored.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        for (b, sim) in scored {
            let (source, target) = if a <= b { (a, b) } else { (b, a) };
            edges.push(GraphEdge {
                source,
                target,
                edge_type: "similar".to_string(),
                weight: sim.clamp(0.0, 1.0) as f64,
            });
        }
    }

    let _ = docs;
    edges.sort_by(|a, b| a.source.cmp(&b.source).then(a.target.cmp(&b.target)));
    edges.dedup_by(|a, b| a.source == b.source && a.target == b.target);
    Ok(edges)
}
