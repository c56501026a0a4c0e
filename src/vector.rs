//! Per-model vector index overlaid on the canonical `content_vectors` blob
//! table.
//!
//! `content_vectors` is always fully writable: every embedding is written
//! there first, inside the document's transaction. A kNN-friendly mirror
//! table named `vec_<hash8(model)>` is best-effort — if it can't be
//! created or written, the index downgrades to `search_available = false`
//! while the canonical table keeps accumulating vectors, so a later
//! `rebuild_vec_index` can always recover.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::errors::EngineError;

/// Deterministic mirror table name for a given model URI/identifier.
pub fn mirror_table_name(model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("vec_{}", &hash[..8])
}

pub struct VectorIndex {
    pool: SqlitePool,
    model: String,
    dims: usize,
    table: String,
    search_available: bool,
}

impl VectorIndex {
    /// Construct the index for `(model, dims)`, attempting to create its
    /// mirror table. Never fails: a failed mirror just sets
    /// `search_available = false`.
    pub async fn open(pool: SqlitePool, model: &str, dims: usize) -> Self {
        let table = mirror_table_name(model);
        let search_available = Self::ensure_mirror_table(&pool, &table, dims).await.is_ok();
        Self {
            pool,
            model: model.to_string(),
            dims,
            table,
            search_available,
        }
    }

    pub fn search_available(&self) -> bool {
        self.search_available
    }

    async fn ensure_mirror_table(
        pool: &SqlitePool,
        table: &str,
        _dims: usize,
    ) -> Result<(), EngineError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                mirror_hash TEXT NOT NULL,
                seq INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (mirror_hash, seq)
            )"
        );
        sqlx::query(&ddl)
            .execute(pool)
            .await
            .map_err(|e| EngineError::ExtensionLoadFailed(e.to_string()))?;
        Ok(())
    }

    /// Write rows to the canonical table (fatal on failure), then
    /// best-effort mirror them (logged, not fatal).
    pub async fn upsert_vectors(
        &self,
        rows: &[(String, i64, Vec<f32>)],
    ) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::VectorWriteFailed(e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        for (mirror_hash, seq, embedding) in rows {
            let blob = encode_embedding(embedding);
            sqlx::query(
                "INSERT INTO content_vectors (mirror_hash, seq, model, dims, embedding, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(mirror_hash, seq, model) DO UPDATE SET embedding = excluded.embedding",
            )
            .bind(mirror_hash)
            .bind(seq)
            .bind(&self.model)
            .bind(self.dims as i64)
            .bind(&blob)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::VectorWriteFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::VectorWriteFailed(e.to_string()))?;

        if self.search_available {
            for (mirror_hash, seq, embedding) in rows {
                let blob = encode_embedding(embedding);
                let sql = format!(
                    "INSERT INTO {} (mirror_hash, seq, embedding) VALUES (?, ?, ?)
                     ON CONFLICT(mirror_hash, seq) DO UPDATE SET embedding = excluded.embedding",
                    self.table
                );
                if let Err(e) = sqlx::query(&sql)
                    .bind(mirror_hash)
                    .bind(seq)
                    .bind(&blob)
                    .execute(&self.pool)
                    .await
                {
                    tracing::warn!(error = %e, table = %self.table, "vector mirror write failed, leaving canonical table authoritative");
                }
            }
        }

        Ok(())
    }

    pub async fn delete_vectors_for_mirror(&self, mirror_hash: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM content_vectors WHERE mirror_hash = ? AND model = ?")
            .bind(mirror_hash)
            .bind(&self.model)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::VectorDeleteFailed(e.to_string()))?;

        if self.search_available {
            let sql = format!("DELETE FROM {} WHERE mirror_hash = ?", self.table);
            if let Err(e) = sqlx::query(&sql)
                .bind(mirror_hash)
                .execute(&self.pool)
                .await
            {
                tracing::warn!(error = %e, "vector mirror delete failed");
            }
        }

        Ok(())
    }

    /// Brute-force cosine nearest-neighbor search over the mirror table.
    pub async fn search_nearest(
        &self,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<(String, i64, f64)>, EngineError> {
        if !self.search_available {
            return Err(EngineError::VecSearchUnavailable(format!(
                "mirror table {} is unavailable",
                self.table
            )));
        }

        let sql = format!("SELECT mirror_hash, seq, embedding FROM {}", self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::VecSearchFailed(e.to_string()))?;

        let mut scored: Vec<(String, i64, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mirror_hash: String = row.get("mirror_hash");
            let seq: i64 = row.get("seq");
            let blob: Vec<u8> = row.get("embedding");
            let Ok(vec) = decode_embedding(&blob) else {
                continue;
            };
            let sim = cosine_similarity(query, &vec);
            if let Some(min) = min_score {
                if sim < min {
                    continue;
                }
            }
            let distance = 1.0 - sim as f64;
            scored.push((mirror_hash, seq, distance));
        }

        scored.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub async fn rebuild_vec_index(&self) -> Result<(), EngineError> {
        let drop_sql = format!("DROP TABLE IF EXISTS {}", self.table);
        sqlx::query(&drop_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::VecRebuildFailed(e.to_string()))?;
        Self::ensure_mirror_table(&self.pool, &self.table, self.dims)
            .await
            .map_err(|e| EngineError::VecRebuildFailed(e.to_string()))?;

        let rows = sqlx::query(
            "SELECT mirror_hash, seq, embedding FROM content_vectors WHERE model = ?",
        )
        .bind(&self.model)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::VecRebuildFailed(e.to_string()))?;

        let insert_sql = format!(
            "INSERT INTO {} (mirror_hash, seq, embedding) VALUES (?, ?, ?)",
            self.table
        );
        for row in rows {
            let mirror_hash: String = row.get("mirror_hash");
            let seq: i64 = row.get("seq");
            let blob: Vec<u8> = row.get("embedding");
            sqlx::query(&insert_sql)
                .bind(mirror_hash)
                .bind(seq)
                .bind(blob)
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::VecRebuildFailed(e.to_string()))?;
        }

        Ok(())
    }

    /// Add missing mirror rows and prune orphans; returns `(added, removed)`.
    pub async fn sync_vec_index(&self) -> Result<(i64, i64), EngineError> {
        if !self.search_available {
            return Err(EngineError::VecSyncFailed("mirror table unavailable".into()));
        }

        let missing_sql = format!(
            "SELECT cv.mirror_hash, cv.seq, cv.embedding FROM content_vectors cv
             LEFT JOIN {table} m ON m.mirror_hash = cv.mirror_hash AND m.seq = cv.seq
             WHERE cv.model = ? AND m.mirror_hash IS NULL",
            table = self.table
        );
        let missing = sqlx::query(&missing_sql)
            .bind(&self.model)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::VecSyncFailed(e.to_string()))?;

        let insert_sql = format!(
            "INSERT INTO {} (mirror_hash, seq, embedding) VALUES (?, ?, ?)",
            self.table
        );
        for row in &missing {
            let mirror_hash: String = row.get("mirror_hash");
            let seq: i64 = row.get("seq");
            let blob: Vec<u8> = row.get("embedding");
            sqlx::query(&insert_sql)
                .bind(mirror_hash)
                .bind(seq)
                .bind(blob)
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::VecSyncFailed(e.to_string()))?;
        }

        let orphans_sql = format!(
            "SELECT m.mirror_hash, m.seq FROM {table} m
             LEFT JOIN content_vectors cv ON cv.mirror_hash = m.mirror_hash AND cv.seq = m.seq AND cv.model = ?
             WHERE cv.mirror_hash IS NULL",
            table = self.table
        );
        let orphans = sqlx::query(&orphans_sql)
            .bind(&self.model)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::VecSyncFailed(e.to_string()))?;

        let delete_sql = format!(
            "DELETE FROM {} WHERE mirror_hash = ? AND seq = ?",
            self.table
        );
        for row in &orphans {
            let mirror_hash: String = row.get("mirror_hash");
            let seq: i64 = row.get("seq");
            sqlx::query(&delete_sql)
                .bind(mirror_hash)
                .bind(seq)
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::VecSyncFailed(e.to_string()))?;
        }

        Ok((missing.len() as i64, orphans.len() as i64))
    }
}

/// Encode a float vector to a 4-byte-aligned little-endian blob, copying
/// out of the caller's buffer to avoid aliasing it.
pub fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a blob into a float vector. Fails if the length is not a
/// multiple of 4.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, EngineError> {
    if blob.len() % 4 != 0 {
        return Err(EngineError::Runtime(format!(
            "embedding blob length {} is not 4-byte aligned",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vec.to_vec();
    }
    vec.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let v = vec![1.0f32, -2.5, 0.0, 3.25];
        let blob = encode_embedding(&v);
        let decoded = decode_embedding(&blob).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn decode_rejects_misaligned_blob() {
        let blob = vec![0u8, 1, 2];
        assert!(decode_embedding(&blob).is_err());
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn mirror_table_name_is_deterministic_and_stable_width() {
        let a = mirror_table_name("openai:text-embedding-3-small");
        let b = mirror_table_name("openai:text-embedding-3-small");
        assert_eq!(a, b);
        assert_eq!(a.len(), "vec_".len() + 8);
    }
}
