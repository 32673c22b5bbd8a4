//! Documents, chunks and embeddings persistence plus similarity
//! search. The "vector extension" is realized as a BLOB column
//! of little-endian `f32` bytes; similarity is brute-force cosine over
//! the folder's own embeddings, which is the scale this engine runs at.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, OptionalExtension};
use vault_protocol::{ChunkWithEmbedding, Document, NormalizedPath, SearchHit, VectorStoreStatistics};

use crate::connection::Db;
use crate::error::{Result, StoreError};

const DIMENSION_KEY: &str = "embedding_dimension";

#[derive(Clone)]
pub struct VectorStore {
    db: Db,
    case_sensitive: bool,
}

impl VectorStore {
    /// Wraps an already-open `Db`. Callers that also need a
    /// `FileStateStore` for the same folder should build both from one
    /// shared handle, e.g. via `crate::open_folder_stores`.
    pub fn new(db: Db, case_sensitive: bool) -> Self {
        Self { db, case_sensitive }
    }

    /// `loadOrInitialize`: open the database, creating schema if
    /// absent; never wipes existing rows.
    pub fn load_or_initialize(db_path: &Path) -> Result<Self> {
        Ok(Self::new(Db::open(db_path)?, true))
    }

    pub fn path(&self) -> &Path {
        self.db.path()
    }

    async fn recorded_dimension(&self) -> Result<Option<usize>> {
        self.db
            .run(|conn| {
                let value: Option<String> = conn
                    .query_row(
                        "SELECT value FROM folder_meta WHERE key = ?1",
                        params![DIMENSION_KEY],
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(StoreError::from_sqlite)?;
                Ok(value.and_then(|v| v.parse::<usize>().ok()))
            })
            .await
    }

    /// Rejects mismatched-dimension writes. Records the dimension on
    /// first write.
    async fn check_or_record_dimension(&self, dimension: usize) -> Result<()> {
        match self.recorded_dimension().await? {
            Some(existing) if existing != dimension => Err(StoreError::CountMismatch(format!(
                "embedding dimension mismatch: folder is {existing}, got {dimension}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.db
                    .run(move |conn| {
                        conn.execute(
                            "INSERT INTO folder_meta(key, value) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                            params![DIMENSION_KEY, dimension.to_string()],
                        )
                        .map_err(StoreError::from_sqlite)?;
                        Ok(())
                    })
                    .await
            }
        }
    }

    /// `addEmbeddings`: creates the Document row and all Chunk+Embedding
    /// rows in one transaction. `len(metadataList) == len(vectorList)`
    /// is enforced by the type (`ChunkWithEmbedding` pairs them), but a
    /// caller assembling the list from two separate sequences must have
    /// already zipped them; an empty dimension set is rejected too.
    pub async fn add_embeddings(
        &self,
        document: Document,
        chunks: Vec<ChunkWithEmbedding>,
    ) -> Result<()> {
        if let Some(first) = chunks.first() {
            let dim = first.embedding.len();
            if chunks.iter().any(|c| c.embedding.len() != dim) {
                return Err(StoreError::CountMismatch(
                    "embeddings in one batch have differing dimensions".into(),
                ));
            }
            self.check_or_record_dimension(dim).await?;
        }

        let case_sensitive = self.case_sensitive;
        self.db
            .transaction(move |conn| {
                let mtime_unix = document
                    .mtime
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                let embedding_bytes = document.embedding.as_ref().map(|v| serialize_vector(v));
                let keywords_json = document
                    .keywords
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(StoreError::from)?;

                conn.execute(
                    "INSERT INTO documents(path, size, mtime_unix, doc_type, embedding, keywords)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(path) DO UPDATE SET
                        size = excluded.size,
                        mtime_unix = excluded.mtime_unix,
                        doc_type = excluded.doc_type,
                        embedding = excluded.embedding,
                        keywords = excluded.keywords",
                    params![
                        path_key(&document.path, case_sensitive),
                        document.size as i64,
                        mtime_unix,
                        document.doc_type,
                        embedding_bytes,
                        keywords_json,
                    ],
                )
                .map_err(StoreError::from_sqlite)?;

                let mut insert_chunk = conn
                    .prepare(
                        "INSERT INTO chunks(chunk_id, document_path, ordinal, text, token_count)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(StoreError::from_sqlite)?;
                let mut insert_embedding = conn
                    .prepare(
                        "INSERT INTO embeddings(chunk_id, dimension, vector) VALUES (?1, ?2, ?3)",
                    )
                    .map_err(StoreError::from_sqlite)?;

                for cw in &chunks {
                    insert_chunk
                        .execute(params![
                            cw.chunk.chunk_id,
                            path_key(&document.path, case_sensitive),
                            cw.chunk.ordinal,
                            cw.chunk.text,
                            cw.chunk.token_count,
                        ])
                        .map_err(StoreError::from_sqlite)?;
                    insert_embedding
                        .execute(params![
                            cw.chunk.chunk_id,
                            cw.embedding.len() as i64,
                            serialize_vector(&cw.embedding),
                        ])
                        .map_err(StoreError::from_sqlite)?;
                }
                Ok(())
            })
            .await
    }

    /// `deleteDocument`: cascading delete of document, chunks,
    /// embeddings (foreign keys with `ON DELETE CASCADE`).
    pub async fn delete_document(&self, path: &Path) -> Result<()> {
        let key = path_key(path, self.case_sensitive);
        self.db
            .transaction(move |conn| {
                conn.execute("DELETE FROM documents WHERE path = ?1", params![key])
                    .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
    }

    /// `deleteDocumentsBatch`: single-transaction cascading delete; on
    /// failure, falls back to individual deletes with a small
    /// inter-delete delay to reduce lock contention.
    pub async fn delete_documents_batch(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = paths
            .iter()
            .map(|p| path_key(p, self.case_sensitive))
            .collect();
        let batch_result = self
            .db
            .transaction({
                let keys = keys.clone();
                move |conn| {
                    for key in &keys {
                        conn.execute("DELETE FROM documents WHERE path = ?1", params![key])
                            .map_err(StoreError::from_sqlite)?;
                    }
                    Ok(())
                }
            })
            .await;

        if batch_result.is_ok() {
            return Ok(());
        }
        log::warn!("batch orphan delete failed, falling back to individual deletes");
        for path in paths {
            if let Err(e) = self.delete_document(path).await {
                log::error!("individual delete failed for {}: {e}", path.display());
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// `updateDocumentSemantics`: optional per-document summary vector
    /// and keyword list. `processing_ms` is accepted for interface
    /// completeness (timing telemetry) but this store does not persist
    /// a per-document timing column.
    pub async fn update_document_semantics(
        &self,
        path: &Path,
        doc_embedding: Option<Vec<f32>>,
        keywords: Option<Vec<String>>,
        _processing_ms: u64,
    ) -> Result<()> {
        let key = path_key(path, self.case_sensitive);
        let embedding_bytes = doc_embedding.as_ref().map(|v| serialize_vector(v));
        let keywords_json = keywords
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(StoreError::from)?;
        self.db
            .run(move |conn| {
                conn.execute(
                    "UPDATE documents SET embedding = ?1, keywords = ?2 WHERE path = ?3",
                    params![embedding_bytes, keywords_json, key],
                )
                .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
    }

    /// `search`: cosine similarity over every stored chunk embedding,
    /// sorted descending, filtered by `threshold`, truncated to `k`.
    pub async fn search(&self, query: Vec<f32>, k: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        self.db
            .run(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT c.chunk_id, c.document_path, c.text, e.vector
                         FROM embeddings e JOIN chunks c ON c.chunk_id = e.chunk_id",
                    )
                    .map_err(StoreError::from_sqlite)?;
                let rows = stmt
                    .query_map([], |row| {
                        let chunk_id: String = row.get(0)?;
                        let document_path: String = row.get(1)?;
                        let text: String = row.get(2)?;
                        let bytes: Vec<u8> = row.get(3)?;
                        Ok((chunk_id, document_path, text, bytes))
                    })
                    .map_err(StoreError::from_sqlite)?;

                let mut hits: Vec<SearchHit> = Vec::new();
                for row in rows {
                    let (chunk_id, document_path, text, bytes) =
                        row.map_err(StoreError::from_sqlite)?;
                    let vector = deserialize_vector(&bytes);
                    let score = cosine_similarity(&query, &vector);
                    if score >= threshold {
                        hits.push(SearchHit {
                            chunk_id,
                            path: PathBuf::from(document_path),
                            score,
                            text,
                        });
                    }
                }
                hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                hits.truncate(k);
                Ok(hits)
            })
            .await
    }

    /// `allDocumentPaths`: for orphan detection. Paths come back exactly
    /// as stored (already key-normalized at write time).
    pub async fn all_document_paths(&self) -> Result<HashSet<PathBuf>> {
        self.db
            .run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT path FROM documents")
                    .map_err(StoreError::from_sqlite)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(StoreError::from_sqlite)?;
                let mut set = HashSet::new();
                for row in rows {
                    set.insert(PathBuf::from(row.map_err(StoreError::from_sqlite)?));
                }
                Ok(set)
            })
            .await
    }

    pub async fn stats(&self) -> Result<VectorStoreStatistics> {
        self.db
            .run(|conn| {
                let document_count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))
                    .map_err(StoreError::from_sqlite)?;
                let embedding_count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0))
                    .map_err(StoreError::from_sqlite)?;
                Ok(VectorStoreStatistics {
                    embedding_count: embedding_count as usize,
                    document_count: document_count as usize,
                })
            })
            .await
    }

    /// Releases the database connection. Required on Windows before the
    /// folder can be removed or re-opened elsewhere.
    pub fn close(self) {
        drop(self);
    }
}

fn path_key(path: &Path, case_sensitive: bool) -> String {
    NormalizedPath::new(path, case_sensitive).key().to_string()
}

fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[allow(dead_code)]
fn unix_now() -> SystemTime {
    SystemTime::now()
}
