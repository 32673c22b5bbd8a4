//! Per-file pipeline — parse, chunk, embed, store.

use std::path::Path;
use std::sync::Arc;

use vault_protocol::{
    Chunk, ChunkWithEmbedding, Chunker, Document, EmbedError, Embedder, Parser, TaskKind,
};
use vault_store::{FileStateStore, StoreError, VectorStore};

use crate::error::LifecycleError;

pub enum OrchestratorOutcome {
    Success { chunk_count: u32 },
    /// A per-task, retryable failure (`ReadError`/`ParseError`/
    /// `EmbeddingTransient`/`DatabaseTransient`).
    Retryable(String),
    /// A non-recoverable backend error: the caller must clear the queue
    /// and fault the folder.
    ModelLoadFailure(String),
    /// `DatabaseFatal`/`DataIntegrity`: fatal for the whole folder, not
    /// just this task.
    Fatal(String),
}

/// Owns its capabilities and stores by value (cheap `Arc`/`Db` clones)
/// so one can be built per task and moved into a spawned future.
pub struct IndexingOrchestrator {
    pub parser: Arc<dyn Parser>,
    pub chunker: Arc<dyn Chunker>,
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: VectorStore,
    pub file_state_store: FileStateStore,
    pub chunk_size: u32,
    pub chunk_overlap: u32,
}

impl IndexingOrchestrator {
    /// Runs the full pipeline for one file. `on_progress` is invoked
    /// with `(processed, total)` chunks as embedding proceeds.
    pub async fn process_file(
        &self,
        path: &Path,
        kind: TaskKind,
        size: u64,
        on_progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> OrchestratorOutcome {
        match self.try_process_file(path, kind, size, on_progress).await {
            Ok(chunk_count) => OrchestratorOutcome::Success { chunk_count },
            Err(LifecycleError::Embed(EmbedError::Permanent(msg))) => {
                OrchestratorOutcome::ModelLoadFailure(msg)
            }
            Err(LifecycleError::Store(StoreError::Integrity(msg)))
            | Err(LifecycleError::Store(StoreError::CountMismatch(msg))) => {
                OrchestratorOutcome::Fatal(msg)
            }
            Err(e) => OrchestratorOutcome::Retryable(e.to_string()),
        }
    }

    async fn try_process_file(
        &self,
        path: &Path,
        kind: TaskKind,
        size: u64,
        on_progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Result<u32, LifecycleError> {
        // 1. UPDATE is delete-then-insert; the delete happens before the
        //    new content is parsed so a crash before the insert leaves
        //    "missing", never "both versions present".
        if kind == TaskKind::Update {
            self.vector_store.delete_document(path).await?;
        }

        // 2. Parse.
        let parsed = self
            .parser
            .parse(path)
            .await
            .map_err(|e| LifecycleError::Other(e.to_string()))?;

        // 3. Chunk.
        let spans = self
            .chunker
            .chunk(&parsed.text, self.chunk_size, self.chunk_overlap)
            .await;
        if spans.is_empty() {
            self.file_state_store.mark_success(path, 0).await?;
            return Ok(0);
        }

        // 4. Embed, with progress callback.
        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let total = texts.len();
        let callback: vault_protocol::capability::ChunkProgressCallback =
            Box::new(move |processed, total| on_progress(processed, total));
        let embeddings = self.embedder.embed_batch(&texts, Some(&callback)).await?;

        // 5. `len(embeddings) == len(chunkMetadata)` or fatal.
        if embeddings.len() != spans.len() {
            return Err(LifecycleError::Store(StoreError::CountMismatch(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                spans.len()
            ))));
        }
        debug_assert_eq!(total, spans.len());

        let chunks_with_embeddings: Vec<ChunkWithEmbedding> = spans
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (span, embedding))| ChunkWithEmbedding {
                chunk: Chunk {
                    chunk_id: format!("{}:{i}", path.display()),
                    document_path: path.to_path_buf(),
                    ordinal: span.ordinal,
                    text: span.text,
                    token_count: span.token_count,
                },
                embedding,
            })
            .collect();
        let chunk_count = chunks_with_embeddings.len() as u32;

        // 6. Store transactionally.
        let document = Document {
            path: path.to_path_buf(),
            size,
            mtime: std::time::SystemTime::now(),
            doc_type: parsed.doc_type,
            embedding: None,
            keywords: None,
        };
        self.vector_store
            .add_embeddings(document, chunks_with_embeddings)
            .await?;

        // 8. FileStateStore.markSuccess.
        self.file_state_store.mark_success(path, chunk_count).await?;
        Ok(chunk_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vault_protocol::capability::{ChunkSpan, ParsedFile};
    use vault_protocol::{ParseError, ProbeError};

    struct FixedParser;
    #[async_trait]
    impl Parser for FixedParser {
        async fn parse(&self, _path: &Path) -> Result<ParsedFile, ParseError> {
            Ok(ParsedFile {
                text: "hello world, this is a test document".into(),
                doc_type: "text".into(),
            })
        }
    }

    struct WordChunker;
    #[async_trait]
    impl Chunker for WordChunker {
        async fn chunk(&self, text: &str, _chunk_size: u32, _overlap: u32) -> Vec<ChunkSpan> {
            text.split_whitespace()
                .enumerate()
                .map(|(i, w)| ChunkSpan {
                    text: w.to_string(),
                    token_count: 1,
                    ordinal: i as u32,
                })
                .collect()
        }
    }

    struct FixedEmbedder {
        dimension: usize,
    }
    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_batch(
            &self,
            texts: &[String],
            on_progress: Option<&vault_protocol::capability::ChunkProgressCallback>,
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut out = Vec::new();
            for (i, _) in texts.iter().enumerate() {
                if let Some(cb) = on_progress {
                    cb(i + 1, texts.len());
                }
                out.push(vec![1.0; self.dimension]);
            }
            Ok(out)
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![1.0; self.dimension])
        }
        async fn probe(&self) -> Result<(), ProbeError> {
            Ok(())
        }
        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    struct PermanentlyBrokenEmbedder;
    #[async_trait]
    impl Embedder for PermanentlyBrokenEmbedder {
        async fn embed_batch(
            &self,
            _texts: &[String],
            _on_progress: Option<&vault_protocol::capability::ChunkProgressCallback>,
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Permanent("model missing".into()))
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Permanent("model missing".into()))
        }
        async fn probe(&self) -> Result<(), ProbeError> {
            Ok(())
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn successful_pipeline_stores_matching_chunk_and_embedding_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (vector_store, file_state_store) =
            vault_store::open_folder_stores(&dir.path().join("s.db"), true).unwrap();

        let orchestrator = IndexingOrchestrator {
            parser: Arc::new(FixedParser),
            chunker: Arc::new(WordChunker),
            embedder: Arc::new(FixedEmbedder { dimension: 4 }),
            vector_store: vector_store.clone(),
            file_state_store: file_state_store.clone(),
            chunk_size: 500,
            chunk_overlap: 50,
        };

        let outcome = orchestrator
            .process_file(Path::new("a.txt"), TaskKind::Create, 10, |_, _| {})
            .await;
        let chunk_count = match outcome {
            OrchestratorOutcome::Success { chunk_count } => chunk_count,
            _ => panic!("expected success"),
        };
        assert_eq!(chunk_count, 6);
        let stats = vector_store.stats().await.unwrap();
        assert_eq!(stats.embedding_count, 6);
    }

    #[tokio::test]
    async fn permanent_embedder_failure_is_reported_as_model_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (vector_store, file_state_store) =
            vault_store::open_folder_stores(&dir.path().join("s.db"), true).unwrap();

        let orchestrator = IndexingOrchestrator {
            parser: Arc::new(FixedParser),
            chunker: Arc::new(WordChunker),
            embedder: Arc::new(PermanentlyBrokenEmbedder),
            vector_store,
            file_state_store,
            chunk_size: 500,
            chunk_overlap: 50,
        };

        let outcome = orchestrator
            .process_file(Path::new("a.txt"), TaskKind::Create, 10, |_, _| {})
            .await;
        assert!(matches!(outcome, OrchestratorOutcome::ModelLoadFailure(_)));
    }
}
