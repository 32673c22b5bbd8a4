//! Injected capabilities. The core depends only on these traits;
//! concrete parsers, chunkers and embedding backends are supplied by
//! callers and never linked into this crate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{EmbedError, ParseError, ProbeError, ReadError};

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub mtime: std::time::SystemTime,
}

/// Raw filesystem change, as observed by the watch capability, before
/// the change detector has decided anything about it.
#[derive(Debug, Clone)]
pub struct RawFsEvent {
    pub path: PathBuf,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn scan(&self, folder: &Path) -> Result<Vec<FileEntry>, ReadError>;
    async fn metadata(&self, path: &Path) -> Result<FileMetadata, ReadError>;
    async fn read(&self, path: &Path) -> Result<Vec<u8>, ReadError>;
    /// Subscribes to raw change notifications under `folder`. Returns a
    /// receiver the caller polls; dropping it unsubscribes.
    async fn watch(
        &self,
        folder: &Path,
    ) -> Result<tokio::sync::mpsc::Receiver<RawFsEvent>, ReadError>;
}

#[async_trait]
pub trait IgnoreRules: Send + Sync {
    async fn load(&self, folder: &Path) -> Result<(), ReadError>;
    fn should_ignore(&self, path: &Path, folder: &Path) -> bool;
}

pub struct ParsedFile {
    pub text: String,
    pub doc_type: String,
}

#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<ParsedFile, ParseError>;
}

#[derive(Debug, Clone)]
pub struct ChunkSpan {
    pub text: String,
    pub token_count: u32,
    pub ordinal: u32,
}

#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, text: &str, chunk_size: u32, overlap: u32) -> Vec<ChunkSpan>;
}

/// Invoked as an embedding batch progresses, with `(processed, total)`.
pub type ChunkProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(
        &self,
        texts: &[String],
        on_progress: Option<&ChunkProgressCallback>,
    ) -> Result<Vec<Vec<f32>>, EmbedError>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    /// Cheap reachability probe, bounded by the caller's own timeout
    /// (1-2s local, 2s network).
    async fn probe(&self) -> Result<(), ProbeError>;
    fn dimension(&self) -> usize;
}

pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// A `Logger` that forwards to the `log` facade, for callers who do not
/// need a bespoke sink.
pub struct FacadeLogger;

impl Logger for FacadeLogger {
    fn debug(&self, message: &str) {
        log::debug!("{message}");
    }
    fn info(&self, message: &str) {
        log::info!("{message}");
    }
    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }
    fn error(&self, message: &str) {
        log::error!("{message}");
    }
}
