//! Data model shared by the store and lifecycle crates.
//!
//! These types carry exactly the fields named for Folder, FileState,
//! Document, Chunk, Embedding and Task; nothing here is a dynamically
//! shaped bag of properties.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identifies a folder across its lifetime. Callers mint this when a
/// folder's configuration is loaded; it is opaque to the core.
pub type FolderId = String;

/// A folder under management: one service instance per folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub root: PathBuf,
    pub embedding_model_id: String,
    /// Recorded once at folder creation and never changed across runs
    /// (invariant 5): true on case-insensitive filesystems (Windows),
    /// false elsewhere.
    pub path_case_sensitive: bool,
}

impl Folder {
    pub fn normalize(&self, path: &Path) -> NormalizedPath {
        NormalizedPath::new(path, self.path_case_sensitive)
    }
}

/// A path compared under the folder's recorded case-sensitivity rule.
/// Two `NormalizedPath` values are `Eq`/`Hash`-equal exactly when
/// invariant 5 says the underlying paths denote the same file.
#[derive(Debug, Clone)]
pub struct NormalizedPath {
    original: PathBuf,
    key: String,
}

impl NormalizedPath {
    pub fn new(path: &Path, case_sensitive: bool) -> Self {
        let slashed = path.to_string_lossy().replace('\\', "/");
        let key = if case_sensitive {
            slashed
        } else {
            slashed.to_lowercase()
        };
        Self {
            original: path.to_path_buf(),
            key,
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.original
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for NormalizedPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for NormalizedPath {}

impl std::hash::Hash for NormalizedPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Per-file processing state, persisted by `FileStateStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileProcessingState {
    NeverSeen,
    Indexed,
    Failed,
    Skipped,
    InProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub path: PathBuf,
    pub content_hash: Option<String>,
    pub state: FileProcessingState,
    pub chunk_count: u32,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub first_seen_at: SystemTime,
    pub updated_at: SystemTime,
}

impl FileState {
    pub fn never_seen(path: PathBuf) -> Self {
        let now = SystemTime::now();
        Self {
            path,
            content_hash: None,
            state: FileProcessingState::NeverSeen,
            chunk_count: 0,
            attempt_count: 0,
            last_error: None,
            first_seen_at: now,
            updated_at: now,
        }
    }
}

/// One indexed file. Keyed by absolute file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: SystemTime,
    pub doc_type: String,
    pub embedding: Option<Vec<f32>>,
    pub keywords: Option<Vec<String>>,
}

/// A contiguous span of text from a document; the unit of embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_path: PathBuf,
    pub ordinal: u32,
    pub text: String,
    pub token_count: u32,
}

/// A fixed-dimension numeric vector representing a chunk.
pub type Embedding = Vec<f32>;

/// A chunk paired with the embedding the orchestrator computed for it,
/// the unit `VectorStore::add_embeddings` consumes.
#[derive(Debug, Clone)]
pub struct ChunkWithEmbedding {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// Closed kind of filesystem change driving a `Task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Create,
    Update,
    Remove,
}

/// Closed kind of `FileChange` emitted by the change detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub size: u64,
    pub hash: String,
}

/// The sum type a `FileStateStore::decide` call returns. Never a bare
/// bool plus a loose reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Process { reason: &'static str },
    Retry { reason: &'static str },
    Skip { reason: &'static str },
}

pub type TaskId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// Carries the epoch-millisecond deadline the scheduler should wait
    /// for before making the task pending again.
    RetryScheduled { at_epoch_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub path: PathBuf,
    pub kind: TaskKind,
    pub state: TaskState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub file_size: u64,
    pub processed_chunks: u32,
    pub total_chunks: u32,
}

impl Task {
    pub fn new(id: TaskId, path: PathBuf, kind: TaskKind, file_size: u64, max_retries: u32) -> Self {
        Self {
            id,
            path,
            kind,
            state: TaskState::Pending,
            retry_count: 0,
            max_retries,
            file_size,
            processed_chunks: 0,
            total_chunks: 0,
        }
    }

    pub fn completion(&self) -> f64 {
        match self.state {
            TaskState::Succeeded => 1.0,
            TaskState::InProgress if self.total_chunks > 0 => {
                f64::from(self.processed_chunks) / f64::from(self.total_chunks)
            }
            _ => 0.0,
        }
    }
}

/// Legal lifecycle states. `active -> pending` is reachable only
/// through an explicit reset, never a plain transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderStatus {
    Pending,
    Scanning,
    Ready,
    Indexing,
    Active,
    Error,
}

#[derive(Debug, Clone)]
pub struct TaskQueueStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct FileStateStatistics {
    pub total: usize,
    pub by_state: std::collections::HashMap<&'static str, usize>,
    pub efficiency: f64,
}

#[derive(Debug, Clone)]
pub struct VectorStoreStatistics {
    pub embedding_count: usize,
    pub document_count: usize,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub path: PathBuf,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub fraction: f64,
    pub percentage: u8,
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub failures: usize,
}

/// Tagged variant replacing an event-emitter: `FolderEvent` is the
/// payload a subscriber receives from `FolderLifecycleService`'s
/// broadcast channel.
#[derive(Debug, Clone)]
pub enum FolderEvent {
    StateChange(FolderStatus),
    Progress(Progress),
    ScanComplete(FolderStatus),
    IndexComplete(FolderStatus, IndexStats),
    Error(String),
}
