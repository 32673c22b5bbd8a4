//! Composes the change detector, task queue and orchestrator into one
//! per-folder service, emitting state/progress events as it runs.
//!
//! The scheduler is an explicit driver loop rather than a chain of
//! async combinators: check invariants, launch tasks up to the
//! concurrency cap, or sleep briefly. Cancellation is a boolean flag
//! checked between launches.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use vault_protocol::capability::FileEntry;
use vault_protocol::{
    Chunker, Embedder, FileSystem, Folder, FolderConfig, FolderEvent, FolderStatus, IgnoreRules,
    IndexStats, Logger, Parser, Progress, TaskId, TaskKind,
};
use vault_store::{FileStateStore, VectorStore};

use crate::change_detector::ChangeDetector;
use crate::error::{LifecycleError, Result};
use crate::orchestrator::{IndexingOrchestrator, OrchestratorOutcome};
use crate::state_machine::{Event as StateEvent, LifecycleStateMachine};
use crate::task_queue::{Outcome, TaskQueue, TaskQueueConfig};

/// Capabilities injected at construction time; shared, read-only.
pub struct Capabilities {
    pub file_system: Arc<dyn FileSystem>,
    pub ignore_rules: Arc<dyn IgnoreRules>,
    pub parser: Arc<dyn Parser>,
    pub chunker: Arc<dyn Chunker>,
    pub embedder: Arc<dyn Embedder>,
    pub logger: Arc<dyn Logger>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub last_success: Option<SystemTime>,
    pub last_error: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub last_run_duration: Option<Duration>,
    pub p95_duration_ms: Option<u64>,
}

struct Health {
    last_success: Option<SystemTime>,
    last_error: Option<SystemTime>,
    consecutive_failures: u32,
    last_run_duration: Option<Duration>,
    durations_ms: VecDeque<u64>,
}

impl Health {
    fn new() -> Self {
        Self {
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            last_run_duration: None,
            durations_ms: VecDeque::with_capacity(20),
        }
    }

    fn record_success(&mut self, duration: Duration) {
        self.last_success = Some(SystemTime::now());
        self.consecutive_failures = 0;
        self.last_run_duration = Some(duration);
        self.push_duration(duration.as_millis() as u64);
    }

    fn record_failure(&mut self, duration: Duration) {
        self.last_error = Some(SystemTime::now());
        self.consecutive_failures += 1;
        self.last_run_duration = Some(duration);
        self.push_duration(duration.as_millis() as u64);
    }

    fn push_duration(&mut self, ms: u64) {
        if self.durations_ms.len() >= 20 {
            self.durations_ms.pop_front();
        }
        self.durations_ms.push_back(ms);
    }

    fn p95(&self) -> Option<u64> {
        if self.durations_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.durations_ms.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (((sorted.len() - 1) as f64) * 0.95).round() as usize;
        sorted.get(idx).copied()
    }

    fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            last_success: self.last_success,
            last_error: self.last_error,
            consecutive_failures: self.consecutive_failures,
            last_run_duration: self.last_run_duration,
            p95_duration_ms: self.p95(),
        }
    }
}

/// Locks `queue`, recovering from a poisoned mutex the same way `Db`
/// recovers from a poisoned connection. `TaskQueue`'s own methods never
/// panic under normal operation, so poisoning here would only follow a
/// panic elsewhere while the lock was held.
fn lock_queue(queue: &std::sync::Mutex<TaskQueue>) -> std::sync::MutexGuard<'_, TaskQueue> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct FolderLifecycleService {
    folder: Folder,
    config: FolderConfig,
    capabilities: Capabilities,
    vector_store: VectorStore,
    file_state_store: FileStateStore,
    state_machine: Mutex<LifecycleStateMachine>,
    task_queue: Arc<std::sync::Mutex<TaskQueue>>,
    change_detector: Mutex<ChangeDetector>,
    health: Mutex<Health>,
    active: Arc<AtomicBool>,
    event_tx: broadcast::Sender<FolderEvent>,
    last_progress_emit: Mutex<Option<Instant>>,
}

impl FolderLifecycleService {
    pub fn new(
        folder: Folder,
        config: FolderConfig,
        capabilities: Capabilities,
        vector_store: VectorStore,
        file_state_store: FileStateStore,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let case_sensitive = folder.path_case_sensitive;
        Self {
            task_queue: Arc::new(std::sync::Mutex::new(TaskQueue::new(TaskQueueConfig {
                max_concurrent: config.max_concurrent_files,
                max_retries: config.max_retries,
                retry_delay_ms: config.retry_delay_ms,
            }))),
            change_detector: Mutex::new(ChangeDetector::new(
                Duration::from_millis(config.orphan_cleanup_interval_ms),
                case_sensitive,
            )),
            folder,
            config,
            capabilities,
            vector_store,
            file_state_store,
            state_machine: Mutex::new(LifecycleStateMachine::new()),
            health: Mutex::new(Health::new()),
            active: Arc::new(AtomicBool::new(true)),
            event_tx,
            last_progress_emit: Mutex::new(None),
        }
    }

    /// Opens one database at `db_path` and builds `VectorStore` and
    /// `FileStateStore` from the same handle before constructing the
    /// service, so the two tables always commit on one connection.
    pub fn open(
        folder: Folder,
        config: FolderConfig,
        capabilities: Capabilities,
        db_path: &Path,
    ) -> Result<Self> {
        let (vector_store, file_state_store) =
            vault_store::open_folder_stores(db_path, folder.path_case_sensitive)?;
        Ok(Self::new(folder, config, capabilities, vector_store, file_state_store))
    }

    pub fn folder(&self) -> &Folder {
        &self.folder
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FolderEvent> {
        self.event_tx.subscribe()
    }

    pub async fn status(&self) -> FolderStatus {
        self.state_machine.lock().await.state()
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.health.lock().await.snapshot()
    }

    fn emit(&self, event: FolderEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn transition(&self, event: StateEvent) -> Result<FolderStatus> {
        let next = self.state_machine.lock().await.apply(event)?;
        self.emit(FolderEvent::StateChange(next));
        Ok(next)
    }

    /// `startScanning()`: legal only from pending or active.
    pub async fn start_scanning(&self) -> Result<FolderStatus> {
        let current = self.status().await;
        if !matches!(current, FolderStatus::Pending | FolderStatus::Active) {
            return Err(LifecycleError::IllegalTransition {
                from: current,
                event: "start_scan",
            });
        }
        self.transition(StateEvent::StartScan).await?;

        let entries = self.scan_filtered_entries().await?;
        let on_disk_paths: Vec<PathBuf> = entries.iter().map(|e| e.path.clone()).collect();

        let changes = {
            let detector = self.change_detector.lock().await;
            detector
                .detect_changes(
                    self.capabilities.file_system.as_ref(),
                    &entries,
                    &self.file_state_store,
                    &self.vector_store,
                    self.config.max_retries,
                )
                .await?
        };

        {
            let mut detector = self.change_detector.lock().await;
            detector
                .cleanup_orphans(&on_disk_paths, &self.vector_store, &self.file_state_store)
                .await?;
        }

        let status = self.emit_scan_complete(&changes).await?;
        Ok(status)
    }

    async fn emit_scan_complete(
        &self,
        changes: &[vault_protocol::FileChange],
    ) -> Result<FolderStatus> {
        let status = if changes.is_empty() {
            if let Err(e) = self.validate_before_active().await {
                self.fault(&e.to_string()).await;
                return Err(e);
            }
            self.transition(StateEvent::NoChangesValidated).await?
        } else {
            let tasks: Vec<(PathBuf, TaskKind, u64)> = changes
                .iter()
                .map(|c| {
                    let kind = match c.kind {
                        vault_protocol::ChangeKind::Added => TaskKind::Create,
                        vault_protocol::ChangeKind::Modified => TaskKind::Update,
                        vault_protocol::ChangeKind::Removed => TaskKind::Remove,
                    };
                    (c.path.clone(), kind, c.size)
                })
                .collect();
            lock_queue(&self.task_queue).add(tasks);
            self.transition(StateEvent::ChangesDetected).await?
        };
        self.emit(FolderEvent::ScanComplete(status));
        Ok(status)
    }

    async fn scan_filtered_entries(&self) -> Result<Vec<FileEntry>> {
        self.capabilities
            .ignore_rules
            .load(&self.folder.root)
            .await?;
        let all = self
            .capabilities
            .file_system
            .scan(&self.folder.root)
            .await?;
        Ok(all
            .into_iter()
            .filter(|e| {
                !self
                    .capabilities
                    .ignore_rules
                    .should_ignore(&e.path, &self.folder.root)
            })
            .collect())
    }

    /// `startIndexing()`: legal only from ready; drains the queue
    /// respecting concurrency until all tasks reach a terminal state.
    pub async fn start_indexing(&self) -> Result<FolderStatus> {
        let current = self.status().await;
        if current != FolderStatus::Ready {
            return Err(LifecycleError::IllegalTransition {
                from: current,
                event: "start_indexing",
            });
        }
        self.transition(StateEvent::StartIndexing).await?;
        self.active.store(true, Ordering::SeqCst);

        let started_at = Instant::now();
        let run_result = self.drain_queue().await;

        match run_result {
            Ok(()) => {
                self.validate_before_active().await?;
                let status = self.transition(StateEvent::IndexingDone).await?;
                let stats = self.collect_stats().await?;
                self.emit(FolderEvent::IndexComplete(status, stats));
                self.health.lock().await.record_success(started_at.elapsed());
                Ok(status)
            }
            Err(e) => {
                self.health.lock().await.record_failure(started_at.elapsed());
                self.fault(&e.to_string()).await;
                Err(e)
            }
        }
    }

    /// The driver loop: keep up to `max_concurrent_files` pipelines in
    /// flight, harvesting whichever finishes first, until the queue is
    /// drained or cancellation is observed.
    async fn drain_queue(&self) -> Result<()> {
        let max_concurrent = lock_queue(&self.task_queue).config().max_concurrent as usize;
        let mut in_flight: JoinSet<(TaskId, PathBuf, OrchestratorOutcome)> = JoinSet::new();

        loop {
            if !self.active.load(Ordering::SeqCst) {
                self.drain_in_flight(&mut in_flight).await;
                return Ok(());
            }

            while in_flight.len() < max_concurrent {
                let next_task = { lock_queue(&self.task_queue).next() };
                let Some(task) = next_task else { break };

                let orchestrator = IndexingOrchestrator {
                    parser: self.capabilities.parser.clone(),
                    chunker: self.capabilities.chunker.clone(),
                    embedder: self.capabilities.embedder.clone(),
                    vector_store: self.vector_store.clone(),
                    file_state_store: self.file_state_store.clone(),
                    chunk_size: self.config.chunk_size,
                    chunk_overlap: self.config.chunk_overlap,
                };
                let task_id = task.id;
                let progress_queue = self.task_queue.clone();
                let on_progress = move |processed: usize, total: usize| {
                    lock_queue(&progress_queue).record_progress(
                        task_id,
                        processed as u32,
                        total as u32,
                    );
                };

                in_flight.spawn(async move {
                    let outcome = orchestrator
                        .process_file(&task.path, task.kind, task.file_size, on_progress)
                        .await;
                    (task_id, task.path, outcome)
                });
            }

            if in_flight.is_empty() {
                let drained = { lock_queue(&self.task_queue).is_drained() };
                if drained {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let Some(joined) = in_flight.join_next().await else {
                continue;
            };
            let (task_id, path, outcome) =
                joined.map_err(|e| LifecycleError::Other(format!("indexing task panicked: {e}")))?;

            match outcome {
                OrchestratorOutcome::Success { .. } => {
                    lock_queue(&self.task_queue).update_status(task_id, Outcome::Success);
                }
                OrchestratorOutcome::Retryable(message) => {
                    self.file_state_store.mark_failed(&path, &message).await?;
                    lock_queue(&self.task_queue)
                        .update_status(task_id, Outcome::Failure(message));
                }
                OrchestratorOutcome::Fatal(message) => {
                    self.drain_in_flight(&mut in_flight).await;
                    return Err(LifecycleError::Other(message));
                }
                OrchestratorOutcome::ModelLoadFailure(message) => {
                    self.drain_in_flight(&mut in_flight).await;
                    self.fail_fast_model_load(&message).await?;
                    return Err(LifecycleError::Embed(vault_protocol::EmbedError::Permanent(
                        message,
                    )));
                }
            }

            self.maybe_emit_progress().await;
        }
    }

    /// Waits out whatever pipelines are already in flight (cancellation
    /// lets started work finish rather than aborting it mid-write) and
    /// records their outcomes before the driver loop returns.
    async fn drain_in_flight(
        &self,
        in_flight: &mut JoinSet<(TaskId, PathBuf, OrchestratorOutcome)>,
    ) {
        while let Some(joined) = in_flight.join_next().await {
            let Ok((task_id, path, outcome)) = joined else {
                continue;
            };
            match outcome {
                OrchestratorOutcome::Success { .. } => {
                    lock_queue(&self.task_queue).update_status(task_id, Outcome::Success);
                }
                OrchestratorOutcome::Retryable(message) => {
                    let _ = self.file_state_store.mark_failed(&path, &message).await;
                    lock_queue(&self.task_queue)
                        .update_status(task_id, Outcome::Failure(message));
                }
                OrchestratorOutcome::Fatal(_) | OrchestratorOutcome::ModelLoadFailure(_) => {}
            }
        }
    }

    /// Fail-fast contract: clear the queue and mark every tracked file
    /// failed with reason "model loading failure".
    async fn fail_fast_model_load(&self, message: &str) -> Result<()> {
        self.capabilities
            .logger
            .error(&format!("model loading failure: {message}"));
        let paths: Vec<PathBuf> =
            { lock_queue(&self.task_queue).tasks().map(|t| t.path.clone()).collect() };
        for path in paths {
            self.file_state_store
                .mark_failed(&path, "model loading failure")
                .await?;
        }
        lock_queue(&self.task_queue).clear_all();
        Ok(())
    }

    async fn fault(&self, message: &str) {
        self.capabilities.logger.error(message);
        let _ = self.state_machine.lock().await.apply(StateEvent::Fault);
        self.emit(FolderEvent::Error(message.to_string()));
    }

    /// Validation before entering active: backend probe, and
    /// "embeddings present" if any file is tracked.
    async fn validate_before_active(&self) -> Result<()> {
        self.capabilities.embedder.probe().await?;

        let file_stats = self.file_state_store.stats().await?;
        if file_stats.total > 0 {
            let vector_stats = self.vector_store.stats().await?;
            if vector_stats.embedding_count == 0 {
                return Err(LifecycleError::NoEmbeddingsProduced);
            }
        }
        Ok(())
    }

    async fn collect_stats(&self) -> Result<IndexStats> {
        let vector_stats = self.vector_store.stats().await?;
        let file_stats = self.file_state_store.stats().await?;
        let failures = *file_stats.by_state.get("failed").unwrap_or(&0);
        Ok(IndexStats {
            documents: vector_stats.document_count,
            chunks: vector_stats.embedding_count,
            failures,
        })
    }

    /// `progress = Σ weight(file) · completion(file)`, capped at 99
    /// until `active`, throttled to `progressThrottleMs`.
    async fn maybe_emit_progress(&self) {
        let mut last = self.last_progress_emit.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < Duration::from_millis(self.config.progress_throttle_ms)
            {
                return;
            }
        }
        *last = Some(now);
        drop(last);

        let tasks: Vec<_> = { lock_queue(&self.task_queue).tasks().cloned().collect() };
        if tasks.is_empty() {
            return;
        }

        let total_size: u64 = tasks.iter().map(|t| t.file_size).sum();
        let fraction = if total_size > 0 {
            tasks
                .iter()
                .map(|t| (t.file_size as f64 / total_size as f64) * t.completion())
                .sum::<f64>()
        } else {
            let succeeded = tasks
                .iter()
                .filter(|t| t.state == vault_protocol::TaskState::Succeeded)
                .count() as f64;
            let in_progress = tasks
                .iter()
                .filter(|t| t.state == vault_protocol::TaskState::InProgress)
                .count() as f64;
            (succeeded + 0.5 * in_progress) / tasks.len() as f64
        };
        let percentage = ((fraction * 100.0).floor() as u8).min(99);
        self.emit(FolderEvent::Progress(Progress { fraction, percentage }));
    }

    /// Signals the driver loop to stop launching new tasks. Checked
    /// between launches, not mid-task: anything already in flight is
    /// allowed to finish and have its outcome recorded.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// `reset()`: returns to pending with an empty queue.
    pub async fn reset(&self) -> Result<FolderStatus> {
        lock_queue(&self.task_queue).clear_all();
        let status = self.transition(StateEvent::Reset).await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use vault_protocol::capability::{ChunkSpan, FileMetadata, ParsedFile, RawFsEvent};
    use vault_protocol::{EmbedError, ParseError, ProbeError, ReadError};

    struct FakeFs {
        files: StdMutex<HashMap<PathBuf, Vec<u8>>>,
    }

    impl FakeFs {
        fn new(files: Vec<(&str, &str)>) -> Self {
            Self {
                files: StdMutex::new(
                    files
                        .into_iter()
                        .map(|(p, c)| (PathBuf::from(p), c.as_bytes().to_vec()))
                        .collect(),
                ),
            }
        }

        fn put(&self, path: &str, content: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), content.as_bytes().to_vec());
        }

        fn remove(&self, path: &str) {
            self.files.lock().unwrap().remove(&PathBuf::from(path));
        }
    }

    #[async_trait]
    impl FileSystem for FakeFs {
        async fn scan(&self, _folder: &Path) -> std::result::Result<Vec<FileEntry>, ReadError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .map(|(path, bytes)| FileEntry {
                    path: path.clone(),
                    size: bytes.len() as u64,
                })
                .collect())
        }
        async fn metadata(&self, _path: &Path) -> std::result::Result<FileMetadata, ReadError> {
            unimplemented!()
        }
        async fn read(&self, path: &Path) -> std::result::Result<Vec<u8>, ReadError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ReadError::NotFound(path.display().to_string()))
        }
        async fn watch(
            &self,
            _folder: &Path,
        ) -> std::result::Result<tokio::sync::mpsc::Receiver<RawFsEvent>, ReadError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    struct NoIgnore;
    #[async_trait]
    impl IgnoreRules for NoIgnore {
        async fn load(&self, _folder: &Path) -> std::result::Result<(), ReadError> {
            Ok(())
        }
        fn should_ignore(&self, _path: &Path, _folder: &Path) -> bool {
            false
        }
    }

    struct EchoParser;
    #[async_trait]
    impl Parser for EchoParser {
        async fn parse(&self, path: &Path) -> std::result::Result<ParsedFile, ParseError> {
            Ok(ParsedFile {
                text: path.display().to_string(),
                doc_type: "text".into(),
            })
        }
    }

    struct WholeFileChunker;
    #[async_trait]
    impl Chunker for WholeFileChunker {
        async fn chunk(&self, text: &str, _chunk_size: u32, _overlap: u32) -> Vec<ChunkSpan> {
            vec![ChunkSpan {
                text: text.to_string(),
                token_count: 1,
                ordinal: 0,
            }]
        }
    }

    struct TrackingEmbedder {
        dimension: usize,
        concurrent: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl Embedder for TrackingEmbedder {
        async fn embed_batch(
            &self,
            texts: &[String],
            _on_progress: Option<&vault_protocol::capability::ChunkProgressCallback>,
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            let n = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(n, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0; self.dimension]).collect())
        }
        async fn embed_query(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Ok(vec![1.0; self.dimension])
        }
        async fn probe(&self) -> std::result::Result<(), ProbeError> {
            Ok(())
        }
        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    struct BrokenEmbedder;
    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed_batch(
            &self,
            _texts: &[String],
            _on_progress: Option<&vault_protocol::capability::ChunkProgressCallback>,
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Permanent("model missing".into()))
        }
        async fn embed_query(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Permanent("model missing".into()))
        }
        async fn probe(&self) -> std::result::Result<(), ProbeError> {
            Ok(())
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    fn test_config() -> FolderConfig {
        let mut cfg = FolderConfig::default();
        cfg.embedding_model = "test-model".into();
        cfg.orphan_cleanup_interval_ms = 1;
        cfg
    }

    fn test_folder(root: &Path) -> Folder {
        Folder {
            id: "f1".into(),
            root: root.to_path_buf(),
            embedding_model_id: "test-model".into(),
            path_case_sensitive: true,
        }
    }

    fn capabilities(fs: Arc<dyn FileSystem>, embedder: Arc<dyn Embedder>) -> Capabilities {
        Capabilities {
            file_system: fs,
            ignore_rules: Arc::new(NoIgnore),
            parser: Arc::new(EchoParser),
            chunker: Arc::new(WholeFileChunker),
            embedder,
            logger: Arc::new(vault_protocol::FacadeLogger),
        }
    }

    fn tracking_embedder() -> (Arc<dyn Embedder>, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let embedder: Arc<dyn Embedder> = Arc::new(TrackingEmbedder {
            dimension: 4,
            concurrent: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        });
        (embedder, peak)
    }

    #[tokio::test]
    async fn fresh_folder_indexes_then_goes_active() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> =
            Arc::new(FakeFs::new(vec![("a.txt", "hello"), ("b.txt", "world")]));
        let (embedder, _peak) = tracking_embedder();
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            test_config(),
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();

        assert_eq!(service.start_scanning().await.unwrap(), FolderStatus::Ready);
        assert_eq!(service.start_indexing().await.unwrap(), FolderStatus::Active);
        assert_eq!(service.status().await, FolderStatus::Active);

        let stats = service.vector_store.stats().await.unwrap();
        assert_eq!(stats.document_count, 2);
    }

    #[tokio::test]
    async fn unchanged_rescan_skips_straight_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(FakeFs::new(vec![("a.txt", "hello")]));
        let (embedder, _peak) = tracking_embedder();
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            test_config(),
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();
        service.start_scanning().await.unwrap();
        service.start_indexing().await.unwrap();
        service.reset().await.unwrap();

        assert_eq!(service.start_scanning().await.unwrap(), FolderStatus::Active);
    }

    #[tokio::test]
    async fn modified_file_is_reprocessed() {
        let dir = tempfile::tempdir().unwrap();
        let fs_impl = Arc::new(FakeFs::new(vec![("a.txt", "hello")]));
        let fs: Arc<dyn FileSystem> = fs_impl.clone();
        let (embedder, _peak) = tracking_embedder();
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            test_config(),
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();
        service.start_scanning().await.unwrap();
        service.start_indexing().await.unwrap();
        service.reset().await.unwrap();

        fs_impl.put("a.txt", "hello, updated");
        assert_eq!(service.start_scanning().await.unwrap(), FolderStatus::Ready);
        assert_eq!(service.start_indexing().await.unwrap(), FolderStatus::Active);
    }

    #[tokio::test]
    async fn orphaned_document_is_removed_on_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let fs_impl = Arc::new(FakeFs::new(vec![("a.txt", "hello"), ("b.txt", "world")]));
        let fs: Arc<dyn FileSystem> = fs_impl.clone();
        let (embedder, _peak) = tracking_embedder();
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            test_config(),
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();
        service.start_scanning().await.unwrap();
        service.start_indexing().await.unwrap();
        service.reset().await.unwrap();

        fs_impl.remove("b.txt");
        service.start_scanning().await.unwrap();

        let stats = service.vector_store.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
    }

    #[tokio::test]
    async fn model_unavailable_fails_fast_and_faults_folder() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> =
            Arc::new(FakeFs::new(vec![("a.txt", "hello"), ("b.txt", "world")]));
        let embedder: Arc<dyn Embedder> = Arc::new(BrokenEmbedder);
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            test_config(),
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();
        service.start_scanning().await.unwrap();
        let result = service.start_indexing().await;
        assert!(result.is_err());
        assert_eq!(service.status().await, FolderStatus::Error);
    }

    #[tokio::test]
    async fn zero_changes_probe_failure_faults_the_folder() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(FakeFs::new(vec![]));
        let embedder: Arc<dyn Embedder> = Arc::new(BrokenEmbedder);
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            test_config(),
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();

        let result = service.start_scanning().await;
        assert!(result.is_err());
        assert_eq!(service.status().await, FolderStatus::Error);
    }

    #[tokio::test]
    async fn concurrency_cap_runs_tasks_in_parallel_up_to_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(FakeFs::new(vec![
            ("f0.txt", "content"),
            ("f1.txt", "content"),
            ("f2.txt", "content"),
            ("f3.txt", "content"),
            ("f4.txt", "content"),
            ("f5.txt", "content"),
        ]));
        let (embedder, peak) = tracking_embedder();
        let mut cfg = test_config();
        cfg.max_concurrent_files = 2;
        let service = FolderLifecycleService::open(
            test_folder(dir.path()),
            cfg,
            capabilities(fs, embedder),
            &dir.path().join("store.db"),
        )
        .unwrap();

        service.start_scanning().await.unwrap();
        service.start_indexing().await.unwrap();

        assert!(
            peak.load(Ordering::SeqCst) >= 2,
            "expected at least 2 embed calls in flight at once, saw {}",
            peak.load(Ordering::SeqCst)
        );
    }
}
