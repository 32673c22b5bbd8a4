//! Decide process/skip per file; orphan detection.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use vault_protocol::{
    capability::FileEntry, ChangeKind, Decision, FileChange, FileSystem, NormalizedPath,
};
use vault_store::{FileStateStore, VectorStore};

use crate::error::Result;
use crate::fingerprint;

pub struct ChangeDetector {
    orphan_cleanup_interval: Duration,
    last_orphan_cleanup: Option<Instant>,
    case_sensitive: bool,
}

impl ChangeDetector {
    pub fn new(orphan_cleanup_interval: Duration, case_sensitive: bool) -> Self {
        Self {
            orphan_cleanup_interval,
            last_orphan_cleanup: None,
            case_sensitive,
        }
    }

    /// Computes the set of `FileChange`s that should be processed from
    /// the extension/ignore-filtered list of on-disk entries.
    ///
    /// Per-file algorithm: hash, decide, and — as a global override —
    /// if the vector store holds zero embeddings while files exist,
    /// force every file to `process`.
    pub async fn detect_changes(
        &self,
        fs: &dyn FileSystem,
        entries: &[FileEntry],
        file_state_store: &FileStateStore,
        vector_store: &VectorStore,
        max_retries: u32,
    ) -> Result<Vec<FileChange>> {
        let force_full = !entries.is_empty() && vector_store.stats().await?.embedding_count == 0;

        let mut changes = Vec::new();
        for entry in entries {
            let (hash, size) = match fingerprint::fingerprint_file(fs, &entry.path).await {
                Ok(pair) => pair,
                Err(_) => {
                    file_state_store
                        .mark_skipped(&entry.path, "", "unreadable")
                        .await?;
                    continue;
                }
            };

            let decision = if force_full {
                Decision::Process {
                    reason: "No embeddings — full reprocess",
                }
            } else {
                file_state_store.decide(&entry.path, &hash, max_retries).await?
            };

            match decision {
                Decision::Process { .. } | Decision::Retry { .. } => {
                    let kind = if matches!(decision, Decision::Retry { .. }) {
                        ChangeKind::Modified
                    } else {
                        classify_kind(file_state_store, &entry.path).await
                    };
                    file_state_store.start_processing(&entry.path, &hash).await?;
                    changes.push(FileChange {
                        path: entry.path.clone(),
                        kind,
                        size,
                        hash,
                    });
                }
                Decision::Skip { reason } => {
                    file_state_store.mark_skipped(&entry.path, &hash, reason).await?;
                }
            }
        }
        Ok(changes)
    }

    /// Orphan detection: runs at most once per `orphan_cleanup_interval`.
    /// Returns the paths removed, or `None` if the interval has not
    /// elapsed yet.
    pub async fn cleanup_orphans(
        &mut self,
        on_disk_paths: &[PathBuf],
        vector_store: &VectorStore,
        file_state_store: &FileStateStore,
    ) -> Result<Option<Vec<PathBuf>>> {
        let due = match self.last_orphan_cleanup {
            None => true,
            Some(last) => last.elapsed() >= self.orphan_cleanup_interval,
        };
        if !due {
            return Ok(None);
        }

        let stored = vector_store.all_document_paths().await?;
        let on_disk_keys: std::collections::HashSet<String> = on_disk_paths
            .iter()
            .map(|p| NormalizedPath::new(p, self.case_sensitive).key().to_string())
            .collect();
        let orphans: Vec<PathBuf> = stored
            .into_iter()
            .filter(|p| !on_disk_keys.contains(NormalizedPath::new(p, self.case_sensitive).key()))
            .collect();

        if !orphans.is_empty() {
            vector_store.delete_documents_batch(&orphans).await?;
            for path in &orphans {
                file_state_store
                    .mark_skipped(path, "", "orphaned: file no longer on disk")
                    .await?;
            }
        }
        self.last_orphan_cleanup = Some(Instant::now());
        Ok(Some(orphans))
    }
}

async fn classify_kind(file_state_store: &FileStateStore, path: &Path) -> ChangeKind {
    match file_state_store.decide(path, "__kind_probe__", 0).await {
        Ok(Decision::Process { reason: "new" }) => ChangeKind::Added,
        _ => ChangeKind::Modified,
    }
}
