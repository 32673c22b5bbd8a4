//! Persistent per-file processing state and decisions.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, OptionalExtension};
use vault_protocol::{Decision, FileProcessingState, FileStateStatistics, NormalizedPath};

use crate::connection::Db;
use crate::error::{Result, StoreError};

#[derive(Clone)]
pub struct FileStateStore {
    db: Db,
    case_sensitive: bool,
}

struct StoredRow {
    content_hash: Option<String>,
    state: FileProcessingState,
    attempt_count: u32,
}

impl FileStateStore {
    /// Wraps an already-open `Db`. Pass the same `Db` (cloned) used to
    /// build the folder's `VectorStore` so both tables commit under one
    /// connection — see `crate::open_folder_stores`.
    pub fn new(db: Db, case_sensitive: bool) -> Self {
        Self { db, case_sensitive }
    }

    async fn fetch(&self, path: &Path) -> Result<Option<StoredRow>> {
        let key = path_key(path, self.case_sensitive);
        self.db
            .run(move |conn| {
                conn.query_row(
                    "SELECT content_hash, state, attempt_count FROM file_states WHERE path = ?1",
                    params![key],
                    |row| {
                        let hash: Option<String> = row.get(0)?;
                        let state_str: String = row.get(1)?;
                        let attempts: i64 = row.get(2)?;
                        Ok(StoredRow {
                            content_hash: hash,
                            state: parse_state(&state_str),
                            attempt_count: attempts as u32,
                        })
                    },
                )
                .optional()
                .map_err(StoreError::from_sqlite)
            })
            .await
    }

    /// `decide(path, currentHash)`: the rules are applied in order —
    /// new, modified, retry-eligible failure, unchanged skip, else skip
    /// with the recorded reason.
    pub async fn decide(&self, path: &Path, current_hash: &str, max_retries: u32) -> Result<Decision> {
        let existing = self.fetch(path).await?;
        let decision = match existing {
            None => Decision::Process { reason: "new" },
            Some(row) => {
                if row.content_hash.as_deref() != Some(current_hash) {
                    Decision::Process { reason: "modified" }
                } else if row.state == FileProcessingState::Failed && row.attempt_count < max_retries {
                    Decision::Retry { reason: "retrying failed file" }
                } else if row.state == FileProcessingState::Indexed {
                    Decision::Skip { reason: "unchanged" }
                } else {
                    Decision::Skip { reason: "attempts exhausted" }
                }
            }
        };
        Ok(decision)
    }

    /// `startProcessing`: records an attempt and sets state=in-progress.
    pub async fn start_processing(&self, path: &Path, hash: &str) -> Result<()> {
        let key = path_key(path, self.case_sensitive);
        let hash = hash.to_string();
        let now = now_ms();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO file_states(path, content_hash, state, attempt_count, first_seen_ms, updated_ms)
                     VALUES (?1, ?2, 'in-progress', 1, ?3, ?3)
                     ON CONFLICT(path) DO UPDATE SET
                        content_hash = excluded.content_hash,
                        state = 'in-progress',
                        attempt_count = attempt_count + 1,
                        updated_ms = excluded.updated_ms",
                    params![key, hash, now],
                )
                .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
    }

    /// `markSuccess`: state=indexed.
    pub async fn mark_success(&self, path: &Path, chunk_count: u32) -> Result<()> {
        let key = path_key(path, self.case_sensitive);
        let now = now_ms();
        self.db
            .run(move |conn| {
                conn.execute(
                    "UPDATE file_states SET state = 'indexed', chunk_count = ?2, last_error = NULL, updated_ms = ?3
                     WHERE path = ?1",
                    params![key, chunk_count, now],
                )
                .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
    }

    pub async fn mark_skipped(&self, path: &Path, hash: &str, reason: &str) -> Result<()> {
        let key = path_key(path, self.case_sensitive);
        let hash = hash.to_string();
        let reason = reason.to_string();
        let now = now_ms();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO file_states(path, content_hash, state, last_error, first_seen_ms, updated_ms)
                     VALUES (?1, ?2, 'skipped', ?3, ?4, ?4)
                     ON CONFLICT(path) DO UPDATE SET
                        content_hash = excluded.content_hash,
                        state = 'skipped',
                        last_error = excluded.last_error,
                        updated_ms = excluded.updated_ms",
                    params![key, hash, reason, now],
                )
                .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
    }

    /// `markFailed`: increments attempts.
    pub async fn mark_failed(&self, path: &Path, error_message: &str) -> Result<()> {
        let key = path_key(path, self.case_sensitive);
        let message = error_message.to_string();
        let now = now_ms();
        self.db
            .run(move |conn| {
                conn.execute(
                    "UPDATE file_states SET state = 'failed', last_error = ?2, attempt_count = attempt_count + 1, updated_ms = ?3
                     WHERE path = ?1",
                    params![key, message, now],
                )
                .map_err(StoreError::from_sqlite)?;
                Ok(())
            })
            .await
    }

    pub async fn stats(&self) -> Result<FileStateStatistics> {
        self.db
            .run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT state, COUNT(*) FROM file_states GROUP BY state")
                    .map_err(StoreError::from_sqlite)?;
                let rows = stmt
                    .query_map([], |row| {
                        let state: String = row.get(0)?;
                        let count: i64 = row.get(1)?;
                        Ok((state, count as usize))
                    })
                    .map_err(StoreError::from_sqlite)?;
                let mut by_state: HashMap<&'static str, usize> = HashMap::new();
                let mut total = 0usize;
                let mut skipped = 0usize;
                for row in rows {
                    let (state, count) = row.map_err(StoreError::from_sqlite)?;
                    total += count;
                    if state == "skipped" {
                        skipped = count;
                    }
                    let key = static_state_label(&state);
                    *by_state.entry(key).or_insert(0) += count;
                }
                let efficiency = if total == 0 {
                    0.0
                } else {
                    skipped as f64 / total as f64
                };
                Ok(FileStateStatistics {
                    total,
                    by_state,
                    efficiency,
                })
            })
            .await
    }
}

fn static_state_label(state: &str) -> &'static str {
    match state {
        "indexed" => "indexed",
        "failed" => "failed",
        "skipped" => "skipped",
        "in-progress" => "in-progress",
        _ => "never-seen",
    }
}

fn parse_state(s: &str) -> FileProcessingState {
    match s {
        "indexed" => FileProcessingState::Indexed,
        "failed" => FileProcessingState::Failed,
        "skipped" => FileProcessingState::Skipped,
        "in-progress" => FileProcessingState::InProgress,
        _ => FileProcessingState::NeverSeen,
    }
}

fn path_key(path: &Path, case_sensitive: bool) -> String {
    NormalizedPath::new(path, case_sensitive).key().to_string()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Db;
    use pretty_assertions::assert_eq;

    async fn store() -> (tempfile::TempDir, FileStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(&dir.path().join("store.db")).unwrap();
        (dir, FileStateStore::new(db, true))
    }

    #[tokio::test]
    async fn decides_process_for_new_file() {
        let (_dir, store) = store().await;
        let decision = store.decide(Path::new("a.txt"), "h1", 3).await.unwrap();
        assert_eq!(decision, Decision::Process { reason: "new" });
    }

    #[tokio::test]
    async fn decides_skip_for_unchanged_indexed_file() {
        let (_dir, store) = store().await;
        store.start_processing(Path::new("a.txt"), "h1").await.unwrap();
        store.mark_success(Path::new("a.txt"), 3).await.unwrap();
        let decision = store.decide(Path::new("a.txt"), "h1", 3).await.unwrap();
        assert_eq!(decision, Decision::Skip { reason: "unchanged" });
    }

    #[tokio::test]
    async fn decides_process_for_modified_file() {
        let (_dir, store) = store().await;
        store.start_processing(Path::new("a.txt"), "h1").await.unwrap();
        store.mark_success(Path::new("a.txt"), 3).await.unwrap();
        let decision = store.decide(Path::new("a.txt"), "h2", 3).await.unwrap();
        assert_eq!(decision, Decision::Process { reason: "modified" });
    }

    #[tokio::test]
    async fn decides_retry_below_attempt_cap_else_skip() {
        let (_dir, store) = store().await;
        store.start_processing(Path::new("a.txt"), "h1").await.unwrap();
        store.mark_failed(Path::new("a.txt"), "boom").await.unwrap();
        let decision = store.decide(Path::new("a.txt"), "h1", 3).await.unwrap();
        assert_eq!(decision, Decision::Retry { reason: "retrying failed file" });

        // Exhaust attempts (start_processing increments attempt_count each call).
        for _ in 0..3 {
            store.start_processing(Path::new("a.txt"), "h1").await.unwrap();
            store.mark_failed(Path::new("a.txt"), "boom").await.unwrap();
        }
        let decision = store.decide(Path::new("a.txt"), "h1", 3).await.unwrap();
        assert_eq!(decision, Decision::Skip { reason: "attempts exhausted" });
    }
}
