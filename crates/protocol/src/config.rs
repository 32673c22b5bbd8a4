//! Folder configuration. Validation rejects non-positive sizes and
//! timeouts before they can cause division by zero or an unbounded
//! retry loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FolderConfig {
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,
    pub embedding_model: String,
    #[serde(default = "default_orphan_cleanup_interval_ms")]
    pub orphan_cleanup_interval_ms: u64,
    #[serde(default = "default_progress_throttle_ms")]
    pub progress_throttle_ms: u64,
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

fn default_max_concurrent_files() -> u32 {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_chunk_size() -> u32 {
    500
}
fn default_chunk_overlap() -> u32 {
    50
}
fn default_orphan_cleanup_interval_ms() -> u64 {
    3_600_000
}
fn default_progress_throttle_ms() -> u64 {
    1000
}
fn default_supported_extensions() -> Vec<String> {
    vec![
        "txt".into(),
        "md".into(),
        "pdf".into(),
        "docx".into(),
        "xlsx".into(),
        "pptx".into(),
    ]
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git".into(),
        "node_modules".into(),
        ".folder-mcp".into(),
        ".index-store".into(),
    ]
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: default_max_concurrent_files(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embedding_model: String::new(),
            orphan_cleanup_interval_ms: default_orphan_cleanup_interval_ms(),
            progress_throttle_ms: default_progress_throttle_ms(),
            supported_extensions: default_supported_extensions(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent_files must be positive")]
    MaxConcurrentFilesZero,
    #[error("max_retries overflows a retry-count counter")]
    MaxRetriesTooLarge,
    #[error("retry_delay_ms must be positive")]
    RetryDelayZero,
    #[error("chunk_size must be positive")]
    ChunkSizeZero,
    #[error("chunk_overlap must be smaller than chunk_size")]
    ChunkOverlapTooLarge,
    #[error("embedding_model must be set")]
    EmbeddingModelEmpty,
    #[error("orphan_cleanup_interval_ms must be positive")]
    OrphanCleanupIntervalZero,
    #[error("progress_throttle_ms must be positive")]
    ProgressThrottleZero,
}

impl FolderConfig {
    /// Rejects configurations that would divide by zero, overflow a
    /// backoff exponent, or never throttle progress events.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_files == 0 {
            return Err(ConfigError::MaxConcurrentFilesZero);
        }
        // 2^retry_count must not overflow a u64 backoff multiplier.
        if self.max_retries > 62 {
            return Err(ConfigError::MaxRetriesTooLarge);
        }
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::RetryDelayZero);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ChunkSizeZero);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::ChunkOverlapTooLarge);
        }
        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::EmbeddingModelEmpty);
        }
        if self.orphan_cleanup_interval_ms == 0 {
            return Err(ConfigError::OrphanCleanupIntervalZero);
        }
        if self.progress_throttle_ms == 0 {
            return Err(ConfigError::ProgressThrottleZero);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_once_model_is_set() {
        let mut cfg = FolderConfig::default();
        cfg.embedding_model = "local-minilm".into();
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn rejects_missing_embedding_model() {
        let cfg = FolderConfig::default();
        assert_eq!(cfg.validate(), Err(ConfigError::EmbeddingModelEmpty));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let mut cfg = FolderConfig::default();
        cfg.embedding_model = "m".into();
        cfg.chunk_overlap = cfg.chunk_size;
        assert_eq!(cfg.validate(), Err(ConfigError::ChunkOverlapTooLarge));
    }
}
