//! Supplemented feature: a lightweight aggregate watermark that lets
//! `startScanning()` short-circuit to `active` without hashing every
//! file when nothing on disk has changed. This is an optimization on
//! top of, never a replacement for, the per-file content hash compare
//! in `ChangeDetector` — it only decides whether that per-file pass is
//! worth running at all.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesystemWatermark {
    pub file_count: u64,
    pub max_mtime_ms: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    WatermarkMissing,
    FilesystemChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleAssessment {
    pub stale: bool,
    pub reasons: Vec<StaleReason>,
}

/// Pure function: compares the previously recorded watermark against
/// the freshly computed one.
#[must_use]
pub fn assess_staleness(
    current: &FilesystemWatermark,
    previous: Option<&FilesystemWatermark>,
) -> StaleAssessment {
    let mut reasons = Vec::new();
    match previous {
        None => reasons.push(StaleReason::WatermarkMissing),
        Some(prev) if prev != current => reasons.push(StaleReason::FilesystemChanged),
        Some(_) => {}
    }
    StaleAssessment {
        stale: !reasons.is_empty(),
        reasons,
    }
}
