//! Per-folder indexing lifecycle engine: scan for content changes,
//! queue indexing tasks under bounded concurrency, and drive a folder
//! from `pending` through `scanning`/`ready`/`indexing` to `active`.
//!
//! This crate owns the lifecycle logic only. Filesystem access,
//! parsing, chunking and embedding are injected capabilities
//! (`vault_protocol::capability`) supplied by the caller.

mod change_detector;
mod debounce;
mod error;
mod fingerprint;
mod orchestrator;
mod service;
mod state_machine;
mod task_queue;
mod watermark;

pub use change_detector::ChangeDetector;
pub use debounce::{DebounceConfig, DebounceState};
pub use error::{LifecycleError, Result};
pub use fingerprint::{fingerprint, fingerprint_file};
pub use orchestrator::{IndexingOrchestrator, OrchestratorOutcome};
pub use service::{Capabilities, FolderLifecycleService, HealthSnapshot};
pub use state_machine::{Event, LifecycleStateMachine};
pub use task_queue::{Outcome, TaskQueue, TaskQueueConfig};
pub use watermark::{assess_staleness, FilesystemWatermark, StaleAssessment, StaleReason};
