//! Legal transitions between folder statuses. A pure function of its
//! current state; no I/O.

use vault_protocol::FolderStatus;

use crate::error::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    StartScan,
    ChangesDetected,
    NoChangesValidated,
    StartIndexing,
    IndexingDone,
    Fault,
    Reset,
}

pub struct LifecycleStateMachine {
    state: FolderStatus,
}

impl LifecycleStateMachine {
    pub fn new() -> Self {
        Self {
            state: FolderStatus::Pending,
        }
    }

    pub fn state(&self) -> FolderStatus {
        self.state
    }

    /// Applies `event`, returning the new state or `IllegalTransition`
    /// if `event` is not legal from the current state.
    pub fn apply(&mut self, event: Event) -> Result<FolderStatus, LifecycleError> {
        use Event::*;
        use FolderStatus::*;

        let next = match (self.state, event) {
            (Pending, StartScan) => Scanning,
            (Active, StartScan) => Scanning,
            (Scanning, ChangesDetected) => Ready,
            (Scanning, NoChangesValidated) => Active,
            (Ready, StartIndexing) => Indexing,
            (Indexing, IndexingDone) => Active,
            (_, Fault) => Error,
            (_, Reset) => Pending,
            (from, event) => {
                return Err(LifecycleError::IllegalTransition {
                    from,
                    event: event_name(event),
                })
            }
        };
        self.state = next;
        Ok(next)
    }
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn event_name(event: Event) -> &'static str {
    match event {
        Event::StartScan => "start_scan",
        Event::ChangesDetected => "changes_detected",
        Event::NoChangesValidated => "no_changes_validated",
        Event::StartIndexing => "start_indexing",
        Event::IndexingDone => "indexing_done",
        Event::Fault => "fault",
        Event::Reset => "reset",
    }
}
