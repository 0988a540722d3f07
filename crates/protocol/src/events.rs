use serde::{Deserialize, Serialize};

/// Lifecycle state of a silo as surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    /// Watcher running, no work in flight.
    Idle,
    /// Reconcile or watcher pipeline active.
    Indexing,
    /// Queued behind another silo on the indexing queue.
    Waiting,
    /// Watcher halted, database closed, no work accepted.
    Stopped,
    /// Last action failed; reads may still be served.
    Error,
}

impl WatcherState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Indexing => "indexing",
            Self::Waiting => "waiting",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Indexed,
    Deleted,
    Error,
}

/// One entry in the merged activity stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub timestamp_unix_ms: u64,
    pub silo_name: String,
    pub file_path: String,
    pub event_type: FileEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Phase of a reconcile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Scanning,
    Processing,
    Done,
}

/// Progress snapshot emitted while reconciling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileProgress {
    pub phase: ReconcilePhase,
    pub current: usize,
    pub total: usize,
}
